//! Script side of the command bus for the software engine.
//!
//! Each browser owns a `ScriptWorker`: a Boa context living on its own thread,
//! or in a child process speaking stdio frames. Frames posted to the worker
//! are handled in order by `protocol::handle_script_frame`; whatever the
//! script sends back is collected until the engine drains it on tick.

use crate::engine::EngineSettings;
use crate::protocol::{self, BrowserCommand, Command, ScriptContext};
use crate::{Error, Result};
use boa_engine::{Context as JsContext, Source};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command as Process, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Defines the `webcell_post_*` page API and a console that records into an
/// array. Both arrays are drained after every evaluation.
pub const SCRIPT_PRELUDE: &str = r#"
var __webcell_outbox = [];
var __webcell_console = [];
function webcell_post_nav_back() { __webcell_outbox.push([0]); }
function webcell_post_nav_forward() { __webcell_outbox.push([1]); }
function webcell_post_nav_refresh() { __webcell_outbox.push([2]); }
function webcell_post_new_window() { __webcell_outbox.push([3]); }
function webcell_post_url_change(url) { __webcell_outbox.push([4, String(url)]); }
var console = (function () {
  function sink(level) {
    return function () {
      __webcell_console.push([level, Array.prototype.map.call(arguments, String).join(" ")]);
    };
  }
  return { log: sink("info"), info: sink("info"), warn: sink("warn"), error: sink("error"), debug: sink("debug") };
})();
"#;

/// Worker stdio frame carrying an encoded command
pub const FRAME_COMMAND: u8 = 0;
/// Worker stdio frame asking for a fresh script context
pub const FRAME_RESET: u8 = 1;
/// Worker stdio frame carrying a console line (JSON `[level, message]`)
pub const FRAME_CONSOLE: u8 = 2;

/// Runtime limits applied to every script context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Maximum loop iterations before Boa throws (0 => disabled)
    pub loop_iteration_limit: u64,
    /// Maximum recursion depth before Boa throws (usize::MAX => disabled)
    pub recursion_limit: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

impl ScriptLimits {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            loop_iteration_limit: settings.script_loop_iteration_limit,
            recursion_limit: settings.script_recursion_limit,
        }
    }
}

/// A Boa context with the page API installed
pub struct BoaScriptContext {
    ctx: JsContext,
}

impl BoaScriptContext {
    pub fn new(limits: &ScriptLimits) -> Result<Self> {
        let mut ctx = JsContext::default();
        if limits.loop_iteration_limit > 0 {
            ctx.runtime_limits_mut()
                .set_loop_iteration_limit(limits.loop_iteration_limit);
        }
        if limits.recursion_limit < usize::MAX {
            ctx.runtime_limits_mut().set_recursion_limit(limits.recursion_limit);
        }
        ctx.eval(Source::from_bytes(SCRIPT_PRELUDE.as_bytes()))
            .map_err(|e| Error::ScriptError(format!("prelude failed: {}", e)))?;
        Ok(Self { ctx })
    }

    /// Splice every entry out of a global array and return it as JSON
    fn drain_array(&mut self, name: &str) -> Vec<serde_json::Value> {
        let code = format!("JSON.stringify({0}.splice(0, {0}.length))", name);
        let value = match self.ctx.eval(Source::from_bytes(code.as_bytes())) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("draining {} failed: {}", name, e);
                return Vec::new();
            }
        };
        let json = match value.to_string(&mut self.ctx) {
            Ok(s) => s.to_std_string_escaped(),
            Err(e) => {
                log::warn!("draining {} failed: {}", name, e);
                return Vec::new();
            }
        };
        serde_json::from_str(&json).unwrap_or_default()
    }

    /// Console lines logged since the last call
    pub fn take_console(&mut self) -> Vec<(log::Level, String)> {
        self.drain_array("__webcell_console")
            .into_iter()
            .filter_map(|entry| {
                let level = entry.get(0)?.as_str()?.parse().unwrap_or(log::Level::Info);
                let message = entry.get(1)?.as_str()?.to_string();
                Some((level, message))
            })
            .collect()
    }
}

impl ScriptContext for BoaScriptContext {
    fn eval(&mut self, code: &str) -> std::result::Result<(), String> {
        self.ctx
            .eval(Source::from_bytes(code.as_bytes()))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn take_posted(&mut self) -> Vec<BrowserCommand> {
        self.drain_array("__webcell_outbox")
            .into_iter()
            .filter_map(|entry| {
                let tag = entry.get(0)?.as_u64()? as u32;
                let payload = entry.get(1).and_then(|p| p.as_str()).map(str::to_string);
                match BrowserCommand::try_from(Command::new(tag, payload)) {
                    Ok(cmd) => Some(cmd),
                    Err(e) => {
                        log::warn!("dropping posted command: {}", e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// What a worker hands back to the browser side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// An encoded `BrowserCommand`
    Frame(Vec<u8>),
    Console { level: log::Level, message: String },
}

/// Handle one input frame against `ctx`, reporting everything the script
/// produced through `emit`
fn service_frame(ctx: &mut BoaScriptContext, frame: &[u8], emit: &mut dyn FnMut(WorkerEvent)) {
    let replies = RefCell::new(Vec::new());
    let reply = |f: Vec<u8>| replies.borrow_mut().push(f);
    if let Err(e) = protocol::handle_script_frame(frame, ctx, &reply) {
        log::warn!("script worker: malformed command frame: {}", e);
    }
    for (level, message) in ctx.take_console() {
        emit(WorkerEvent::Console { level, message });
    }
    for f in replies.into_inner() {
        emit(WorkerEvent::Frame(f));
    }
}

enum WorkerInput {
    Frame(Vec<u8>),
    Reset,
}

enum Transport {
    Thread(mpsc::Sender<WorkerInput>),
    Process {
        stdin: Mutex<ChildStdin>,
        child: Arc<Mutex<Option<Child>>>,
    },
}

/// A script context reachable by fire-and-forget frames
pub struct ScriptWorker {
    transport: Option<Transport>,
    events: mpsc::Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ScriptWorker {
    /// Run the script context on a thread of this process
    pub fn spawn_thread(limits: ScriptLimits) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WorkerInput>();
        let (out_tx, out_rx) = mpsc::channel::<WorkerEvent>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        // Boa contexts are not Send; build it on the worker thread.
        let handle = std::thread::Builder::new()
            .name("webcell-script".into())
            .spawn(move || {
                let mut ctx = match BoaScriptContext::new(&limits) {
                    Ok(ctx) => {
                        let _ = ready_tx.send(Ok(()));
                        ctx
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(input) = rx.recv() {
                    match input {
                        WorkerInput::Frame(frame) => service_frame(&mut ctx, &frame, &mut |ev| {
                            let _ = out_tx.send(ev);
                        }),
                        WorkerInput::Reset => match BoaScriptContext::new(&limits) {
                            Ok(fresh) => ctx = fresh,
                            Err(e) => log::error!("script worker: reset failed: {}", e),
                        },
                    }
                }
            })
            .map_err(|e| Error::InitializationError(format!("failed to spawn script thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| Error::InitializationError("script thread exited during startup".into()))??;

        Ok(Self {
            transport: Some(Transport::Thread(tx)),
            events: out_rx,
            handle: Some(handle),
        })
    }

    /// Run the script context in `<exe> --script-worker`, speaking stdio frames
    pub fn spawn_process(exe: &Path, limits: ScriptLimits) -> Result<Self> {
        let mut child = Process::new(exe)
            .arg("--script-worker")
            .arg("--loop-limit")
            .arg(limits.loop_iteration_limit.to_string())
            .arg("--recursion-limit")
            .arg(limits.recursion_limit.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::InitializationError(format!("failed to spawn script worker {}: {}", exe.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::InitializationError("script worker has no stdin".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::InitializationError("script worker has no stdout".into()))?;

        // Keep the Child so it can be killed when the worker is dropped.
        let child = Arc::new(Mutex::new(Some(child)));
        let (out_tx, out_rx) = mpsc::channel::<WorkerEvent>();

        let handle = std::thread::Builder::new()
            .name("webcell-script-reader".into())
            .spawn(move || loop {
                match read_frame(&mut stdout) {
                    Ok(Some((FRAME_COMMAND, bytes))) => {
                        let _ = out_tx.send(WorkerEvent::Frame(bytes));
                    }
                    Ok(Some((FRAME_CONSOLE, bytes))) => {
                        if let Ok((level, message)) = serde_json::from_slice::<(String, String)>(&bytes) {
                            let level = level.parse().unwrap_or(log::Level::Info);
                            let _ = out_tx.send(WorkerEvent::Console { level, message });
                        }
                    }
                    Ok(Some((kind, _))) => log::warn!("script worker: unknown frame kind {}", kind),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("script worker: read failed: {}", e);
                        break;
                    }
                }
            })
            .map_err(|e| Error::InitializationError(format!("failed to spawn reader thread: {}", e)))?;

        Ok(Self {
            transport: Some(Transport::Process {
                stdin: Mutex::new(stdin),
                child,
            }),
            events: out_rx,
            handle: Some(handle),
        })
    }

    /// Post an encoded `ScriptCommand`. Never blocks on the script.
    pub fn post(&self, frame: Vec<u8>) {
        match &self.transport {
            Some(Transport::Thread(tx)) => {
                if tx.send(WorkerInput::Frame(frame)).is_err() {
                    log::warn!("script worker is gone; frame dropped");
                }
            }
            Some(Transport::Process { stdin, .. }) => {
                if let Err(e) = write_frame(&mut *stdin.lock(), FRAME_COMMAND, &frame) {
                    log::warn!("script worker write failed: {}", e);
                }
            }
            None => {}
        }
    }

    /// Replace the script context with a fresh one
    pub fn reset(&self) {
        match &self.transport {
            Some(Transport::Thread(tx)) => {
                let _ = tx.send(WorkerInput::Reset);
            }
            Some(Transport::Process { stdin, .. }) => {
                if let Err(e) = write_frame(&mut *stdin.lock(), FRAME_RESET, &[]) {
                    log::warn!("script worker write failed: {}", e);
                }
            }
            None => {}
        }
    }

    /// Everything the worker produced so far
    pub fn drain(&self) -> Vec<WorkerEvent> {
        self.events.try_iter().collect()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}

impl Drop for ScriptWorker {
    fn drop(&mut self) {
        // Dropping the sender (or the child's stdin) ends the worker loop.
        if let Some(Transport::Process { child, .. }) = self.transport.take() {
            if let Some(mut c) = child.lock().take() {
                let _ = c.kill();
                let _ = c.wait();
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Write one `kind | len u32 LE | bytes` frame and flush
pub fn write_frame<W: Write>(w: &mut W, kind: u8, bytes: &[u8]) -> io::Result<()> {
    w.write_all(&[kind])?;
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)?;
    w.flush()
}

/// Read one frame. `None` on a clean end of stream.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut kind = [0u8; 1];
    if r.read(&mut kind)? == 0 {
        return Ok(None);
    }
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let mut bytes = vec![0u8; u32::from_le_bytes(len) as usize];
    r.read_exact(&mut bytes)?;
    Ok(Some((kind[0], bytes)))
}

/// Body of `webcell --script-worker`: serve frames from `input` until it
/// closes
pub fn run_stdio_worker<R: Read, W: Write>(limits: ScriptLimits, mut input: R, mut output: W) -> Result<()> {
    let mut ctx = BoaScriptContext::new(&limits)?;
    while let Some((kind, bytes)) = read_frame(&mut input)? {
        match kind {
            FRAME_COMMAND => {
                let mut failed = None;
                service_frame(&mut ctx, &bytes, &mut |ev| {
                    let written = match ev {
                        WorkerEvent::Frame(f) => write_frame(&mut output, FRAME_COMMAND, &f),
                        WorkerEvent::Console { level, message } => {
                            match serde_json::to_vec(&(level.as_str().to_lowercase(), message)) {
                                Ok(json) => write_frame(&mut output, FRAME_CONSOLE, &json),
                                Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                            }
                        }
                    };
                    if let Err(e) = written {
                        failed.get_or_insert(e);
                    }
                });
                if let Some(e) = failed {
                    return Err(e.into());
                }
            }
            FRAME_RESET => ctx = BoaScriptContext::new(&limits)?,
            other => log::warn!("script worker: unknown frame kind {}", other),
        }
    }
    Ok(())
}
