//! Command bus between the browser side and the script side.
//!
//! Every message is a `Command`: a small integer tag plus an optional string
//! payload. Two vocabularies share that shape, one per direction:
//! `ScriptCommand` travels browser → script and `BrowserCommand` travels
//! script → browser. Both ends ship together, so the tag values are a flat
//! table; the leading version byte is the only extension point.
//!
//! Wire frame:
//!
//! ```text
//! version: u8 | tag: u32 LE | has_payload: u8 | [len: u32 LE | utf-8 bytes]
//! ```

use crate::{Error, Result};

/// Version byte written at the start of every frame
pub const PROTOCOL_VERSION: u8 = 1;

/// One tagged message on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub tag: u32,
    pub payload: Option<String>,
}

impl Command {
    pub fn new(tag: u32, payload: Option<String>) -> Self {
        Self { tag, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.as_ref().map_or(0, |p| 4 + p.len());
        let mut out = Vec::with_capacity(6 + payload_len);
        out.push(PROTOCOL_VERSION);
        out.extend_from_slice(&self.tag.to_le_bytes());
        match &self.payload {
            Some(p) => {
                out.push(1);
                out.extend_from_slice(&(p.len() as u32).to_le_bytes());
                out.extend_from_slice(p.as_bytes());
            }
            None => out.push(0),
        }
        out
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut r = Reader { buf: frame, pos: 0 };
        let version = r.u8()?;
        if version != PROTOCOL_VERSION {
            return Err(Error::ProtocolError(format!("unsupported frame version {}", version)));
        }
        let tag = r.u32()?;
        let payload = match r.u8()? {
            0 => None,
            1 => {
                let len = r.u32()? as usize;
                let bytes = r.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| Error::ProtocolError(format!("payload is not UTF-8: {}", e)))?;
                Some(s.to_string())
            }
            other => return Err(Error::ProtocolError(format!("invalid payload flag {}", other))),
        };
        if r.pos != frame.len() {
            return Err(Error::ProtocolError(format!(
                "{} trailing bytes after command",
                frame.len() - r.pos
            )));
        }
        Ok(Self { tag, payload })
    }

    fn require_payload(self, name: &str) -> Result<String> {
        self.payload
            .ok_or_else(|| Error::ProtocolError(format!("{} requires a payload", name)))
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len()).ok_or_else(|| {
            Error::ProtocolError(format!("truncated frame: need {} bytes at offset {}", n, self.pos))
        })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Browser → script commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Evaluate the payload in the active script context
    EvalJavascript(String),
    /// The page finished loading (informational)
    SiteLoaded,
}

impl ScriptCommand {
    pub const EVAL_JAVASCRIPT: u32 = 0;
    pub const SITE_LOADED: u32 = 1;

    pub fn to_command(&self) -> Command {
        match self {
            ScriptCommand::EvalJavascript(code) => Command::new(Self::EVAL_JAVASCRIPT, Some(code.clone())),
            ScriptCommand::SiteLoaded => Command::new(Self::SITE_LOADED, None),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_command().encode()
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        Self::try_from(Command::decode(frame)?)
    }
}

impl TryFrom<Command> for ScriptCommand {
    type Error = Error;

    fn try_from(cmd: Command) -> Result<Self> {
        match cmd.tag {
            Self::EVAL_JAVASCRIPT => Ok(ScriptCommand::EvalJavascript(cmd.require_payload("EVAL_JAVASCRIPT")?)),
            Self::SITE_LOADED => Ok(ScriptCommand::SiteLoaded),
            tag => Err(Error::ProtocolError(format!("unknown script command tag {}", tag))),
        }
    }
}

/// Script → browser commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCommand {
    NavBack,
    NavForward,
    NavRefresh,
    /// Not supported yet; logged and dropped
    NavNewWindow,
    NavSetUrl(String),
    /// A script evaluation threw; the payload is the exception message
    UnrecoverableError(String),
}

impl BrowserCommand {
    pub const NAV_BACK: u32 = 0;
    pub const NAV_FORWARD: u32 = 1;
    pub const NAV_REFRESH: u32 = 2;
    pub const NAV_NEW_WINDOW: u32 = 3;
    pub const NAV_SET_URL: u32 = 4;
    pub const UNRECOVERABLE_ERROR: u32 = 5;

    pub fn to_command(&self) -> Command {
        match self {
            BrowserCommand::NavBack => Command::new(Self::NAV_BACK, None),
            BrowserCommand::NavForward => Command::new(Self::NAV_FORWARD, None),
            BrowserCommand::NavRefresh => Command::new(Self::NAV_REFRESH, None),
            BrowserCommand::NavNewWindow => Command::new(Self::NAV_NEW_WINDOW, None),
            BrowserCommand::NavSetUrl(url) => Command::new(Self::NAV_SET_URL, Some(url.clone())),
            BrowserCommand::UnrecoverableError(msg) => Command::new(Self::UNRECOVERABLE_ERROR, Some(msg.clone())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_command().encode()
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        Self::try_from(Command::decode(frame)?)
    }
}

impl TryFrom<Command> for BrowserCommand {
    type Error = Error;

    fn try_from(cmd: Command) -> Result<Self> {
        match cmd.tag {
            Self::NAV_BACK => Ok(BrowserCommand::NavBack),
            Self::NAV_FORWARD => Ok(BrowserCommand::NavForward),
            Self::NAV_REFRESH => Ok(BrowserCommand::NavRefresh),
            Self::NAV_NEW_WINDOW => Ok(BrowserCommand::NavNewWindow),
            Self::NAV_SET_URL => Ok(BrowserCommand::NavSetUrl(cmd.require_payload("NAV_SET_URL")?)),
            Self::UNRECOVERABLE_ERROR => Ok(BrowserCommand::UnrecoverableError(
                cmd.require_payload("UNRECOVERABLE_ERROR")?,
            )),
            tag => Err(Error::ProtocolError(format!("unknown browser command tag {}", tag))),
        }
    }
}

/// Outgoing half of the bus. Fire-and-forget.
pub trait CommandSink {
    fn send(&self, frame: Vec<u8>);
}

impl<F: Fn(Vec<u8>)> CommandSink for F {
    fn send(&self, frame: Vec<u8>) {
        self(frame)
    }
}

/// The script engine context on the script side
pub trait ScriptContext {
    /// Evaluate `code`. A thrown exception is returned as its message text.
    fn eval(&mut self, code: &str) -> std::result::Result<(), String>;

    /// Commands the page posted through the `webcell_post_*` functions since
    /// the last call
    fn take_posted(&mut self) -> Vec<BrowserCommand> {
        Vec::new()
    }
}

/// Script-side receipt of one frame.
///
/// Commands posted by the evaluated script are forwarded first; a thrown
/// exception is then escalated once as `UNRECOVERABLE_ERROR`. Nothing is
/// retried.
pub fn handle_script_frame(
    frame: &[u8],
    context: &mut dyn ScriptContext,
    reply: &dyn CommandSink,
) -> Result<ScriptCommand> {
    let cmd = ScriptCommand::decode(frame)?;
    match &cmd {
        ScriptCommand::EvalJavascript(code) => {
            log::debug!("Evaluating Javascript: {}", code);
            let outcome = context.eval(code);
            for posted in context.take_posted() {
                reply.send(posted.encode());
            }
            if let Err(message) = outcome {
                reply.send(BrowserCommand::UnrecoverableError(message).encode());
            }
        }
        ScriptCommand::SiteLoaded => {
            log::trace!("site loaded");
        }
    }
    Ok(cmd)
}

/// Target of browser-side navigation commands
pub trait Navigator: Send + Sync {
    fn back(&self);
    fn forward(&self);
    fn refresh(&self);
    fn set_url(&self, url: &str);
}

/// Browser-side action for one decoded command
pub fn dispatch_browser_command(cmd: &BrowserCommand, navigator: &dyn Navigator) {
    match cmd {
        BrowserCommand::UnrecoverableError(message) => log::error!("JS exception: {}", message),
        BrowserCommand::NavBack => navigator.back(),
        BrowserCommand::NavForward => navigator.forward(),
        BrowserCommand::NavRefresh => navigator.refresh(),
        BrowserCommand::NavNewWindow => log::warn!("new window requested; not supported"),
        BrowserCommand::NavSetUrl(url) => navigator.set_url(url),
    }
}

/// Browser-side receipt of one frame
pub fn handle_browser_frame(frame: &[u8], navigator: &dyn Navigator) -> Result<BrowserCommand> {
    let cmd = BrowserCommand::decode(frame)?;
    dispatch_browser_command(&cmd, navigator);
    Ok(cmd)
}
