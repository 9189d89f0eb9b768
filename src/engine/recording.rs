//! In-memory engine that records every call.
//!
//! Browsers are "created" on the next `do_message_loop_work`, exactly like a
//! real engine attaches handles asynchronously. Nothing is painted or loaded
//! on its own; tests drive the callbacks through `RecordedBrowser`.

use super::{
    BrowserClient, BrowserEngine, BrowserHost, BrowserId, DeferredTask, EngineSettings, MouseButton, MouseEvent,
    PaintElementType, ProcessId,
};
use crate::protocol::ScriptCommand;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One call made on a `RecordingBrowser`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    LoadUrl(String),
    GoBack,
    GoForward,
    Reload,
    MouseMove {
        event: MouseEvent,
        mouse_leave: bool,
    },
    MouseClick {
        event: MouseEvent,
        button: MouseButton,
        mouse_up: bool,
        click_count: u32,
    },
    MouseWheel {
        event: MouseEvent,
        delta_x: i32,
        delta_y: i32,
    },
    ProcessMessage {
        target: ProcessId,
        frame: Vec<u8>,
    },
    Close,
}

/// Engine handle that only records what it is asked to do
pub struct RecordingBrowser {
    id: BrowserId,
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingBrowser {
    pub fn new(id: BrowserId) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Decoded commands sent to the script side, in order
    pub fn script_commands(&self) -> Vec<ScriptCommand> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HostCall::ProcessMessage {
                    target: ProcessId::Script,
                    frame,
                } => ScriptCommand::decode(frame).ok(),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().push(call);
    }
}

impl BrowserHost for RecordingBrowser {
    fn id(&self) -> BrowserId {
        self.id
    }

    fn load_url(&self, url: &str) {
        self.record(HostCall::LoadUrl(url.to_string()));
    }

    fn go_back(&self) {
        self.record(HostCall::GoBack);
    }

    fn go_forward(&self) {
        self.record(HostCall::GoForward);
    }

    fn reload(&self) {
        self.record(HostCall::Reload);
    }

    fn send_mouse_move(&self, event: MouseEvent, mouse_leave: bool) {
        self.record(HostCall::MouseMove { event, mouse_leave });
    }

    fn send_mouse_click(&self, event: MouseEvent, button: MouseButton, mouse_up: bool, click_count: u32) {
        self.record(HostCall::MouseClick {
            event,
            button,
            mouse_up,
            click_count,
        });
    }

    fn send_mouse_wheel(&self, event: MouseEvent, delta_x: i32, delta_y: i32) {
        self.record(HostCall::MouseWheel { event, delta_x, delta_y });
    }

    fn send_process_message(&self, target: ProcessId, frame: Vec<u8>) {
        self.record(HostCall::ProcessMessage { target, frame });
    }

    fn close(&self) {
        self.record(HostCall::Close);
    }
}

/// A browser the recording engine has attached, with the client it was
/// created for
#[derive(Clone)]
pub struct RecordedBrowser {
    pub host: Arc<RecordingBrowser>,
    pub client: BrowserClient,
    pub initial_url: String,
}

impl RecordedBrowser {
    pub fn host_dyn(&self) -> Arc<dyn BrowserHost> {
        self.host.clone()
    }

    /// Push a full frame of one BGRA color through the paint callback
    pub fn paint_solid(&self, bgra: [u8; 4]) {
        let (w, h) = self.client.paint.view_rect();
        let frame: Vec<u8> = bgra.iter().copied().cycle().take(w as usize * h as usize * 4).collect();
        self.client.paint.on_paint(PaintElementType::View, &frame, w, h);
    }

    /// Deliver a frame as if the script side had sent it
    pub fn deliver_from_script(&self, frame: &[u8]) -> bool {
        self.client
            .messages
            .on_process_message(&self.host_dyn(), ProcessId::Script, frame)
    }
}

struct PendingTask {
    due: Instant,
    delay: Duration,
    task: DeferredTask,
}

#[derive(Default)]
struct EngineState {
    settings: Option<EngineSettings>,
    pending: Vec<(BrowserClient, String)>,
    browsers: Vec<RecordedBrowser>,
    delayed: Vec<PendingTask>,
    next_id: BrowserId,
    ticks: u64,
    shut_down: bool,
}

/// Engine runtime that attaches `RecordingBrowser`s on tick
#[derive(Default)]
pub struct RecordingEngine {
    state: Mutex<EngineState>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn settings(&self) -> Option<EngineSettings> {
        self.state.lock().settings.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().settings.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Browsers attached so far, in creation order
    pub fn browsers(&self) -> Vec<RecordedBrowser> {
        self.state.lock().browsers.clone()
    }

    /// Browser created for `url`, if any
    pub fn browser_for_url(&self, url: &str) -> Option<RecordedBrowser> {
        self.state.lock().browsers.iter().find(|b| b.initial_url == url).cloned()
    }

    /// Delays of the tasks still waiting to run
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.state.lock().delayed.iter().map(|t| t.delay).collect()
    }

    /// Run every delayed task now, regardless of its deadline
    pub fn fire_delayed_tasks(&self) -> usize {
        let tasks = std::mem::take(&mut self.state.lock().delayed);
        let n = tasks.len();
        for t in tasks {
            (t.task)();
        }
        n
    }
}

impl BrowserEngine for RecordingEngine {
    fn initialize(&self, settings: &EngineSettings) -> Result<()> {
        self.state.lock().settings = Some(settings.clone());
        Ok(())
    }

    fn create_browser(&self, client: BrowserClient, url: &str) -> Result<()> {
        self.state.lock().pending.push((client, url.to_string()));
        Ok(())
    }

    fn do_message_loop_work(&self) {
        let (created, due) = {
            let mut st = self.state.lock();
            st.ticks += 1;
            let pending = std::mem::take(&mut st.pending);
            let mut created = Vec::with_capacity(pending.len());
            for (client, initial_url) in pending {
                st.next_id += 1;
                let rec = RecordedBrowser {
                    host: RecordingBrowser::new(st.next_id),
                    client,
                    initial_url,
                };
                st.browsers.push(rec.clone());
                created.push(rec);
            }
            let now = Instant::now();
            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut st.delayed).into_iter().partition(|t| t.due <= now);
            st.delayed = waiting;
            (created, due)
        };

        // Callbacks run without the engine lock held so they can post tasks.
        for rec in created {
            rec.client.navigation.on_after_created(rec.host_dyn());
        }
        for t in due {
            (t.task)();
        }
    }

    fn post_delayed_task(&self, delay: Duration, task: DeferredTask) {
        self.state.lock().delayed.push(PendingTask {
            due: Instant::now() + delay,
            delay,
            task,
        });
    }

    fn shutdown(&self) {
        let browsers = {
            let mut st = self.state.lock();
            st.shut_down = true;
            st.delayed.clear();
            st.pending.clear();
            std::mem::take(&mut st.browsers)
        };
        for b in browsers {
            b.host.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LoadErrorCode, MessageSink, NavigationObserver, PaintSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        created: AtomicUsize,
        painted: AtomicUsize,
    }

    impl PaintSink for CountingClient {
        fn view_rect(&self) -> (u32, u32) {
            (2, 2)
        }
        fn on_paint(&self, _kind: PaintElementType, buffer: &[u8], _w: u32, _h: u32) {
            assert_eq!(buffer.len(), 16);
            self.painted.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl NavigationObserver for CountingClient {
        fn on_after_created(&self, _browser: Arc<dyn BrowserHost>) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        fn on_address_change(&self, _b: &Arc<dyn BrowserHost>, _url: &str) {}
        fn on_load_end(&self, _b: &Arc<dyn BrowserHost>, _status: i32) {}
        fn on_load_error(&self, _b: &Arc<dyn BrowserHost>, _c: LoadErrorCode, _t: &str, _u: &str) {}
        fn on_console_message(&self, _l: log::Level, _m: &str, _s: &str, _line: u32) -> bool {
            false
        }
        fn on_before_popup(&self, _url: &str) -> bool {
            true
        }
    }

    impl MessageSink for CountingClient {
        fn on_process_message(&self, _b: &Arc<dyn BrowserHost>, _s: ProcessId, _f: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn browsers_attach_on_the_next_tick() {
        let engine = RecordingEngine::new();
        let client = Arc::new(CountingClient::default());
        engine
            .create_browser(BrowserClient::from_handler(client.clone()), "about:blank")
            .unwrap();
        assert_eq!(client.created.load(Ordering::SeqCst), 0);
        engine.do_message_loop_work();
        assert_eq!(client.created.load(Ordering::SeqCst), 1);
        let b = engine.browser_for_url("about:blank").expect("browser recorded");
        b.paint_solid([1, 2, 3, 4]);
        assert_eq!(client.painted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_tasks_wait_for_their_deadline() {
        let engine = RecordingEngine::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        engine.post_delayed_task(
            Duration::from_secs(3600),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        engine.do_message_loop_work();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(engine.pending_delays(), vec![Duration::from_secs(3600)]);
        assert_eq!(engine.fire_delayed_tasks(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_closes_browsers() {
        let engine = RecordingEngine::new();
        let client = Arc::new(CountingClient::default());
        engine
            .create_browser(BrowserClient::from_handler(client), "about:blank")
            .unwrap();
        engine.do_message_loop_work();
        let host = engine.browsers()[0].host.clone();
        engine.shutdown();
        assert!(engine.is_shut_down());
        assert_eq!(host.calls(), vec![HostCall::Close]);
        assert!(engine.browsers().is_empty());
    }
}
