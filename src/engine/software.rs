//! Pure-Rust browser engine.
//!
//! Pages are fetched with a blocking `reqwest` client on a fetch thread,
//! parsed with `scraper`, laid out and rasterized by `crate::rendering`, and
//! scripted through one `ScriptWorker` per browser. Every callback happens
//! inside `do_message_loop_work`: host calls made on a `SoftwareBrowser` are
//! queued and served on the next pump, so callbacks may call back into the
//! browser freely. A navigation commits on the first pump after its fetch
//! finishes; a tick never waits on the network.

use super::script::{ScriptLimits, ScriptWorker, WorkerEvent};
use super::{
    BrowserClient, BrowserEngine, BrowserHost, BrowserId, DeferredTask, EngineSettings, LoadErrorCode, MouseButton,
    MouseEvent, PaintElementType, ProcessId,
};
use crate::protocol::ScriptCommand;
use crate::rendering::{self, layout};
use crate::{Error, Result, Viewport};
use base64::Engine as _;
use parking_lot::Mutex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use percent_encoding::percent_decode_str;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use url::Url;

/// Upper bound on queued host requests served per browser per pump
const MAX_REQUESTS_PER_PUMP: usize = 32;

enum HostRequest {
    Navigate { url: String, push_history: bool },
    Back,
    Forward,
    Reload,
    Click { x: i32, y: i32 },
    Wheel { delta_y: i32 },
    Deliver(Vec<u8>),
}

struct Page {
    url: String,
    nodes: Vec<layout::LayoutNode>,
    doc_height: u32,
    scroll_y: u32,
    dirty: bool,
    last_paint: Option<Instant>,
}

impl Page {
    fn blank() -> Self {
        Self {
            url: String::new(),
            nodes: Vec::new(),
            doc_height: 0,
            scroll_y: 0,
            dirty: true,
            last_paint: None,
        }
    }
}

#[derive(Default)]
struct History {
    entries: Vec<String>,
    index: usize,
}

impl History {
    fn push(&mut self, url: &str) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.index + 1);
        }
        self.entries.push(url.to_string());
        self.index = self.entries.len() - 1;
    }

    fn step(&mut self, back: bool) -> Option<String> {
        if back {
            self.index = self.index.checked_sub(1)?;
        } else {
            if self.index + 1 >= self.entries.len() {
                return None;
            }
            self.index += 1;
        }
        self.entries.get(self.index).cloned()
    }

    fn current(&self) -> Option<String> {
        self.entries.get(self.index).cloned()
    }
}

/// Result of fetching a page body
struct Fetched {
    html: String,
    status: i32,
    final_url: String,
}

type LoadFailure = (LoadErrorCode, String);

type FetchOutcome = std::result::Result<Fetched, LoadFailure>;

/// The navigation waiting on a fetch thread
struct InFlight {
    generation: u64,
    url: String,
    push_history: bool,
}

/// Fetch threads report here, tagged with the generation they were started for
struct Loader {
    generation: u64,
    in_flight: Option<InFlight>,
    done_tx: mpsc::Sender<(u64, FetchOutcome)>,
    done_rx: mpsc::Receiver<(u64, FetchOutcome)>,
}

impl Loader {
    fn new() -> Self {
        let (done_tx, done_rx) = mpsc::channel();
        Self {
            generation: 0,
            in_flight: None,
            done_tx,
            done_rx,
        }
    }

    /// Completed fetches for the navigation still in flight; stale ones are dropped
    fn take_finished(&mut self) -> Option<(InFlight, FetchOutcome)> {
        while let Ok((generation, outcome)) = self.done_rx.try_recv() {
            if self.in_flight.as_ref().map(|f| f.generation) == Some(generation) {
                return self.in_flight.take().map(|f| (f, outcome));
            }
        }
        None
    }
}

/// One windowless browser of the software engine
pub struct SoftwareBrowser {
    id: BrowserId,
    viewport: Viewport,
    http: Client,
    frame_interval: Duration,
    client: Mutex<Option<BrowserClient>>,
    requests: Mutex<VecDeque<HostRequest>>,
    page: Mutex<Page>,
    history: Mutex<History>,
    loader: Mutex<Loader>,
    worker: Mutex<Option<ScriptWorker>>,
    closed: AtomicBool,
}

impl SoftwareBrowser {
    fn new(id: BrowserId, client: BrowserClient, http: Client, settings: &EngineSettings) -> Self {
        let (width, height) = client.paint.view_rect();
        let frame_rate = settings.frame_rate.max(1);
        Self {
            id,
            viewport: Viewport { width, height },
            http,
            frame_interval: Duration::from_secs(1) / frame_rate,
            client: Mutex::new(Some(client)),
            requests: Mutex::new(VecDeque::new()),
            page: Mutex::new(Page::blank()),
            history: Mutex::new(History::default()),
            loader: Mutex::new(Loader::new()),
            worker: Mutex::new(spawn_worker(settings)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// URL of the page currently shown
    pub fn current_url(&self) -> String {
        self.page.lock().url.clone()
    }

    pub fn scroll_y(&self) -> u32 {
        self.page.lock().scroll_y
    }

    fn enqueue(&self, request: HostRequest) {
        if !self.is_closed() {
            self.requests.lock().push_back(request);
        }
    }

    fn client(&self) -> Option<BrowserClient> {
        self.client.lock().clone()
    }

    /// Serve queued requests, forward script output and paint if needed
    fn pump(self: &Arc<Self>) {
        let Some(client) = self.client() else {
            return;
        };
        let host: Arc<dyn BrowserHost> = self.clone();

        for _ in 0..MAX_REQUESTS_PER_PUMP {
            let next = self.requests.lock().pop_front();
            let Some(request) = next else {
                break;
            };
            self.serve(&client, &host, request);
        }

        let finished = self.loader.lock().take_finished();
        if let Some((nav, outcome)) = finished {
            match outcome {
                Ok(fetched) => self.commit(&client, &host, fetched, nav.push_history),
                Err((code, text)) => client.navigation.on_load_error(&host, code, &text, &nav.url),
            }
        }

        let events = self.worker.lock().as_ref().map(|w| w.drain()).unwrap_or_default();
        for event in events {
            match event {
                WorkerEvent::Frame(frame) => {
                    if !client.messages.on_process_message(&host, ProcessId::Script, &frame) {
                        log::debug!("browser {}: unhandled script frame", self.id);
                    }
                }
                WorkerEvent::Console { level, message } => {
                    let source = self.current_url();
                    if !client.navigation.on_console_message(level, &message, &source, 0) {
                        log::debug!("browser {} console: {}", self.id, message);
                    }
                }
            }
        }

        self.paint_if_dirty(&client);
    }

    fn serve(&self, client: &BrowserClient, host: &Arc<dyn BrowserHost>, request: HostRequest) {
        match request {
            HostRequest::Navigate { url, push_history } => self.navigate(client, host, &url, push_history),
            HostRequest::Back => self.traverse(client, host, true),
            HostRequest::Forward => self.traverse(client, host, false),
            HostRequest::Reload => {
                let current = self.history.lock().current();
                if let Some(url) = current {
                    self.navigate(client, host, &url, false);
                }
            }
            HostRequest::Click { x, y } => self.click(client, x, y),
            HostRequest::Wheel { delta_y } => {
                let mut page = self.page.lock();
                let max_scroll = page.doc_height.saturating_sub(self.viewport.height) as i64;
                let next = (page.scroll_y as i64 - delta_y as i64).clamp(0, max_scroll.max(0));
                if next as u32 != page.scroll_y {
                    page.scroll_y = next as u32;
                    page.dirty = true;
                }
            }
            HostRequest::Deliver(frame) => {
                client.messages.on_process_message(host, ProcessId::Browser, &frame);
            }
        }
    }

    fn traverse(&self, client: &BrowserClient, host: &Arc<dyn BrowserHost>, back: bool) {
        let target = self.history.lock().step(back);
        if let Some(url) = target {
            self.navigate(client, host, &url, false);
        }
    }

    fn click(&self, client: &BrowserClient, x: i32, y: i32) {
        let target = {
            let page = self.page.lock();
            layout::link_at(&page.nodes, x, y + page.scroll_y as i32)
                .and_then(|n| Some((page.url.clone(), n.href.clone()?, n.opens_popup)))
        };
        let Some((base, href, opens_popup)) = target else {
            return;
        };
        if let Some(code) = javascript_href(&href) {
            log::debug!("browser {}: running link script", self.id);
            if let Some(worker) = self.worker.lock().as_ref() {
                worker.post(ScriptCommand::EvalJavascript(code).encode());
            }
            return;
        }
        let url = resolve_href(&base, &href);
        if opens_popup && client.navigation.on_before_popup(&url) {
            // The observer took care of it.
            return;
        }
        self.enqueue(HostRequest::Navigate {
            url,
            push_history: true,
        });
    }

    fn navigate(&self, client: &BrowserClient, host: &Arc<dyn BrowserHost>, raw_url: &str, push_history: bool) {
        let url = match normalize_url(raw_url) {
            Ok(url) => url,
            Err((code, text)) => {
                client.navigation.on_load_error(host, code, &text, raw_url);
                return;
            }
        };
        log::debug!("browser {}: loading {}", self.id, short_url(&url));

        let (superseded, generation, done_tx) = {
            let mut loader = self.loader.lock();
            loader.generation += 1;
            (loader.in_flight.take(), loader.generation, loader.done_tx.clone())
        };
        if let Some(old) = superseded {
            client
                .navigation
                .on_load_error(host, LoadErrorCode::Aborted, "superseded by a newer navigation", &old.url);
        }

        // Inline documents need no fetch thread.
        if url == "about:blank" || url.starts_with("data:") {
            match fetch(&self.http, &url) {
                Ok(fetched) => self.commit(client, host, fetched, push_history),
                Err((code, text)) => client.navigation.on_load_error(host, code, &text, &url),
            }
            return;
        }

        let http = self.http.clone();
        let target = url.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("webcell-fetch-{}", self.id))
            .spawn(move || {
                let outcome = fetch(&http, &target);
                // The browser may be gone by now.
                let _ = done_tx.send((generation, outcome));
            });
        match spawned {
            Ok(_) => {
                self.loader.lock().in_flight = Some(InFlight {
                    generation,
                    url,
                    push_history,
                });
            }
            Err(e) => client.navigation.on_load_error(host, LoadErrorCode::Failed, &e.to_string(), &url),
        }
    }

    /// Lay out a fetched document and make it the current page
    fn commit(&self, client: &BrowserClient, host: &Arc<dyn BrowserHost>, fetched: Fetched, push_history: bool) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.reset();
        }

        let document = Html::parse_document(&fetched.html);
        let nodes = layout::layout_document(&document, self.viewport);
        {
            let mut page = self.page.lock();
            page.url = fetched.final_url.clone();
            page.doc_height = layout::document_height(&nodes);
            page.nodes = nodes;
            page.scroll_y = 0;
            page.dirty = true;
        }
        if push_history {
            self.history.lock().push(&fetched.final_url);
        }

        client.navigation.on_address_change(host, &fetched.final_url);
        self.run_inline_scripts(&document);
        client.navigation.on_load_end(host, fetched.status);
    }

    fn run_inline_scripts(&self, document: &Html) {
        let Ok(sel) = Selector::parse("script:not([src])") else {
            return;
        };
        let worker = self.worker.lock();
        let Some(worker) = worker.as_ref() else {
            return;
        };
        for script in document.select(&sel) {
            let code = script.text().collect::<String>();
            if !code.trim().is_empty() {
                worker.post(ScriptCommand::EvalJavascript(code).encode());
            }
        }
    }

    fn paint_if_dirty(&self, client: &BrowserClient) {
        let frame = {
            let mut page = self.page.lock();
            if !page.dirty {
                return;
            }
            if let Some(last) = page.last_paint {
                if last.elapsed() < self.frame_interval {
                    return;
                }
            }
            page.dirty = false;
            page.last_paint = Some(Instant::now());
            rendering::render_frame(&page.nodes, self.viewport, page.scroll_y)
        };
        client
            .paint
            .on_paint(PaintElementType::View, &frame, self.viewport.width, self.viewport.height);
    }
}

impl BrowserHost for SoftwareBrowser {
    fn id(&self) -> BrowserId {
        self.id
    }

    fn load_url(&self, url: &str) {
        self.enqueue(HostRequest::Navigate {
            url: url.to_string(),
            push_history: true,
        });
    }

    fn go_back(&self) {
        self.enqueue(HostRequest::Back);
    }

    fn go_forward(&self) {
        self.enqueue(HostRequest::Forward);
    }

    fn reload(&self) {
        self.enqueue(HostRequest::Reload);
    }

    fn send_mouse_move(&self, event: MouseEvent, mouse_leave: bool) {
        log::trace!("browser {}: pointer at {},{} leave={}", self.id, event.x, event.y, mouse_leave);
    }

    fn send_mouse_click(&self, event: MouseEvent, button: MouseButton, mouse_up: bool, _click_count: u32) {
        // Links follow on release of the primary button.
        if mouse_up && button == MouseButton::Left {
            self.enqueue(HostRequest::Click { x: event.x, y: event.y });
        }
    }

    fn send_mouse_wheel(&self, _event: MouseEvent, _delta_x: i32, delta_y: i32) {
        if delta_y != 0 {
            self.enqueue(HostRequest::Wheel { delta_y });
        }
    }

    fn send_process_message(&self, target: ProcessId, frame: Vec<u8>) {
        match target {
            ProcessId::Script => {
                if let Some(worker) = self.worker.lock().as_ref() {
                    worker.post(frame);
                }
            }
            ProcessId::Browser => self.enqueue(HostRequest::Deliver(frame)),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("browser {}: closing", self.id);
        self.requests.lock().clear();
        self.loader.lock().in_flight = None;
        // Dropping the client breaks the cycle with the view that owns us.
        let client = self.client.lock().take();
        let worker = self.worker.lock().take();
        drop(worker);
        drop(client);
    }
}

/// Load a page body. Blocks on network and disk; callers run it off the tick
fn fetch(http: &Client, url: &str) -> FetchOutcome {
    if url == "about:blank" {
        return Ok(Fetched {
            html: String::new(),
            status: 200,
            final_url: url.to_string(),
        });
    }
    if url.starts_with("data:") {
        return decode_data_url(url).map(|html| Fetched {
            html,
            status: 200,
            final_url: url.to_string(),
        });
    }
    let parsed = Url::parse(url).map_err(|e| (LoadErrorCode::InvalidUrl, e.to_string()))?;
    match parsed.scheme() {
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| (LoadErrorCode::InvalidUrl, format!("not a local path: {}", url)))?;
            let html = std::fs::read_to_string(&path).map_err(|e| {
                let code = match e.kind() {
                    std::io::ErrorKind::NotFound => LoadErrorCode::FileNotFound,
                    _ => LoadErrorCode::Failed,
                };
                (code, e.to_string())
            })?;
            Ok(Fetched {
                html,
                status: 200,
                final_url: url.to_string(),
            })
        }
        "http" | "https" => {
            let resp = http.get(parsed).send().map_err(|e| (classify_request_error(&e), e.to_string()))?;
            let status = resp.status().as_u16() as i32;
            let final_url = resp.url().to_string();
            let html = resp.text().map_err(|e| (LoadErrorCode::Failed, e.to_string()))?;
            Ok(Fetched {
                html,
                status,
                final_url,
            })
        }
        other => Err((LoadErrorCode::UnknownUrlScheme, format!("unsupported scheme {}", other))),
    }
}

fn spawn_worker(settings: &EngineSettings) -> Option<ScriptWorker> {
    let limits = ScriptLimits::from_settings(settings);
    if settings.use_process_worker {
        let exe = settings
            .script_worker_path
            .clone()
            .or_else(|| std::env::current_exe().ok());
        if let Some(exe) = exe {
            match ScriptWorker::spawn_process(&exe, limits) {
                Ok(w) => return Some(w),
                Err(e) => log::warn!("process script worker unavailable, using a thread: {}", e),
            }
        }
    }
    match ScriptWorker::spawn_thread(limits) {
        Ok(w) => Some(w),
        Err(e) => {
            log::error!("scripts disabled: {}", e);
            None
        }
    }
}

/// Accept anything a user might type into an address bar
pub fn normalize_url(raw: &str) -> std::result::Result<String, LoadFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err((LoadErrorCode::InvalidUrl, "empty URL".into()));
    }
    if trimmed == "about:blank" || trimmed.starts_with("data:") {
        return Ok(trimmed.to_string());
    }
    match Url::parse(trimmed) {
        Ok(u) => Ok(u.to_string()),
        Err(_) => Url::parse(&format!("https://{}", trimmed))
            .map(|u| u.to_string())
            .map_err(|e| (LoadErrorCode::InvalidUrl, e.to_string())),
    }
}

fn resolve_href(base: &str, href: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => href.to_string(),
    }
}

/// Script of a `javascript:` link
fn javascript_href(href: &str) -> Option<String> {
    let (scheme, code) = href.trim().split_once(':')?;
    if !scheme.eq_ignore_ascii_case("javascript") {
        return None;
    }
    Some(percent_decode_str(code).decode_utf8_lossy().into_owned())
}

fn classify_request_error(e: &reqwest::Error) -> LoadErrorCode {
    if e.is_timeout() {
        LoadErrorCode::TimedOut
    } else if e.is_connect() {
        LoadErrorCode::ConnectionFailed
    } else if e.is_builder() {
        LoadErrorCode::InvalidUrl
    } else {
        LoadErrorCode::Failed
    }
}

fn short_url(url: &str) -> &str {
    // data: URLs can be huge
    if url.len() > 96 {
        let mut end = 96;
        while !url.is_char_boundary(end) {
            end -= 1;
        }
        &url[..end]
    } else {
        url
    }
}

/// Body of a `data:` URL, base64 or percent-encoded
pub fn decode_data_url(url: &str) -> std::result::Result<String, LoadFailure> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| (LoadErrorCode::InvalidUrl, "not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| (LoadErrorCode::InvalidUrl, "data URL without a comma".to_string()))?;
    let bytes = if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| (LoadErrorCode::InvalidUrl, e.to_string()))?
    } else {
        percent_decode_str(payload).collect()
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

struct PendingTask {
    due: Instant,
    task: DeferredTask,
}

#[derive(Default)]
struct EngineState {
    settings: Option<EngineSettings>,
    http: Option<Client>,
    pending: Vec<(BrowserClient, String)>,
    browsers: Vec<Arc<SoftwareBrowser>>,
    next_id: BrowserId,
}

/// The software engine runtime
#[derive(Default)]
pub struct SoftwareEngine {
    state: Mutex<EngineState>,
    tasks: Mutex<Vec<PendingTask>>,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live browsers, in creation order
    pub fn browsers(&self) -> Vec<Arc<SoftwareBrowser>> {
        self.state.lock().browsers.clone()
    }
}

impl BrowserEngine for SoftwareEngine {
    fn initialize(&self, settings: &EngineSettings) -> Result<()> {
        let mut st = self.state.lock();
        if st.settings.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let http = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;
        st.http = Some(http);
        st.settings = Some(settings.clone());
        log::debug!("software engine ready ({} fps)", settings.frame_rate);
        Ok(())
    }

    fn create_browser(&self, client: BrowserClient, url: &str) -> Result<()> {
        let mut st = self.state.lock();
        if st.settings.is_none() {
            return Err(Error::NotInitialized);
        }
        st.pending.push((client, url.to_string()));
        Ok(())
    }

    fn do_message_loop_work(&self) {
        let (created, browsers) = {
            let mut st = self.state.lock();
            st.browsers.retain(|b| !b.is_closed());
            let (Some(settings), Some(http)) = (st.settings.clone(), st.http.clone()) else {
                return;
            };
            let pending = std::mem::take(&mut st.pending);
            let mut created = Vec::with_capacity(pending.len());
            for (client, url) in pending {
                st.next_id += 1;
                let browser = Arc::new(SoftwareBrowser::new(st.next_id, client.clone(), http.clone(), &settings));
                st.browsers.push(browser.clone());
                created.push((browser, client, url));
            }
            (created, st.browsers.clone())
        };

        // Callbacks run without the engine lock held so they can post tasks.
        for (browser, client, url) in created {
            client.navigation.on_after_created(browser.clone());
            browser.load_url(&url);
        }
        for browser in browsers {
            browser.pump();
        }

        let due: Vec<PendingTask> = {
            let mut tasks = self.tasks.lock();
            let now = Instant::now();
            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *tasks).into_iter().partition(|t| t.due <= now);
            *tasks = waiting;
            due
        };
        for t in due {
            (t.task)();
        }
    }

    fn post_delayed_task(&self, delay: Duration, task: DeferredTask) {
        self.tasks.lock().push(PendingTask {
            due: Instant::now() + delay,
            task,
        });
    }

    fn shutdown(&self) {
        let browsers = {
            let mut st = self.state.lock();
            st.pending.clear();
            std::mem::take(&mut st.browsers)
        };
        self.tasks.lock().clear();
        for b in browsers {
            b.close();
        }
        log::debug!("software engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MessageSink, NavigationObserver, PaintSink};
    use crate::protocol::BrowserCommand;

    #[derive(Default)]
    struct Recorder {
        host: Mutex<Option<Arc<dyn BrowserHost>>>,
        frames: Mutex<Vec<Vec<u8>>>,
        addresses: Mutex<Vec<String>>,
        loads: Mutex<Vec<i32>>,
        errors: Mutex<Vec<(LoadErrorCode, String)>>,
        commands: Mutex<Vec<BrowserCommand>>,
    }

    impl PaintSink for Recorder {
        fn view_rect(&self) -> (u32, u32) {
            (64, 48)
        }
        fn on_paint(&self, _kind: PaintElementType, buffer: &[u8], _w: u32, _h: u32) {
            self.frames.lock().push(buffer.to_vec());
        }
    }

    impl NavigationObserver for Recorder {
        fn on_after_created(&self, browser: Arc<dyn BrowserHost>) {
            *self.host.lock() = Some(browser);
        }
        fn on_address_change(&self, _b: &Arc<dyn BrowserHost>, url: &str) {
            self.addresses.lock().push(url.to_string());
        }
        fn on_load_end(&self, _b: &Arc<dyn BrowserHost>, status: i32) {
            self.loads.lock().push(status);
        }
        fn on_load_error(&self, _b: &Arc<dyn BrowserHost>, code: LoadErrorCode, _text: &str, url: &str) {
            self.errors.lock().push((code, url.to_string()));
        }
        fn on_console_message(&self, _l: log::Level, _m: &str, _s: &str, _line: u32) -> bool {
            true
        }
        fn on_before_popup(&self, _url: &str) -> bool {
            false
        }
    }

    impl MessageSink for Recorder {
        fn on_process_message(&self, _b: &Arc<dyn BrowserHost>, source: ProcessId, frame: &[u8]) -> bool {
            assert_eq!(source, ProcessId::Script);
            if let Ok(cmd) = BrowserCommand::decode(frame) {
                self.commands.lock().push(cmd);
            }
            true
        }
    }

    fn started(url: &str) -> (SoftwareEngine, Arc<Recorder>) {
        let engine = SoftwareEngine::new();
        let settings = EngineSettings {
            frame_rate: 1000,
            ..Default::default()
        };
        engine.initialize(&settings).unwrap();
        let rec = Arc::new(Recorder::default());
        engine.create_browser(BrowserClient::from_handler(rec.clone()), url).unwrap();
        (engine, rec)
    }

    fn pump_until(engine: &SoftwareEngine, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() && Instant::now() < deadline {
            engine.do_message_loop_work();
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn create_requires_initialize() {
        let engine = SoftwareEngine::new();
        let rec = Arc::new(Recorder::default());
        let err = engine.create_browser(BrowserClient::from_handler(rec), "about:blank");
        assert!(matches!(err, Err(Error::NotInitialized)));
    }

    #[test]
    fn about_blank_attaches_then_paints_white() {
        let (engine, rec) = started("about:blank");
        assert!(rec.host.lock().is_none());
        engine.do_message_loop_work();
        assert!(rec.host.lock().is_some());
        assert_eq!(*rec.loads.lock(), vec![200]);
        assert_eq!(*rec.addresses.lock(), vec!["about:blank".to_string()]);
        let frames = rec.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 64 * 48 * 4);
        assert!(frames[0].iter().all(|b| *b == 255));
    }

    #[test]
    fn inline_scripts_post_commands() {
        let html = "<p>hi</p><script>webcell_post_url_change('https://example.com')</script>";
        let url = format!("data:text/html;base64,{}", base64::engine::general_purpose::STANDARD.encode(html));
        let (engine, rec) = started(&url);
        pump_until(&engine, || !rec.commands.lock().is_empty());
        assert_eq!(
            *rec.commands.lock(),
            vec![BrowserCommand::NavSetUrl("https://example.com".into())]
        );
    }

    #[test]
    fn missing_files_report_file_not_found() {
        let (engine, rec) = started("file:///definitely/not/here.html");
        pump_until(&engine, || !rec.errors.lock().is_empty());
        assert_eq!(rec.errors.lock()[0].0, LoadErrorCode::FileNotFound);
        assert!(rec.loads.lock().is_empty());
    }

    #[test]
    fn newer_navigations_supersede_pending_fetches() {
        let pending = "file:///definitely/not/here.html";
        let (engine, rec) = started(pending);
        engine.do_message_loop_work();
        let host = rec.host.lock().clone().unwrap();
        assert!(rec.loads.lock().is_empty());

        host.load_url("about:blank");
        engine.do_message_loop_work();
        assert_eq!(*rec.errors.lock(), vec![(LoadErrorCode::Aborted, pending.to_string())]);
        assert_eq!(*rec.loads.lock(), vec![200]);

        // The abandoned fetch never reports.
        for _ in 0..20 {
            engine.do_message_loop_work();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rec.errors.lock().len(), 1);
        assert_eq!(engine.browsers()[0].current_url(), "about:blank");
    }

    #[test]
    fn javascript_links_run_in_the_page() {
        let html = r#"<a href="javascript:webcell_post_nav_refresh()">reload</a><a href="/elsewhere">x</a>"#;
        let url = format!("data:text/html;base64,{}", base64::engine::general_purpose::STANDARD.encode(html));
        let (engine, rec) = started(&url);
        engine.do_message_loop_work();
        let host = rec.host.lock().clone().unwrap();

        let at = MouseEvent { x: 10, y: 10, modifiers: 0 };
        host.send_mouse_click(at, MouseButton::Left, false, 1);
        host.send_mouse_click(at, MouseButton::Left, true, 1);
        pump_until(&engine, || !rec.commands.lock().is_empty());
        assert_eq!(*rec.commands.lock(), vec![BrowserCommand::NavRefresh]);
        assert_eq!(engine.browsers()[0].current_url(), url);
    }

    #[test]
    fn history_and_scrolling() {
        let long: String = (0..80).map(|i| format!("<p>line {}</p>", i)).collect();
        let first = format!("data:text/html,{}", long);
        let (engine, rec) = started(&first);
        engine.do_message_loop_work();
        let host = rec.host.lock().clone().unwrap();

        host.send_mouse_wheel(MouseEvent::default(), 0, -45);
        engine.do_message_loop_work();
        let browser = engine.browsers()[0].clone();
        assert_eq!(browser.scroll_y(), 45);
        host.send_mouse_wheel(MouseEvent::default(), 0, 1000);
        engine.do_message_loop_work();
        assert_eq!(browser.scroll_y(), 0);

        host.load_url("about:blank");
        engine.do_message_loop_work();
        host.go_back();
        engine.do_message_loop_work();
        assert_eq!(browser.current_url(), first);
        host.go_forward();
        engine.do_message_loop_work();
        assert_eq!(browser.current_url(), "about:blank");
        assert_eq!(rec.loads.lock().len(), 4);
    }

    #[test]
    fn delayed_tasks_run_on_tick() {
        let engine = SoftwareEngine::new();
        let hit = Arc::new(AtomicBool::new(false));
        let h = hit.clone();
        engine.post_delayed_task(Duration::ZERO, Box::new(move || h.store(true, Ordering::SeqCst)));
        engine.initialize(&EngineSettings::default()).unwrap();
        engine.do_message_loop_work();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn close_stops_the_browser() {
        let (engine, rec) = started("about:blank");
        engine.do_message_loop_work();
        let host = rec.host.lock().clone().unwrap();
        engine.shutdown();
        host.load_url("about:blank");
        engine.do_message_loop_work();
        assert_eq!(rec.loads.lock().len(), 1);
        assert!(engine.browsers().is_empty());
    }

    #[test]
    fn url_helpers() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com/");
        assert_eq!(normalize_url("about:blank").unwrap(), "about:blank");
        assert!(normalize_url("   ").is_err());
        assert_eq!(decode_data_url("data:text/html,%3Cp%3Ehi").unwrap(), "<p>hi");
        assert_eq!(decode_data_url("data:text/html;base64,aGk=").unwrap(), "hi");
        assert_eq!(resolve_href("https://a.example/x/y", "../z"), "https://a.example/z");
        assert_eq!(decode_data_url("data:,100%").unwrap(), "100%");
        assert_eq!(
            javascript_href("javascript:webcell_post_url_change(%22a%20b%22)").as_deref(),
            Some("webcell_post_url_change(\"a b\")")
        );
        assert_eq!(javascript_href("/next"), None);
        assert_eq!(javascript_href("https://a.example/"), None);
    }
}
