//! One offscreen sub-view (navbar or content) and its engine callbacks.
//!
//! A `ViewSession` is the client the engine talks to for one browser: it
//! receives painted frames into its `SurfaceBuffer`, gets its engine handle
//! attached asynchronously, follows navigation events and receives command
//! frames from the script side.

use crate::engine::{
    BrowserEngine, BrowserHost, LoadErrorCode, MessageSink, NavigationObserver, PaintElementType, PaintSink,
    ProcessId,
};
use crate::protocol::{self, Navigator, ScriptCommand};
use crate::surface::{PixelFormat, SurfaceBuffer};
use crate::{Error, Result};
use base64::Engine as _;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Which half of the composite a view renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Navbar,
    Content,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::Navbar => f.write_str("navbar"),
            ViewKind::Content => f.write_str("content"),
        }
    }
}

type AddressChangeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Collaborators every view of a session shares
#[derive(Clone)]
pub struct ViewDeps {
    /// Scheduler for the delayed "site loaded" notification
    pub engine: Weak<dyn BrowserEngine>,
    /// Target of navigation commands arriving from the script side
    pub navigator: Arc<dyn Navigator>,
    /// Grace period between load end and the `SITE_LOADED` notification
    pub load_notify_delay: Duration,
}

pub struct ViewSession {
    kind: ViewKind,
    width: u32,
    height: u32,
    surface: SurfaceBuffer,
    browser: Mutex<Option<Arc<dyn BrowserHost>>>,
    on_address_change: Mutex<Option<AddressChangeCallback>>,
    frames: AtomicU64,
    // Set once by `shutdown`; a closed view never takes a browser or a frame again.
    closed: AtomicBool,
    deps: ViewDeps,
    me: Weak<ViewSession>,
}

impl ViewSession {
    pub fn new(kind: ViewKind, width: u32, height: u32, deps: ViewDeps) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            kind,
            width,
            height,
            surface: SurfaceBuffer::new(width, height, PixelFormat::Bgra8888),
            browser: Mutex::new(None),
            on_address_change: Mutex::new(None),
            frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            deps,
            me: me.clone(),
        })
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn surface(&self) -> &SurfaceBuffer {
        &self.surface
    }

    /// The engine handle, once the engine has attached one
    pub fn browser(&self) -> Option<Arc<dyn BrowserHost>> {
        self.browser.lock().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.browser.lock().is_some()
    }

    /// Frames received through the paint callback
    pub fn frames_painted(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn set_address_change_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_address_change.lock() = Some(Arc::new(callback));
    }

    /// Navigate the main frame
    pub fn set_url(&self, url: &str) -> Result<()> {
        let browser = self
            .browser()
            .ok_or_else(|| Error::NotReady("Browser is not yet set".into()))?;
        browser.load_url(url);
        Ok(())
    }

    /// Ask the script side to evaluate `code`. Dropped when no handle is attached.
    pub fn call_javascript(&self, code: &str) {
        match self.browser() {
            Some(browser) => {
                browser.send_process_message(ProcessId::Script, ScriptCommand::EvalJavascript(code.to_string()).encode())
            }
            None => log::debug!("{} view: dropping script call, browser not attached", self.kind),
        }
    }

    fn trigger_site_loaded(&self, browser: &Arc<dyn BrowserHost>) {
        browser.send_process_message(ProcessId::Script, ScriptCommand::SiteLoaded.encode());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Detach and close the engine handle, then free the pixel buffer. A
    /// handle that attaches later is closed on arrival.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let browser = self.browser.lock().take();
        if let Some(browser) = browser {
            log::debug!("{} view: closing browser {}", self.kind, browser.id());
            browser.close();
        }
        self.on_address_change.lock().take();
        self.surface.release();
    }
}

impl PaintSink for ViewSession {
    fn view_rect(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn on_paint(&self, kind: PaintElementType, buffer: &[u8], width: u32, height: u32) {
        if kind != PaintElementType::View || self.is_closed() {
            return;
        }
        self.surface.ensure();
        if let Err(e) = self.surface.write(buffer) {
            log::error!("{} view: dropped {}x{} frame: {}", self.kind, width, height, e);
            return;
        }
        let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        log::trace!("{} view: frame {} presented", self.kind, n);
    }
}

impl NavigationObserver for ViewSession {
    fn on_after_created(&self, browser: Arc<dyn BrowserHost>) {
        {
            let mut slot = self.browser.lock();
            if !self.is_closed() {
                log::debug!("{} view: browser {} attached", self.kind, browser.id());
                *slot = Some(browser);
                return;
            }
        }
        log::debug!("{} view: closing browser {} created after shutdown", self.kind, browser.id());
        browser.close();
    }

    fn on_address_change(&self, _browser: &Arc<dyn BrowserHost>, url: &str) {
        log::info!("{} view: address changed to {}", self.kind, url);
        // Clone out so the callback runs without the lock held.
        let callback = self.on_address_change.lock().clone();
        if let Some(callback) = callback {
            callback(url);
        }
    }

    fn on_load_end(&self, browser: &Arc<dyn BrowserHost>, http_status: i32) {
        log::info!("{} view: load ended, status code {}", self.kind, http_status);
        let Some(engine) = self.deps.engine.upgrade() else {
            return;
        };
        let view = self.me.clone();
        let browser = browser.clone();
        engine.post_delayed_task(
            self.deps.load_notify_delay,
            Box::new(move || {
                if let Some(view) = view.upgrade() {
                    view.trigger_site_loaded(&browser);
                }
            }),
        );
    }

    fn on_load_error(&self, browser: &Arc<dyn BrowserHost>, code: LoadErrorCode, error_text: &str, failed_url: &str) {
        if code == LoadErrorCode::Aborted {
            return;
        }
        log::warn!("{} view: failed to load {}: {}", self.kind, failed_url, error_text);
        browser.load_url(&error_page_uri(failed_url, error_text));
    }

    fn on_console_message(&self, level: log::Level, message: &str, source: &str, line: u32) -> bool {
        log::log!(level, "Console message ({}:{}): {}", source, line, message);
        false
    }

    fn on_before_popup(&self, target_url: &str) -> bool {
        if !target_url.is_empty() {
            if let Err(e) = self.set_url(target_url) {
                log::debug!("{} view: popup redirect dropped: {}", self.kind, e);
            }
        }
        // Popups never open; their target loads in place instead.
        true
    }
}

impl MessageSink for ViewSession {
    fn on_process_message(&self, _browser: &Arc<dyn BrowserHost>, source: ProcessId, frame: &[u8]) -> bool {
        if source != ProcessId::Script {
            log::warn!("{} view: ignoring frame from {:?}", self.kind, source);
            return false;
        }
        match protocol::handle_browser_frame(frame, self.deps.navigator.as_ref()) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("{} view: malformed command frame: {}", self.kind, e);
                false
            }
        }
    }
}

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Webpage load error</title>
    <style>
      body { font-family: system-ui; background-color: #333; display: flex; justify-content: center; align-items: center; flex-direction: column; }
      h2 { color: #CCC; }
      h3 { color: #AAA; }
      h4 { color: #888; }
    </style>
  </head>
  <body>
    <h2>Load Error</h2>
    <p>{content}</p>
    <p>{error}</p>
  </body>
</html>
"#;

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// `data:` URI of the page shown in place of a failed load
pub fn error_page_uri(failed_url: &str, error_text: &str) -> String {
    let html = ERROR_PAGE
        .replace("{content}", &format!("Failed to load URL {}", escape_html(failed_url)))
        .replace("{error}", &format!("Error: {}", escape_html(error_text)));
    format!(
        "data:text/html;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(html)
    )
}
