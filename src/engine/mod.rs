//! Interfaces to the embedded browser engine.
//!
//! The engine is a black box reached through a handful of capability traits:
//! `BrowserEngine` is the process-wide runtime, `BrowserHost` is the handle of
//! one browser instance, and the callback roles (`PaintSink`,
//! `NavigationObserver`, `MessageSink`) are the pieces a `BrowserClient`
//! hands to the engine. One component may implement several roles.
//!
//! Two implementations ship with the crate: `recording`, an in-memory engine
//! that records every call (tests, benches, host integration tests), and
//! `software`, a pure-Rust engine that fetches, lays out and rasterizes pages.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod recording;

#[cfg(feature = "software")]
pub mod script;

#[cfg(feature = "software")]
pub mod software;

/// Identifier the engine assigns to each browser
pub type BrowserId = u32;

/// Work scheduled to run later on the pump thread
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Modifier flag carried by click events (the engine's "left button" flag)
pub const EVENTFLAG_LEFT_MOUSE_BUTTON: u32 = 1 << 4;

/// Mouse buttons understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Map a host button index. 1 is middle, 2 is right, anything else left.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => MouseButton::Middle,
            2 => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }
}

/// A pointer event in the coordinate space of one browser
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseEvent {
    pub x: i32,
    pub y: i32,
    pub modifiers: u32,
}

/// The two sides of the command bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessId {
    /// Side owning the browser objects
    Browser,
    /// Side owning the script context
    Script,
}

/// What a paint callback is drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintElementType {
    View,
    Popup,
}

/// Reasons a navigation can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorCode {
    /// The load was cancelled by a newer navigation; never shown to the user
    Aborted,
    InvalidUrl,
    UnknownUrlScheme,
    FileNotFound,
    NameNotResolved,
    ConnectionFailed,
    TimedOut,
    Failed,
}

/// Runtime settings handed to `BrowserEngine::initialize`
///
/// Defaults are conservative: windowless rendering at 30 frames per second, a
/// cache directory next to the working directory, and script workers on
/// threads with the same runtime limits the scripting backend uses elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Cache directory; relative paths resolve against the working directory
    pub cache_path: PathBuf,
    /// User agent string to send with requests
    pub user_agent: String,
    /// Timeout for page loads in milliseconds
    pub timeout_ms: u64,
    /// Frame rate of windowless rendering
    pub frame_rate: u32,
    /// Run script contexts in a child process instead of a thread
    pub use_process_worker: bool,
    /// Executable started with `--script-worker` when `use_process_worker` is set
    pub script_worker_path: Option<PathBuf>,
    /// Maximum loop iterations before a script is aborted (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum recursion depth before a script is aborted
    pub script_recursion_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("./webcell_cache"),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) webcell/0.1".to_string(),
            timeout_ms: 30000,
            frame_rate: 30,
            use_process_worker: false,
            script_worker_path: None,
            script_loop_iteration_limit: 1000000,
            script_recursion_limit: 1024,
        }
    }
}

/// The engine handle of one browser instance
pub trait BrowserHost: Send + Sync {
    fn id(&self) -> BrowserId;

    /// Navigate the main frame
    fn load_url(&self, url: &str);

    fn go_back(&self);

    fn go_forward(&self);

    fn reload(&self);

    fn send_mouse_move(&self, event: MouseEvent, mouse_leave: bool);

    /// `mouse_up` is true for a release, false for a press
    fn send_mouse_click(&self, event: MouseEvent, button: MouseButton, mouse_up: bool, click_count: u32);

    fn send_mouse_wheel(&self, event: MouseEvent, delta_x: i32, delta_y: i32);

    /// Fire-and-forget delivery of an encoded command frame to the other side.
    /// Frames arrive in order per direction; there is no acknowledgment.
    fn send_process_message(&self, target: ProcessId, frame: Vec<u8>);

    /// Close the browser. The engine drops its client afterwards.
    fn close(&self);
}

/// Receives raw frames from the engine's paint callback
pub trait PaintSink: Send + Sync {
    /// Size of the offscreen view the engine should render
    fn view_rect(&self) -> (u32, u32);

    /// `buffer` is `width * height` pixels in `PixelFormat::Bgra8888`
    fn on_paint(&self, kind: PaintElementType, buffer: &[u8], width: u32, height: u32);
}

/// Lifecycle and navigation callbacks of one browser
pub trait NavigationObserver: Send + Sync {
    /// The engine handle is ready. Called once per browser.
    fn on_after_created(&self, browser: Arc<dyn BrowserHost>);

    fn on_address_change(&self, browser: &Arc<dyn BrowserHost>, url: &str);

    fn on_load_end(&self, browser: &Arc<dyn BrowserHost>, http_status: i32);

    fn on_load_error(&self, browser: &Arc<dyn BrowserHost>, code: LoadErrorCode, error_text: &str, failed_url: &str);

    /// Return true to suppress the engine's default console output
    fn on_console_message(&self, level: log::Level, message: &str, source: &str, line: u32) -> bool;

    /// Return true to cancel the popup
    fn on_before_popup(&self, target_url: &str) -> bool;
}

/// Receives command frames sent from the other side of the bus
pub trait MessageSink: Send + Sync {
    /// Return true when the frame was handled
    fn on_process_message(&self, browser: &Arc<dyn BrowserHost>, source: ProcessId, frame: &[u8]) -> bool;
}

/// The callback roles handed to the engine when a browser is created
#[derive(Clone)]
pub struct BrowserClient {
    pub paint: Arc<dyn PaintSink>,
    pub navigation: Arc<dyn NavigationObserver>,
    pub messages: Arc<dyn MessageSink>,
}

impl BrowserClient {
    /// Build a client from one component implementing every role
    pub fn from_handler<H>(handler: Arc<H>) -> Self
    where
        H: PaintSink + NavigationObserver + MessageSink + 'static,
    {
        Self {
            paint: handler.clone(),
            navigation: handler.clone(),
            messages: handler,
        }
    }
}

/// The process-wide engine runtime
///
/// All callbacks are delivered synchronously from within
/// `do_message_loop_work`, on the thread that calls it.
pub trait BrowserEngine: Send + Sync {
    /// Start the runtime. Called at most once per engine instance.
    fn initialize(&self, settings: &EngineSettings) -> Result<()>;

    /// Request a windowless browser. The handle arrives later through
    /// `NavigationObserver::on_after_created`.
    fn create_browser(&self, client: BrowserClient, url: &str) -> Result<()>;

    /// Run pending engine work once. Never blocks waiting for work.
    fn do_message_loop_work(&self);

    /// Run `task` on the pump thread once `delay` has elapsed
    fn post_delayed_task(&self, delay: Duration, task: DeferredTask);

    /// Close every browser and stop the runtime
    fn shutdown(&self);
}
