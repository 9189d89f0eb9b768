//! Process state behind the C boundary: the engine, the session registry and
//! the last error message.
//!
//! Every method clones what it needs out of the registry before calling into
//! the engine. Engine callbacks run inside `tick` and may lock the registry
//! again (navigation commands do), so no engine call is ever made with the
//! registry lock held.

use crate::engine::{BrowserClient, BrowserEngine};
use crate::protocol::Navigator;
use crate::registry::{ActiveSessionNavigator, SessionRegistry};
use crate::surface::SurfaceBuffer;
use crate::view::ViewDeps;
use crate::{Error, Result, SessionConfig};
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Arc;

/// URL the content view starts on
pub const CONTENT_START_URL: &str = "about:blank";

pub struct Context {
    config: SessionConfig,
    engine: Arc<dyn BrowserEngine>,
    engine_started: Mutex<bool>,
    registry: Arc<Mutex<SessionRegistry>>,
    navigator: Arc<dyn Navigator>,
    last_error: Mutex<CString>,
}

impl Context {
    /// Build a context around an engine that has not been initialized yet.
    /// The engine starts with the first session.
    pub fn new(config: SessionConfig, engine: Arc<dyn BrowserEngine>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Mutex::new(SessionRegistry::new(config.max_sessions)));
        let navigator: Arc<dyn Navigator> = Arc::new(ActiveSessionNavigator::new(&registry));
        Ok(Self {
            config,
            engine,
            engine_started: Mutex::new(false),
            registry,
            navigator,
            last_error: Mutex::new(CString::default()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn BrowserEngine> {
        &self.engine
    }

    pub fn engine_started(&self) -> bool {
        *self.engine_started.lock()
    }

    pub fn session_count(&self) -> usize {
        self.registry.lock().len()
    }

    fn start_engine(&self) -> Result<()> {
        let mut started = self.engine_started.lock();
        if *started {
            return Ok(());
        }
        let mut settings = self.config.engine.clone();
        settings.cache_path = absolute_cache_path(&settings.cache_path)?;
        std::fs::create_dir_all(&settings.cache_path)?;
        log::debug!("starting engine, cache at {}", settings.cache_path.display());
        self.engine.initialize(&settings)?;
        *started = true;
        Ok(())
    }

    /// Open a session and request both of its browsers. The handles attach
    /// on a later tick.
    pub fn create_session(&self) -> Result<i32> {
        self.start_engine()?;
        let deps = ViewDeps {
            engine: Arc::downgrade(&self.engine),
            navigator: self.navigator.clone(),
            load_notify_delay: self.config.load_notify_delay(),
        };
        let (handle, compositor) = self.registry.lock().create_session(&self.config, deps)?;

        let navbar_url = self.config.navbar_url();
        let requested = self
            .engine
            .create_browser(BrowserClient::from_handler(compositor.navbar().clone()), &navbar_url)
            .and_then(|_| {
                self.engine
                    .create_browser(BrowserClient::from_handler(compositor.content().clone()), CONTENT_START_URL)
            });
        if let Err(e) = requested {
            let removed = self.registry.lock().destroy_session(handle);
            if let Ok(compositor) = removed {
                compositor.shutdown();
            }
            return Err(e);
        }
        Ok(handle)
    }

    pub fn free_session(&self, handle: i32) -> Result<()> {
        let compositor = self.registry.lock().destroy_session(handle)?;
        compositor.shutdown();
        Ok(())
    }

    /// Run one round of engine work. Every callback happens in here.
    pub fn tick(&self) {
        if self.engine_started() {
            self.engine.do_message_loop_work();
        }
    }

    /// Ticks once, then reports whether the content browser is attached
    pub fn is_ready(&self, handle: i32) -> Result<bool> {
        self.tick();
        let compositor = self.registry.lock().lookup(handle)?;
        Ok(compositor.content().is_attached())
    }

    pub fn set_url(&self, handle: i32, url: &str) -> Result<()> {
        let compositor = self.registry.lock().lookup(handle)?;
        compositor.content().set_url(url)
    }

    pub fn viewport_width(&self, handle: i32) -> Result<u32> {
        self.with_composite(handle, false, |s| s.width())
    }

    pub fn viewport_height(&self, handle: i32) -> Result<u32> {
        self.with_composite(handle, false, |s| s.height())
    }

    /// Re-composite and return the RGBA pixels. The pointer stays valid until
    /// the session is freed.
    pub fn viewport_rgba(&self, handle: i32) -> Result<*const u8> {
        self.with_composite(handle, true, |s| s.as_ptr())?
            .ok_or_else(|| Error::NotReady("composite buffer is not allocated".into()))
    }

    /// Copy of the current composite frame
    pub fn snapshot_rgba(&self, handle: i32) -> Result<Vec<u8>> {
        self.with_composite(handle, true, |s| s.read(|p| p.to_vec()))?
            .ok_or_else(|| Error::NotReady("composite buffer holds no frame".into()))
    }

    fn with_composite<R>(&self, handle: i32, render: bool, f: impl FnOnce(&SurfaceBuffer) -> R) -> Result<R> {
        let compositor = self.registry.lock().lookup(handle)?;
        let surface = compositor.composite(render)?;
        Ok(f(surface))
    }

    pub fn mouse_move(&self, handle: i32, x: i32, y: i32) -> Result<()> {
        let compositor = self.registry.lock().lookup(handle)?;
        compositor.pass_mouse_move(x, y);
        Ok(())
    }

    pub fn mouse_set_state(&self, handle: i32, index: i32, down: bool) -> Result<()> {
        let compositor = self.registry.lock().lookup(handle)?;
        compositor.pass_mouse_state(index, down);
        Ok(())
    }

    /// `delta` is in wheel notches and may be fractional
    pub fn mouse_scroll(&self, handle: i32, delta: f32) -> Result<()> {
        let compositor = self.registry.lock().lookup(handle)?;
        compositor.pass_mouse_scroll(delta);
        Ok(())
    }

    /// Store `err` as the message `last_error` reports
    pub fn record_error(&self, err: &Error) {
        log::debug!("boundary call failed: {}", err);
        *self.last_error.lock() = to_c_string(&err.to_string());
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().to_string_lossy().into_owned()
    }

    /// Pointer to the NUL-terminated last error. Valid until the next error
    /// is recorded or the context is dropped.
    pub fn last_error_ptr(&self) -> *const c_char {
        self.last_error.lock().as_ptr()
    }

    /// Close every session and stop the engine. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let sessions = self.registry.lock().drain();
        for compositor in sessions {
            compositor.shutdown();
        }
        let mut started = self.engine_started.lock();
        if *started {
            log::debug!("stopping engine");
            self.engine.shutdown();
            *started = false;
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn absolute_cache_path(path: &std::path::Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// C string of `s`, with interior NULs replaced
pub(crate) fn to_c_string(s: &str) -> CString {
    CString::new(s.replace('\0', " ")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::recording::{HostCall, RecordingEngine};
    use crate::protocol::{BrowserCommand, ScriptCommand};
    use crate::Viewport;
    use tempfile::TempDir;

    fn context() -> (Arc<RecordingEngine>, Context, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::new();
        let mut config = SessionConfig {
            viewport: Viewport { width: 8, height: 6 },
            navbar_height: 2,
            navbar_url: Some("about:navbar".into()),
            ..Default::default()
        };
        config.engine.cache_path = dir.path().join("cache");
        let ctx = Context::new(config, engine.clone()).unwrap();
        (engine, ctx, dir)
    }

    #[test]
    fn engine_starts_with_the_first_session() {
        let (engine, ctx, dir) = context();
        assert!(!engine.is_initialized());
        ctx.tick();
        assert_eq!(engine.ticks(), 0);

        let handle = ctx.create_session().unwrap();
        assert_eq!(handle, 0);
        assert!(engine.is_initialized());
        assert!(dir.path().join("cache").is_dir());
        assert!(engine.settings().unwrap().cache_path.is_absolute());
    }

    #[test]
    fn ready_after_the_content_handle_attaches() {
        let (engine, ctx, _dir) = context();
        let handle = ctx.create_session().unwrap();
        assert!(matches!(ctx.set_url(handle, "https://example.com"), Err(Error::NotReady(_))));
        assert!(ctx.is_ready(handle).unwrap());
        assert!(engine.browser_for_url("about:navbar").is_some());
        let content = engine.browser_for_url(CONTENT_START_URL).unwrap();

        ctx.set_url(handle, "https://example.com").unwrap();
        assert_eq!(content.host.calls(), vec![HostCall::LoadUrl("https://example.com".into())]);
    }

    #[test]
    fn second_session_is_rejected() {
        let (_engine, ctx, _dir) = context();
        ctx.create_session().unwrap();
        let err = ctx.create_session().unwrap_err();
        assert!(matches!(err, Error::SessionLimit(_)));
        assert_eq!(ctx.session_count(), 1);
        ctx.free_session(0).unwrap();
        assert_eq!(ctx.create_session().unwrap(), 0);
    }

    #[test]
    fn viewport_queries_before_first_paint() {
        let (_engine, ctx, _dir) = context();
        let handle = ctx.create_session().unwrap();
        assert_eq!(ctx.viewport_width(handle).unwrap(), 8);
        assert_eq!(ctx.viewport_height(handle).unwrap(), 6);
        assert!(matches!(ctx.viewport_rgba(handle), Err(Error::NotReady(_))));
        assert!(matches!(ctx.viewport_width(3), Err(Error::UnknownHandle(3))));
    }

    #[test]
    fn composite_after_both_views_paint() {
        let (engine, ctx, _dir) = context();
        let handle = ctx.create_session().unwrap();
        ctx.tick();
        engine.browser_for_url("about:navbar").unwrap().paint_solid([0, 0, 255, 255]);
        engine.browser_for_url(CONTENT_START_URL).unwrap().paint_solid([255, 0, 0, 255]);

        assert!(!ctx.viewport_rgba(handle).unwrap().is_null());
        let frame = ctx.snapshot_rgba(handle).unwrap();
        assert_eq!(frame.len(), 8 * 6 * 4);
        assert_eq!(&frame[..4], &[255, 0, 0, 255]);
        assert_eq!(&frame[2 * 8 * 4..2 * 8 * 4 + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn script_commands_drive_the_content_view() {
        let (engine, ctx, _dir) = context();
        ctx.create_session().unwrap();
        ctx.tick();
        let navbar = engine.browser_for_url("about:navbar").unwrap();
        let content = engine.browser_for_url(CONTENT_START_URL).unwrap();

        assert!(navbar.deliver_from_script(&BrowserCommand::NavSetUrl("https://example.com".into()).encode()));
        assert!(navbar.deliver_from_script(&BrowserCommand::UnrecoverableError("boom".into()).encode()));
        assert_eq!(content.host.calls(), vec![HostCall::LoadUrl("https://example.com".into())]);
    }

    #[test]
    fn load_end_posts_site_loaded_after_delay() {
        let (engine, ctx, _dir) = context();
        ctx.create_session().unwrap();
        ctx.tick();
        let content = engine.browser_for_url(CONTENT_START_URL).unwrap();
        content.client.navigation.on_load_end(&content.host_dyn(), 200);
        assert_eq!(engine.pending_delays(), vec![ctx.config().load_notify_delay()]);
        engine.fire_delayed_tasks();
        assert_eq!(content.host.script_commands(), vec![ScriptCommand::SiteLoaded]);
    }

    #[test]
    fn errors_are_recorded_as_c_strings() {
        let (_engine, ctx, _dir) = context();
        assert_eq!(ctx.last_error(), "");
        ctx.record_error(&Error::UnknownHandle(9));
        assert_eq!(ctx.last_error(), "Session 9 not found");
        ctx.record_error(&Error::Other("a\0b".into()));
        assert!(ctx.last_error().ends_with("a b"));
    }

    #[test]
    fn shutdown_closes_sessions_and_engine() {
        let (engine, ctx, _dir) = context();
        ctx.create_session().unwrap();
        ctx.tick();
        let content = engine.browser_for_url(CONTENT_START_URL).unwrap();
        ctx.shutdown();
        ctx.shutdown();
        assert!(engine.is_shut_down());
        assert_eq!(ctx.session_count(), 0);
        assert_eq!(content.host.calls().first(), Some(&HostCall::Close));
    }
}
