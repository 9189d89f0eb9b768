//! C ABI for overlay hosts.
//!
//! Every entry point returns a sentinel on failure (`-1` or null) and stores
//! the message for `webcell_get_error`. Panics are caught here and never
//! unwind into the host.

use crate::engine::BrowserEngine;
use crate::{Context, Error, Result, SessionConfig};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

static CONTEXT: Mutex<Option<Arc<Context>>> = parking_lot::const_mutex(None);

// Errors raised while no context exists (failed init, calls after free).
static ORPHAN_ERROR: Mutex<Option<CString>> = parking_lot::const_mutex(None);

const NOT_INITIALIZED: &[u8] = b"webcell is not initialized\0";

fn current() -> Option<Arc<Context>> {
    CONTEXT.lock().clone()
}

fn record_orphan(err: &Error) {
    log::debug!("boundary call failed: {}", err);
    *ORPHAN_ERROR.lock() = Some(crate::context::to_c_string(&err.to_string()));
}

/// Run `f` against the live context, mapping errors and panics to `fail`
fn with_context<T: Copy>(name: &str, fail: T, f: impl FnOnce(&Context) -> Result<T>) -> T {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let Some(ctx) = current() else {
            record_orphan(&Error::NotInitialized);
            return fail;
        };
        match f(&ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.record_error(&e);
                fail
            }
        }
    }));
    match result {
        Ok(v) => v,
        Err(_) => {
            log::error!("panic in {}", name);
            fail
        }
    }
}

/// Borrow a C string argument as UTF-8
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(p: *const c_char, what: &str) -> Result<&'a str> {
    if p.is_null() {
        return Err(Error::PreconditionError(format!("{} is null", what)));
    }
    CStr::from_ptr(p)
        .to_str()
        .map_err(|e| Error::PreconditionError(format!("{} is not UTF-8: {}", what, e)))
}

#[cfg(feature = "software")]
fn default_engine() -> Result<Arc<dyn BrowserEngine>> {
    Ok(Arc::new(crate::engine::software::SoftwareEngine::new()))
}

#[cfg(not(feature = "software"))]
fn default_engine() -> Result<Arc<dyn BrowserEngine>> {
    Err(Error::InitializationError("no browser engine compiled in".into()))
}

/// Install a context backed by `engine`. Fails if one is already installed.
///
/// The C entry points use the built-in engine; embedders and tests with their
/// own engine call this instead of `webcell_init`.
pub fn init_with_engine(config: SessionConfig, engine: Arc<dyn BrowserEngine>) -> Result<()> {
    let mut slot = CONTEXT.lock();
    if slot.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    *slot = Some(Arc::new(Context::new(config, engine)?));
    log::debug!("webcell initialized");
    Ok(())
}

fn init_from(config: Result<SessionConfig>) -> c_int {
    let result = panic::catch_unwind(AssertUnwindSafe(move || {
        config.and_then(|c| init_with_engine(c, default_engine()?))
    }));
    match result {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            // An already-installed context keeps its own error slot.
            match current() {
                Some(ctx) => ctx.record_error(&e),
                None => record_orphan(&e),
            }
            -1
        }
        Err(_) => {
            log::error!("panic in webcell_init");
            -1
        }
    }
}

/// Initialize with the default configuration. Returns 0, or -1 when already
/// initialized.
#[no_mangle]
pub extern "C" fn webcell_init() -> c_int {
    init_from(Ok(SessionConfig::default()))
}

/// Initialize from a JSON `SessionConfig`; missing fields keep their defaults.
///
/// # Safety
/// `json` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn webcell_init_with_config(json: *const c_char) -> c_int {
    init_from(str_arg(json, "config").and_then(SessionConfig::from_json))
}

/// Tear down every session and the engine. Always returns 0.
#[no_mangle]
pub extern "C" fn webcell_free() -> c_int {
    let taken = CONTEXT.lock().take();
    if let Some(ctx) = taken {
        if panic::catch_unwind(AssertUnwindSafe(|| ctx.shutdown())).is_err() {
            log::error!("panic in webcell_free");
        }
    }
    0
}

#[no_mangle]
pub extern "C" fn webcell_create_session() -> c_int {
    with_context("webcell_create_session", -1, |ctx| ctx.create_session())
}

#[no_mangle]
pub extern "C" fn webcell_free_session(handle: c_int) -> c_int {
    with_context("webcell_free_session", -1, |ctx| ctx.free_session(handle).map(|_| 0))
}

/// Pump the engine once. All engine callbacks run inside this call.
#[no_mangle]
pub extern "C" fn webcell_tick() {
    with_context("webcell_tick", (), |ctx| {
        ctx.tick();
        Ok(())
    })
}

/// Ticks once, then returns 1 when the content browser is attached
#[no_mangle]
pub extern "C" fn webcell_is_ready(handle: c_int) -> c_int {
    with_context("webcell_is_ready", -1, |ctx| ctx.is_ready(handle).map(c_int::from))
}

/// # Safety
/// `url` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn webcell_set_url(handle: c_int, url: *const c_char) -> c_int {
    with_context("webcell_set_url", -1, |ctx| {
        let url = str_arg(url, "url")?;
        ctx.set_url(handle, url).map(|_| 0)
    })
}

#[no_mangle]
pub extern "C" fn webcell_get_viewport_width(handle: c_int) -> c_int {
    with_context("webcell_get_viewport_width", -1, |ctx| {
        ctx.viewport_width(handle).map(|w| w as c_int)
    })
}

#[no_mangle]
pub extern "C" fn webcell_get_viewport_height(handle: c_int) -> c_int {
    with_context("webcell_get_viewport_height", -1, |ctx| {
        ctx.viewport_height(handle).map(|h| h as c_int)
    })
}

/// Re-composite and return `width * height * 4` bytes of RGBA8888, or null.
/// The pointer is valid until the session is freed.
#[no_mangle]
pub extern "C" fn webcell_get_viewport_data_rgba(handle: c_int) -> *const u8 {
    with_context("webcell_get_viewport_data_rgba", ptr::null(), |ctx| ctx.viewport_rgba(handle))
}

#[no_mangle]
pub extern "C" fn webcell_mouse_move(handle: c_int, x: c_int, y: c_int) -> c_int {
    with_context("webcell_mouse_move", -1, |ctx| ctx.mouse_move(handle, x, y).map(|_| 0))
}

/// Button `index` 0, 1, 2 is left, middle, right. `down` is 1 for a press;
/// any other value is a release.
#[no_mangle]
pub extern "C" fn webcell_mouse_set_state(handle: c_int, index: c_int, down: c_int) -> c_int {
    with_context("webcell_mouse_set_state", -1, |ctx| {
        ctx.mouse_set_state(handle, index, down == 1).map(|_| 0)
    })
}

#[no_mangle]
pub extern "C" fn webcell_mouse_scroll(handle: c_int, delta: f32) -> c_int {
    with_context("webcell_mouse_scroll", -1, |ctx| ctx.mouse_scroll(handle, delta).map(|_| 0))
}

/// Message of the last failed call. Never null; the string stays valid until
/// the next failure.
#[no_mangle]
pub extern "C" fn webcell_get_error() -> *const c_char {
    if let Some(ctx) = current() {
        return ctx.last_error_ptr();
    }
    match ORPHAN_ERROR.lock().as_ref() {
        Some(msg) => msg.as_ptr(),
        None => NOT_INITIALIZED.as_ptr() as *const c_char,
    }
}
