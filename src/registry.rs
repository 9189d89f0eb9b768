//! Integer handles for live compositors.

use crate::compositor::Compositor;
use crate::protocol::Navigator;
use crate::view::{ViewDeps, ViewSession};
use crate::{Error, Result, SessionConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Maps session handles to compositors
pub struct SessionRegistry {
    sessions: BTreeMap<i32, Arc<Compositor>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Smallest non-negative integer not currently in use
    pub fn unused_handle(&self) -> i32 {
        // Keys iterate in order, so the first gap is the answer.
        let mut candidate = 0;
        for handle in self.sessions.keys() {
            if *handle != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    /// Register a new compositor. Browsers are not requested here; the caller
    /// does that once the registry lock is released.
    pub fn create_session(&mut self, config: &SessionConfig, deps: ViewDeps) -> Result<(i32, Arc<Compositor>)> {
        if self.sessions.len() >= self.max_sessions {
            return Err(Error::SessionLimit("multiple sessions not supported yet".into()));
        }
        let compositor = Arc::new(Compositor::new(config, deps));
        wire_address_bar(&compositor);

        let handle = self.unused_handle();
        self.sessions.insert(handle, compositor.clone());
        log::debug!("session {} created", handle);
        Ok((handle, compositor))
    }

    /// Remove a session and hand it back so it can be torn down outside the lock
    pub fn destroy_session(&mut self, handle: i32) -> Result<Arc<Compositor>> {
        let compositor = self.sessions.remove(&handle).ok_or(Error::UnknownHandle(handle))?;
        log::debug!("session {} destroyed", handle);
        Ok(compositor)
    }

    pub fn lookup(&self, handle: i32) -> Result<Arc<Compositor>> {
        self.sessions.get(&handle).cloned().ok_or(Error::UnknownHandle(handle))
    }

    /// The compositor navigation commands act on
    pub fn active(&self) -> Option<Arc<Compositor>> {
        self.sessions.values().next().cloned()
    }

    /// Remove every session
    pub fn drain(&mut self) -> Vec<Arc<Compositor>> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}

/// Content address changes are mirrored into the navbar page
fn wire_address_bar(compositor: &Compositor) {
    let navbar: Weak<ViewSession> = Arc::downgrade(compositor.navbar());
    compositor.content().set_address_change_callback(move |url| {
        let Some(navbar) = navbar.upgrade() else {
            return;
        };
        match serde_json::to_string(url) {
            Ok(literal) => navbar.call_javascript(&format!("webcell_change_url({})", literal)),
            Err(e) => log::warn!("cannot quote address {:?}: {}", url, e),
        }
    });
}

/// Routes navigation commands to the content view of the active session
pub struct ActiveSessionNavigator {
    registry: Weak<Mutex<SessionRegistry>>,
}

impl ActiveSessionNavigator {
    pub fn new(registry: &Arc<Mutex<SessionRegistry>>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }

    fn with_content<F>(&self, f: F)
    where
        F: FnOnce(&ViewSession),
    {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // Release the registry lock before talking to the engine.
        let active = registry.lock().active();
        match active {
            Some(compositor) => f(compositor.content()),
            None => log::debug!("navigation command dropped, no active session"),
        }
    }
}

impl Navigator for ActiveSessionNavigator {
    fn back(&self) {
        self.with_content(|view| {
            if let Some(browser) = view.browser() {
                browser.go_back();
            }
        });
    }

    fn forward(&self) {
        self.with_content(|view| {
            if let Some(browser) = view.browser() {
                browser.go_forward();
            }
        });
    }

    fn refresh(&self) {
        self.with_content(|view| {
            if let Some(browser) = view.browser() {
                browser.reload();
            }
        });
    }

    fn set_url(&self, url: &str) {
        self.with_content(|view| {
            if let Err(e) = view.set_url(url) {
                log::warn!("set url {} dropped: {}", url, e);
            }
        });
    }
}
