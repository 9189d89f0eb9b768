//! webcell headless web compositor
//!
//! Two offscreen browsers, a navigation bar on top and page content below,
//! composited into one RGBA frame for hosts that only want pixels. Hosts drive
//! everything through a small C ABI (see `ffi`): create a session, tick the
//! engine, forward pointer input and read the composite frame.
//!
//! # Features
//!
//! - **Software engine** (default): pure-Rust page loading, layout and
//!   rasterization with a Boa script context per browser
//! - **Pluggable engines**: any backend implementing the `engine` traits
//! - **Command bus**: a tiny versioned binary protocol between page scripts
//!   and the browser side
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webcell::{Context, SessionConfig, Viewport};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig {
//!     viewport: Viewport { width: 1280, height: 720 },
//!     ..Default::default()
//! };
//! let engine = Arc::new(webcell::engine::software::SoftwareEngine::new());
//! let ctx = Context::new(config, engine)?;
//! let session = ctx.create_session()?;
//! while !ctx.is_ready(session)? {}
//! ctx.set_url(session, "https://example.com")?;
//! for _ in 0..100 {
//!     ctx.tick();
//! }
//! let frame = ctx.snapshot_rgba(session)?;
//! println!("{} bytes", frame.len());
//! # Ok(())
//! # }
//! ```

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod compositor;
pub mod context;
pub mod engine;
pub mod ffi;
pub mod protocol;
pub mod registry;
pub mod surface;
pub mod view;

// Page layout and rasterization used by the software engine
#[cfg(feature = "software")]
pub mod rendering;

pub use compositor::{Compositor, RoutedEvent};
pub use context::Context;
pub use engine::{BrowserEngine, EngineSettings};
pub use protocol::{BrowserCommand, Command, ScriptCommand};
pub use surface::{PixelFormat, SurfaceBuffer};
pub use view::{ViewKind, ViewSession};

/// The navigation bar page shipped with the crate
pub const NAVBAR_HTML: &str = include_str!("../assets/navbar.html");

/// Configuration of a compositor session
///
/// The defaults match a 1280x720 overlay with a 48 pixel navigation bar:
/// - one session at a time
/// - wheel deltas scaled by 15
/// - a one second grace period before pages are told they finished loading
///
/// # Examples
///
/// ```
/// let cfg = webcell::SessionConfig::default();
/// assert_eq!(cfg.navbar_height, 48);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size of the composite frame
    pub viewport: Viewport,
    /// Rows at the top of the viewport owned by the navigation bar
    pub navbar_height: u32,
    /// Factor applied to host wheel deltas
    pub scroll_multiplier: f32,
    /// Page loaded into the navigation bar; the bundled bar when unset
    pub navbar_url: Option<String>,
    /// Delay between load end and the `SITE_LOADED` notification in milliseconds
    pub load_notify_delay_ms: u64,
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Engine runtime settings
    pub engine: EngineSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            navbar_height: 48,
            scroll_multiplier: 15.0,
            navbar_url: None,
            load_notify_delay_ms: 1000,
            max_sessions: 1,
            engine: EngineSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Viewport { width, height } = self.viewport;
        if width == 0 || height == 0 {
            return Err(Error::ConfigError(format!("viewport {}x{} is empty", width, height)));
        }
        if self.navbar_height == 0 || self.navbar_height >= height {
            return Err(Error::ConfigError(format!(
                "navbar height {} must leave room in a {} pixel viewport",
                self.navbar_height, height
            )));
        }
        if !self.scroll_multiplier.is_finite() {
            return Err(Error::ConfigError("scroll multiplier must be finite".into()));
        }
        if self.max_sessions == 0 {
            return Err(Error::ConfigError("max_sessions must be at least 1".into()));
        }
        Ok(())
    }

    pub fn load_notify_delay(&self) -> Duration {
        Duration::from_millis(self.load_notify_delay_ms)
    }

    /// URL the navigation bar starts on
    pub fn navbar_url(&self) -> String {
        match &self.navbar_url {
            Some(url) => url.clone(),
            None => format!(
                "data:text/html;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(NAVBAR_HTML)
            ),
        }
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 720);
        assert_eq!(config.scroll_multiplier, 15.0);
        assert_eq!(config.max_sessions, 1);
        assert_eq!(config.load_notify_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json() {
        let config = SessionConfig::from_json(r#"{"navbar_height": 64, "engine": {"frame_rate": 60}}"#).unwrap();
        assert_eq!(config.navbar_height, 64);
        assert_eq!(config.engine.frame_rate, 60);
        assert_eq!(config.viewport, Viewport::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(SessionConfig::from_json("{"), Err(Error::ConfigError(_))));
        assert!(SessionConfig::from_json(r#"{"navbar_height": 720}"#).is_err());
        assert!(SessionConfig::from_json(r#"{"viewport": {"width": 0, "height": 10}}"#).is_err());
        assert!(SessionConfig::from_json(r#"{"max_sessions": 0}"#).is_err());
    }

    #[test]
    fn test_navbar_url() {
        let config = SessionConfig::default();
        let url = config.navbar_url();
        assert!(url.starts_with("data:text/html;base64,"));
        let custom = SessionConfig {
            navbar_url: Some("file:///opt/navbar.html".into()),
            ..Default::default()
        };
        assert_eq!(custom.navbar_url(), "file:///opt/navbar.html");
        assert!(NAVBAR_HTML.contains("webcell_change_url"));
    }
}
