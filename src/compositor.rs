//! The two-view compositor and its event router.
//!
//! A `Compositor` stacks a navbar view on top of a content view. Input in
//! viewport coordinates is hit-tested once by `map_event` and forwarded to the
//! view under the pointer; frames are stacked into one RGBA buffer on demand.

use crate::engine::{MouseButton, MouseEvent, EVENTFLAG_LEFT_MOUSE_BUTTON};
use crate::surface::{PixelFormat, SurfaceBuffer};
use crate::view::{ViewDeps, ViewKind, ViewSession};
use crate::{Error, Result, SessionConfig, Viewport};
use parking_lot::Mutex;
use std::sync::Arc;

/// Where an input event lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutedEvent {
    pub target: ViewKind,
    /// Coordinates local to the target view
    pub x: i32,
    pub y: i32,
}

pub struct Compositor {
    viewport: Viewport,
    navbar_height: u32,
    scroll_multiplier: f32,
    navbar: Arc<ViewSession>,
    content: Arc<ViewSession>,
    composite: SurfaceBuffer,
    last_pointer: Mutex<(i32, i32)>,
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("viewport", &self.viewport)
            .field("navbar_height", &self.navbar_height)
            .finish_non_exhaustive()
    }
}

impl Compositor {
    /// Build both views from a validated config. No browser is requested here.
    pub fn new(config: &SessionConfig, deps: ViewDeps) -> Self {
        let Viewport { width, height } = config.viewport;
        let navbar_height = config.navbar_height;
        Self {
            viewport: config.viewport,
            navbar_height,
            scroll_multiplier: config.scroll_multiplier,
            navbar: ViewSession::new(ViewKind::Navbar, width, navbar_height, deps.clone()),
            content: ViewSession::new(ViewKind::Content, width, height.saturating_sub(navbar_height), deps),
            composite: SurfaceBuffer::new(width, height, PixelFormat::Rgba8888),
            last_pointer: Mutex::new((0, 0)),
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn navbar_height(&self) -> u32 {
        self.navbar_height
    }

    pub fn navbar(&self) -> &Arc<ViewSession> {
        &self.navbar
    }

    pub fn content(&self) -> &Arc<ViewSession> {
        &self.content
    }

    pub fn view(&self, kind: ViewKind) -> &Arc<ViewSession> {
        match kind {
            ViewKind::Navbar => &self.navbar,
            ViewKind::Content => &self.content,
        }
    }

    /// Hit-test a viewport coordinate
    pub fn map_event(&self, x: i32, y: i32) -> RoutedEvent {
        let bar = self.navbar_height as i32;
        if y < bar {
            RoutedEvent {
                target: ViewKind::Navbar,
                x,
                y,
            }
        } else {
            RoutedEvent {
                target: ViewKind::Content,
                x,
                y: y - bar,
            }
        }
    }

    pub fn last_pointer(&self) -> (i32, i32) {
        *self.last_pointer.lock()
    }

    pub fn pass_mouse_move(&self, x: i32, y: i32) {
        *self.last_pointer.lock() = (x, y);
        let routed = self.map_event(x, y);
        if let Some(browser) = self.view(routed.target).browser() {
            let event = MouseEvent {
                x: routed.x,
                y: routed.y,
                modifiers: 0,
            };
            browser.send_mouse_move(event, false);
        }
    }

    /// Press or release a button at the last pointer position
    pub fn pass_mouse_state(&self, index: i32, down: bool) {
        let (x, y) = self.last_pointer();
        let routed = self.map_event(x, y);
        if let Some(browser) = self.view(routed.target).browser() {
            let event = MouseEvent {
                x: routed.x,
                y: routed.y,
                modifiers: EVENTFLAG_LEFT_MOUSE_BUTTON,
            };
            browser.send_mouse_click(event, MouseButton::from_index(index), !down, 1);
        }
    }

    /// Vertical wheel at the last pointer position, scaled by the scroll multiplier
    pub fn pass_mouse_scroll(&self, delta: f32) {
        let (x, y) = self.last_pointer();
        let routed = self.map_event(x, y);
        if let Some(browser) = self.view(routed.target).browser() {
            let event = MouseEvent {
                x: routed.x,
                y: routed.y,
                modifiers: 0,
            };
            browser.send_mouse_wheel(event, 0, (delta * self.scroll_multiplier) as i32);
        }
    }

    /// Whether both views have presented a frame
    pub fn surfaces_ready(&self) -> bool {
        self.navbar.surface().has_frame() && self.content.surface().has_frame()
    }

    /// The composite buffer. With `render` the latest view frames are stacked
    /// into it first; without, it is only allocated.
    pub fn composite(&self, render: bool) -> Result<&SurfaceBuffer> {
        self.composite.ensure();
        if !render {
            return Ok(&self.composite);
        }
        if !self.surfaces_ready() {
            return Err(Error::NotReady("Handler surfaces not ready".into()));
        }
        self.navbar.surface().blit_into(&self.composite, 0)?;
        self.content.surface().blit_into(&self.composite, self.navbar_height)?;
        Ok(&self.composite)
    }

    /// Close both views and free every buffer. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.navbar.shutdown();
        self.content.shutdown();
        if self.composite.release() {
            log::debug!("composite buffer released");
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
