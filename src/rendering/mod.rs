//! Page rendering for the software engine: layout, paint, raster.

pub mod layout;
pub mod paint;
pub mod raster;

use crate::Viewport;
use layout::LayoutNode;

/// Rasterize the visible part of a laid out page into a BGRA frame of
/// `viewport` size.
pub fn render_frame(nodes: &[LayoutNode], viewport: Viewport, scroll_y: u32) -> Vec<u8> {
    let cmds = paint::paint_commands(nodes, viewport, scroll_y);
    raster::rasterize(&cmds, viewport.width, viewport.height)
}
