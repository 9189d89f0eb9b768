/// Paint commands for a laid out page

use super::layout::{ElementType, LayoutNode, GLYPH_WIDTH, LINE_HEIGHT};
use crate::Viewport;

pub const BACKGROUND: (u8, u8, u8, u8) = (255, 255, 255, 255);
const HEADING_BG: (u8, u8, u8, u8) = (236, 236, 240, 255);
const TEXT: (u8, u8, u8, u8) = (40, 40, 48, 255);
const LINK_TEXT: (u8, u8, u8, u8) = (26, 84, 200, 255);

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
}

fn rect(x: i32, y: i32, width: u32, height: u32, rgba: (u8, u8, u8, u8)) -> PaintCommand {
    PaintCommand::SolidRect {
        x,
        y,
        width,
        height,
        rgba,
    }
}

/// Build the display list for the part of the page visible at `scroll_y`.
///
/// Text is greeked: every word becomes a bar as wide as its glyph cells,
/// leaving a one pixel gap below each line. Nodes entirely outside the
/// viewport are skipped.
pub fn paint_commands(nodes: &[LayoutNode], viewport: Viewport, scroll_y: u32) -> Vec<PaintCommand> {
    let mut cmds = vec![rect(0, 0, viewport.width, viewport.height, BACKGROUND)];
    let top = scroll_y as i32;
    let bottom = top + viewport.height as i32;

    for node in nodes {
        let r = &node.lb.rect;
        if r.bottom() <= top || r.y >= bottom {
            continue;
        }
        let y0 = r.y - top;
        if node.elem_type == ElementType::Heading {
            cmds.push(rect(r.x, y0, r.width, r.height, HEADING_BG));
        }
        let color = match node.elem_type {
            ElementType::Link => LINK_TEXT,
            _ => TEXT,
        };
        let inset = (node.lb.box_model.border + node.lb.box_model.padding) as i32;
        let cell_w = GLYPH_WIDTH * node.scale;
        let line_h = LINE_HEIGHT * node.scale;
        for (i, line) in node.lines.iter().enumerate() {
            let line_y = y0 + inset + (i as u32 * line_h) as i32;
            let mut x = r.x + inset;
            for word in line.split(' ') {
                let w = word.chars().count() as u32 * cell_w;
                if w > 0 {
                    cmds.push(rect(x, line_y, w, line_h.saturating_sub(1), color));
                }
                x += (w + cell_w) as i32;
            }
        }
    }
    cmds
}
