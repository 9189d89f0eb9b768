/// Software rasterizer producing engine-native BGRA frames

use super::paint::PaintCommand;
use crate::surface::BYTES_PER_PIXEL;

/// Fill a `width * height` BGRA8888 buffer from a display list. Commands are
/// drawn in order with source-over blending and clipped to the buffer.
pub fn rasterize(cmds: &[PaintCommand], width: u32, height: u32) -> Vec<u8> {
    let mut buf = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
    for cmd in cmds {
        match cmd {
            PaintCommand::SolidRect {
                x,
                y,
                width: w,
                height: h,
                rgba,
            } => fill_rect(&mut buf, width, height, *x, *y, *w, *h, *rgba),
        }
    }
    buf
}

#[allow(clippy::too_many_arguments)]
fn fill_rect(buf: &mut [u8], bw: u32, bh: u32, x: i32, y: i32, w: u32, h: u32, rgba: (u8, u8, u8, u8)) {
    let x0 = x.max(0) as i64;
    let y0 = y.max(0) as i64;
    let x1 = (x as i64 + w as i64).min(bw as i64);
    let y1 = (y as i64 + h as i64).min(bh as i64);
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    let (r, g, b, a) = rgba;
    let stride = bw as usize * BYTES_PER_PIXEL;
    for row in y0 as usize..y1 as usize {
        let start = row * stride + x0 as usize * BYTES_PER_PIXEL;
        let end = row * stride + x1 as usize * BYTES_PER_PIXEL;
        for px in buf[start..end].chunks_exact_mut(BYTES_PER_PIXEL) {
            if a == 255 {
                px.copy_from_slice(&[b, g, r, 255]);
            } else {
                px[0] = blend(b, px[0], a);
                px[1] = blend(g, px[1], a);
                px[2] = blend(r, px[2], a);
                px[3] = a.saturating_add(blend(0, px[3], a));
            }
        }
    }
}

fn blend(src: u8, dst: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((src as u32 * a + dst as u32 * (255 - a) + 127) / 255) as u8
}
