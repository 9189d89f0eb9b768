//! Fixed-size pixel buffers for the sub-views and the composite frame.
//!
//! A `SurfaceBuffer` is created empty and allocated on first `ensure`. Every
//! raw pixel copy happens under the buffer lock so a paint callback and a
//! composite read never interleave, even when a host drives them from
//! different threads.

use crate::{Error, Result};
use parking_lot::Mutex;

/// Every supported format packs one pixel into four bytes
pub const BYTES_PER_PIXEL: usize = 4;

/// Channel order of a buffer, as laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Engine native order (the little-endian ARGB word): B, G, R, A
    Bgra8888,
    /// Output contract order (the little-endian ABGR word): R, G, B, A
    Rgba8888,
}

impl PixelFormat {
    /// Copy a row of `self`-ordered pixels into `dst` using `target` order.
    ///
    /// `src` and `dst` must have the same length, a multiple of four.
    pub fn convert_row(self, target: PixelFormat, src: &[u8], dst: &mut [u8]) {
        if self == target {
            dst.copy_from_slice(src);
            return;
        }
        // The two formats only differ in where red and blue live.
        for (s, d) in src.chunks_exact(BYTES_PER_PIXEL).zip(dst.chunks_exact_mut(BYTES_PER_PIXEL)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = s[3];
        }
    }
}

#[derive(Default)]
struct Pixels {
    data: Option<Vec<u8>>,
    painted: bool,
}

/// One fixed-size, lazily allocated pixel buffer
pub struct SurfaceBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Mutex<Pixels>,
}

impl std::fmt::Debug for SurfaceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

impl SurfaceBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            pixels: Mutex::new(Pixels::default()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Size of the whole buffer in bytes
    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// Allocate the buffer if it does not exist yet. Repeated calls keep the
    /// existing allocation.
    pub fn ensure(&self) {
        let mut px = self.pixels.lock();
        if px.data.is_none() {
            px.data = Some(vec![0; self.byte_len()]);
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.pixels.lock().data.is_some()
    }

    /// Whether the buffer holds at least one complete frame
    pub fn has_frame(&self) -> bool {
        let px = self.pixels.lock();
        px.painted && px.data.is_some()
    }

    /// Replace the whole buffer with `raw`.
    ///
    /// Requires a prior `ensure` and exactly `byte_len()` bytes; anything else
    /// is a precondition violation.
    pub fn write(&self, raw: &[u8]) -> Result<()> {
        let expected = self.byte_len();
        let mut px = self.pixels.lock();
        let data = px.data.as_mut().ok_or_else(|| {
            Error::PreconditionError("pixel write before the surface was allocated".into())
        })?;
        if raw.len() != expected {
            return Err(Error::PreconditionError(format!(
                "pixel write of {} bytes into a {}x{} surface ({} bytes)",
                raw.len(),
                self.width,
                self.height,
                expected
            )));
        }
        data.copy_from_slice(raw);
        px.painted = true;
        Ok(())
    }

    /// Run `f` over the pixels of the last complete frame, if any.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let px = self.pixels.lock();
        if !px.painted {
            return None;
        }
        px.data.as_deref().map(f)
    }

    /// Raw pointer to the allocation. Valid until the next `release`.
    pub fn as_ptr(&self) -> Option<*const u8> {
        self.pixels.lock().data.as_ref().map(|d| d.as_ptr())
    }

    /// Free the buffer. Returns whether anything was freed; calling it again is
    /// a no-op.
    pub fn release(&self) -> bool {
        let mut px = self.pixels.lock();
        px.painted = false;
        px.data.take().is_some()
    }

    /// Copy this buffer into `dest` starting at row `y_offset`, converting the
    /// channel order on the way. Rows and columns that fall outside `dest` are
    /// clipped.
    pub fn blit_into(&self, dest: &SurfaceBuffer, y_offset: u32) -> Result<()> {
        if std::ptr::eq(self, dest) {
            return Err(Error::PreconditionError("cannot blit a surface onto itself".into()));
        }
        dest.ensure();

        let src_px = self.pixels.lock();
        let src = match (src_px.painted, src_px.data.as_deref()) {
            (true, Some(data)) => data,
            _ => return Err(Error::NotReady("source surface has no frame".into())),
        };

        let mut dst_px = dest.pixels.lock();
        let Some(dst) = dst_px.data.as_mut() else {
            return Err(Error::PreconditionError("destination surface was released".into()));
        };

        let rows = self.height.min(dest.height.saturating_sub(y_offset)) as usize;
        let row_bytes = self.width.min(dest.width) as usize * BYTES_PER_PIXEL;
        let src_stride = self.stride();
        let dst_stride = dest.stride();

        for row in 0..rows {
            let s = row * src_stride;
            let d = (row + y_offset as usize) * dst_stride;
            self.format
                .convert_row(dest.format, &src[s..s + row_bytes], &mut dst[d..d + row_bytes]);
        }
        dst_px.painted = true;
        Ok(())
    }
}
