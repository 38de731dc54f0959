//! Crop Kernel
//!
//! Applies a normalized crop rectangle. Rect coordinates are interpreted in
//! the coordinate space of the buffer being cropped — for rotated images
//! that is the post-rotation bounding box, so stored crops never drift when
//! the angle changes.

use crate::errors::{Error, Result};
use crate::pipeline::buffer::PixelBuf;
use crate::pipeline::params::CropRect;

/// Crops the buffer to the given normalized rect.
///
/// The full-frame rect returns the input untouched. Degenerate pixel rects
/// (after rounding) fail with `InvalidCrop`.
pub fn apply(buf: &PixelBuf, rect: &CropRect) -> Result<PixelBuf> {
    rect.validate()?;
    if rect.is_full() {
        return Ok(buf.clone());
    }

    let w = buf.width() as f32;
    let h = buf.height() as f32;

    let x0 = (rect.left * w).round() as u32;
    let y0 = (rect.top * h).round() as u32;
    let cw = ((rect.width * w).round() as u32).min(buf.width().saturating_sub(x0));
    let ch = ((rect.height * h).round() as u32).min(buf.height().saturating_sub(y0));

    if cw == 0 || ch == 0 {
        return Err(Error::InvalidCrop(format!(
            "rect collapses to zero pixels at {}x{}",
            buf.width(),
            buf.height()
        )));
    }

    let mut out = PixelBuf::new(cw, ch);
    for y in 0..ch {
        for x in 0..cw {
            out.set(x, y, buf.get(x0 + x, y0 + y));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rect_is_identity() {
        let buf = PixelBuf::from_rgb8(2, 2, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let out = apply(&buf, &CropRect::full()).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn quadrant_crop() {
        let mut buf = PixelBuf::new(4, 4);
        buf.set(3, 0, [1.0, 0.0, 0.0]);
        let rect = CropRect {
            left: 0.5,
            top: 0.0,
            width: 0.5,
            height: 0.5,
        };
        let out = apply(&buf, &rect).unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
        assert_eq!(out.get(1, 0), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn degenerate_rect_rejected() {
        let buf = PixelBuf::new(4, 4);
        let rect = CropRect {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.5,
        };
        assert!(matches!(apply(&buf, &rect), Err(Error::InvalidCrop(_))));
    }
}
