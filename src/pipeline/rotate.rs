//! Rotation Kernel
//!
//! Arbitrary-angle rotation by inverse mapping with bilinear sampling. The
//! output canvas is the axis-aligned bounding box of the rotated source;
//! pixels with no source coverage are black.

use crate::errors::Result;
use crate::pipeline::buffer::PixelBuf;
use crate::util::CancelToken;

/// Dimensions of the bounding box of a `width × height` image rotated by
/// `degrees`.
#[must_use]
pub fn rotated_bounds(width: u32, height: u32, degrees: f32) -> (u32, u32) {
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let w = f64::from(width as f32) * f64::from(cos) + f64::from(height as f32) * f64::from(sin);
    let h = f64::from(width as f32) * f64::from(sin) + f64::from(height as f32) * f64::from(cos);
    ((w.round() as u32).max(1), (h.round() as u32).max(1))
}

/// Rotates the buffer by `degrees` about its centre. A positive quarter
/// turn carries the source's top-right quadrant into the top-left of the
/// output.
///
/// Angles within a hundredth of a degree of zero return the input untouched.
pub fn apply(buf: &PixelBuf, degrees: f32, token: &CancelToken) -> Result<PixelBuf> {
    if degrees.abs() < 1e-2 {
        return Ok(buf.clone());
    }

    let (out_w, out_h) = rotated_bounds(buf.width(), buf.height(), degrees);
    let mut out = PixelBuf::new(out_w, out_h);

    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();

    let src_cx = buf.width() as f32 / 2.0;
    let src_cy = buf.height() as f32 / 2.0;
    let dst_cx = out_w as f32 / 2.0;
    let dst_cy = out_h as f32 / 2.0;

    for y in 0..out_h {
        if y % 16 == 0 {
            token.check()?;
        }
        let dy = y as f32 + 0.5 - dst_cy;
        for x in 0..out_w {
            let dx = x as f32 + 0.5 - dst_cx;
            // Inverse rotation maps destination back into the source frame.
            let sx = dx * cos - dy * sin + src_cx - 0.5;
            let sy = dx * sin + dy * cos + src_cy - 0.5;
            out.set(x, y, buf.sample_bilinear(sx, sy));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rotation_is_identity() {
        let buf = PixelBuf::from_rgb8(2, 2, &[255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 0]);
        let out = apply(&buf, 0.0, &CancelToken::new()).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let buf = PixelBuf::new(100, 50);
        let out = apply(&buf, 90.0, &CancelToken::new()).unwrap();
        assert_eq!((out.width(), out.height()), (50, 100));
    }

    #[test]
    fn quarter_turn_quadrant_mapping() {
        // 2×2 quadrants A B / C D rotated +90° become B D / A C.
        let mut buf = PixelBuf::new(2, 2);
        buf.set(0, 0, [1.0, 0.0, 0.0]); // A
        buf.set(1, 0, [0.0, 1.0, 0.0]); // B
        buf.set(0, 1, [0.0, 0.0, 1.0]); // C
        buf.set(1, 1, [1.0, 1.0, 0.0]); // D
        let out = apply(&buf, 90.0, &CancelToken::new()).unwrap();
        let close = |a: [f32; 3], b: [f32; 3]| {
            a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-3)
        };
        assert!(close(out.get(0, 0), [0.0, 1.0, 0.0])); // B
        assert!(close(out.get(1, 0), [1.0, 1.0, 0.0])); // D
        assert!(close(out.get(0, 1), [1.0, 0.0, 0.0])); // A
        assert!(close(out.get(1, 1), [0.0, 0.0, 1.0])); // C
    }

    #[test]
    fn forty_five_degrees_grows_canvas() {
        let (w, h) = rotated_bounds(100, 100, 45.0);
        assert!(w > 100 && h > 100);
        assert_eq!(w, h);
    }
}
