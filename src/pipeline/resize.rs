//! Resize Kernel
//!
//! Resampling runs in the 8-bit domain through `image::imageops`, which is
//! where the decode and encode boundaries already live. Bilinear serves
//! thumbnails and drafts; Lanczos3 serves export.

use image::RgbImage;
use image::imageops::{self, FilterType};

use crate::pipeline::buffer::PixelBuf;

/// Resampling filter choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    Lanczos3,
}

impl ResizeFilter {
    fn as_image_filter(self) -> FilterType {
        match self {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Bilinear => FilterType::Triangle,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Target dimensions that bring the short edge to `target`, preserving
/// aspect. Never upscales.
#[must_use]
pub fn fit_short_edge(width: u32, height: u32, target: u32) -> (u32, u32) {
    let short = width.min(height);
    if short <= target || short == 0 {
        return (width, height);
    }
    let scale = f64::from(target) / f64::from(short);
    scaled(width, height, scale)
}

/// Target dimensions that bring the long edge to `target`, preserving
/// aspect. Never upscales.
#[must_use]
pub fn fit_long_edge(width: u32, height: u32, target: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= target || long == 0 {
        return (width, height);
    }
    let scale = f64::from(target) / f64::from(long);
    scaled(width, height, scale)
}

fn scaled(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.max(1), h.max(1))
}

/// Resamples to exact target dimensions.
#[must_use]
pub fn apply(buf: &PixelBuf, target_w: u32, target_h: u32, filter: ResizeFilter) -> PixelBuf {
    if buf.width() == target_w && buf.height() == target_h {
        return buf.clone();
    }
    let rgb = buf.to_rgb8();
    let img = RgbImage::from_raw(buf.width(), buf.height(), rgb)
        .expect("buffer dimensions match byte count");
    let resized = imageops::resize(&img, target_w, target_h, filter.as_image_filter());
    PixelBuf::from_rgb8(target_w, target_h, resized.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_edge_fit_preserves_aspect() {
        assert_eq!(fit_short_edge(4000, 2000, 256), (512, 256));
        assert_eq!(fit_short_edge(200, 100, 256), (200, 100));
    }

    #[test]
    fn long_edge_fit_preserves_aspect() {
        assert_eq!(fit_long_edge(4000, 2000, 2560), (2560, 1280));
        assert_eq!(fit_long_edge(1000, 500, 2560), (1000, 500));
    }

    #[test]
    fn exact_size_is_identity() {
        let buf = PixelBuf::new(10, 10);
        let out = apply(&buf, 10, 10, ResizeFilter::Bilinear);
        assert_eq!(out, buf);
    }
}
