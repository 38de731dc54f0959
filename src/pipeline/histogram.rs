//! Histogram Kernel
//!
//! Single-pass accumulation of four 256-bin channels (R, G, B, luminance)
//! plus clipped-pixel counts, computed over the pipeline's final output.

use crate::pipeline::adjust::{LUMA_B, LUMA_G, LUMA_R};
use crate::pipeline::buffer::PixelBuf;

/// Histogram bins and clipping counters for one rendered image.
#[derive(Debug, Clone)]
pub struct HistogramData {
    pub r: Box<[u32; 256]>,
    pub g: Box<[u32; 256]>,
    pub b: Box<[u32; 256]>,
    pub luminance: Box<[u32; 256]>,
    /// Pixels with any channel at 0.
    pub clipped_shadows: u32,
    /// Pixels with any channel at 255.
    pub clipped_highlights: u32,
}

impl Default for HistogramData {
    fn default() -> Self {
        Self {
            r: Box::new([0; 256]),
            g: Box::new([0; 256]),
            b: Box::new([0; 256]),
            luminance: Box::new([0; 256]),
            clipped_shadows: 0,
            clipped_highlights: 0,
        }
    }
}

#[inline]
fn quantize(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Accumulates the histogram for a buffer.
#[must_use]
pub fn compute(buf: &PixelBuf) -> HistogramData {
    let mut hist = HistogramData::default();
    for px in buf.data().chunks_exact(3) {
        let r = quantize(px[0]);
        let g = quantize(px[1]);
        let b = quantize(px[2]);
        let luma = quantize(LUMA_R * px[0] + LUMA_G * px[1] + LUMA_B * px[2]);

        hist.r[r as usize] += 1;
        hist.g[g as usize] += 1;
        hist.b[b as usize] += 1;
        hist.luminance[luma as usize] += 1;

        if r == 0 || g == 0 || b == 0 {
            hist.clipped_shadows += 1;
        }
        if r == 255 || g == 255 || b == 255 {
            hist.clipped_highlights += 1;
        }
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_every_pixel_once() {
        let buf = PixelBuf::from_rgb8(2, 2, &[0, 0, 0, 255, 255, 255, 128, 128, 128, 64, 64, 64]);
        let hist = compute(&buf);
        assert_eq!(hist.r.iter().sum::<u32>(), 4);
        assert_eq!(hist.luminance.iter().sum::<u32>(), 4);
        assert_eq!(hist.clipped_shadows, 1);
        assert_eq!(hist.clipped_highlights, 1);
        assert_eq!(hist.r[128], 1);
    }
}
