//! Global Adjustment Kernel
//!
//! Applies the ten tonal knobs per pixel in a fixed order: exposure,
//! contrast, temperature/tint, highlights/shadows, whites/blacks,
//! saturation, vibrance, final clamp. The order is part of the rendering
//! contract — changing it changes every processed image.

use crate::errors::Result;
use crate::pipeline::buffer::PixelBuf;
use crate::pipeline::params::Adjustments;
use crate::util::CancelToken;

/// Rec. 709 luminance coefficients, shared with the histogram.
pub const LUMA_R: f32 = 0.2126;
pub const LUMA_G: f32 = 0.7152;
pub const LUMA_B: f32 = 0.0722;

#[inline]
fn luminance(r: f32, g: f32, b: f32) -> f32 {
    LUMA_R * r + LUMA_G * g + LUMA_B * b
}

/// Hermite smoothstep; `edge0 > edge1` gives the descending ramp.
#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Applies all ten knobs to one RGB triple. Input and output are unclamped
/// working values except for the documented final clamp.
#[inline]
#[must_use]
pub fn adjust_rgb(px: [f32; 3], adj: &Adjustments) -> [f32; 3] {
    let [mut r, mut g, mut b] = px;

    // 1. Exposure, in stops.
    if adj.exposure != 0.0 {
        let gain = (2.0f32).powf(adj.exposure);
        r *= gain;
        g *= gain;
        b *= gain;
    }

    // 2. Contrast about middle grey.
    if adj.contrast != 0.0 {
        let slope = 1.0 + adj.contrast / 100.0;
        r = 0.5 + (r - 0.5) * slope;
        g = 0.5 + (g - 0.5) * slope;
        b = 0.5 + (b - 0.5) * slope;
    }

    // 3. White balance: temperature shifts red/blue, tint shifts green.
    if adj.temperature != 0.0 {
        let shift = 0.1 * (adj.temperature / 100.0);
        r *= 1.0 + shift;
        b *= 1.0 - shift;
    }
    if adj.tint != 0.0 {
        g *= 1.0 + 0.05 * (adj.tint / 100.0);
    }

    // 4. Highlights / shadows, masked by luminance.
    if adj.highlights != 0.0 || adj.shadows != 0.0 {
        let l = luminance(r, g, b);
        let hmask = smoothstep(0.5, 1.0, l);
        let smask = smoothstep(0.5, 0.0, l);
        let h = adj.highlights / 100.0;
        let s = adj.shadows / 100.0;
        r += r * hmask * h + r * smask * s;
        g += g * hmask * h + g * smask * s;
        b += b * hmask * h + b * smask * s;
    }

    // 5. Whites / blacks: same shape, tighter thresholds.
    if adj.whites != 0.0 || adj.blacks != 0.0 {
        let l = luminance(r, g, b);
        let wmask = smoothstep(0.8, 1.0, l);
        let bmask = smoothstep(0.2, 0.0, l);
        let w = adj.whites / 100.0;
        let k = adj.blacks / 100.0;
        r += r * wmask * w + r * bmask * k;
        g += g * wmask * w + g * bmask * k;
        b += b * wmask * w + b * bmask * k;
    }

    // 6. Saturation, as a lerp away from luminance.
    if adj.saturation != 0.0 {
        let l = luminance(r, g, b);
        let factor = 1.0 + adj.saturation / 100.0;
        r = mix(l, r, factor);
        g = mix(l, g, factor);
        b = mix(l, b, factor);
    }

    // 7. Vibrance: saturation boost weighted toward muted pixels.
    if adj.vibrance != 0.0 {
        let l = luminance(r, g, b);
        let sat = r.max(g).max(b) - r.min(g).min(b);
        let factor = 1.0 + (1.0 - sat) * adj.vibrance / 100.0;
        r = mix(l, r, factor);
        g = mix(l, g, factor);
        b = mix(l, b, factor);
    }

    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

/// Applies the knobs across a whole buffer, in place.
///
/// Neutral adjustments return without touching a byte, preserving the
/// byte-identity guarantee.
pub fn apply(buf: &mut PixelBuf, adj: &Adjustments, token: &CancelToken) -> Result<()> {
    if adj.is_neutral() {
        return Ok(());
    }
    let width = buf.width() as usize;
    for (row_idx, row) in buf.data_mut().chunks_mut(width * 3).enumerate() {
        if row_idx % 32 == 0 {
            token.check()?;
        }
        for px in row.chunks_mut(3) {
            let out = adjust_rgb([px[0], px[1], px[2]], adj);
            px[0] = out[0];
            px[1] = out[1];
            px[2] = out[2];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_is_identity() {
        let adj = Adjustments::default();
        let px = [0.25, 0.5, 0.75];
        assert_eq!(adjust_rgb(px, &adj), px);
    }

    #[test]
    fn exposure_doubles_per_stop() {
        let adj = Adjustments {
            exposure: 1.0,
            ..Default::default()
        };
        let out = adjust_rgb([0.2, 0.3, 0.4], &adj);
        assert!((out[0] - 0.4).abs() < 1e-6);
        assert!((out[1] - 0.6).abs() < 1e-6);
        assert!((out[2] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn contrast_pivots_on_middle_grey() {
        let adj = Adjustments {
            contrast: 50.0,
            ..Default::default()
        };
        let out = adjust_rgb([0.5, 0.5, 0.5], &adj);
        assert_eq!(out, [0.5, 0.5, 0.5]);
    }

    #[test]
    fn temperature_warms_and_cools() {
        let warm = Adjustments {
            temperature: 100.0,
            ..Default::default()
        };
        let out = adjust_rgb([0.5, 0.5, 0.5], &warm);
        assert!(out[0] > 0.5 && out[2] < 0.5);
    }

    #[test]
    fn saturation_minus_100_greys_out() {
        let adj = Adjustments {
            saturation: -100.0,
            ..Default::default()
        };
        let out = adjust_rgb([0.8, 0.2, 0.1], &adj);
        assert!((out[0] - out[1]).abs() < 1e-6);
        assert!((out[1] - out[2]).abs() < 1e-6);
    }

    #[test]
    fn output_is_clamped() {
        let adj = Adjustments {
            exposure: 5.0,
            ..Default::default()
        };
        let out = adjust_rgb([0.9, 0.9, 0.9], &adj);
        assert_eq!(out, [1.0, 1.0, 1.0]);
    }
}
