//! Local Mask Kernel
//!
//! Evaluates linear and radial gradient masks in normalized image
//! coordinates and blends per-mask adjustments into an already globally
//! adjusted buffer. Feathering uses the quintic smootherstep so gradients
//! have zero second-derivative at both ends.

use glam::Vec2;

use crate::errors::Result;
use crate::pipeline::adjust::adjust_rgb;
use crate::pipeline::buffer::PixelBuf;
use crate::pipeline::params::{LinearMask, MaskBlendMode, MaskStack, RadialMask};
use crate::util::CancelToken;

/// Below this weight a mask contributes nothing to a pixel.
pub const MASK_EPSILON: f32 = 1e-4;

/// Quintic smootherstep on a pre-clamped parameter.
#[inline]
#[must_use]
pub fn smootherstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * t * (t * (6.0 * t - 15.0) + 10.0)
}

/// Linear-gradient value at a normalized point: 1 at `start`, 0 at `end`.
#[must_use]
pub fn eval_linear(mask: &LinearMask, p: Vec2) -> f32 {
    let start = Vec2::new(mask.start.x, mask.start.y);
    let end = Vec2::new(mask.end.x, mask.end.y);
    let d = end - start;
    let dd = d.dot(d);
    if dd <= f32::EPSILON {
        return 1.0;
    }
    let t = ((p - start).dot(d) / dd).clamp(0.0, 1.0);
    1.0 - smootherstep(t)
}

/// Radial-gradient value at a normalized point.
#[must_use]
pub fn eval_radial(mask: &RadialMask, p: Vec2) -> f32 {
    let center = Vec2::new(mask.center.x, mask.center.y);
    let local = p - center;

    // Rotate into the ellipse frame (by -rotation).
    let (sin, cos) = mask.rotation.sin_cos();
    let x = local.x * cos + local.y * sin;
    let y = -local.x * sin + local.y * cos;

    let d = ((x / mask.radius_x).powi(2) + (y / mask.radius_y).powi(2)).sqrt();
    let inner = 1.0 - mask.feather;

    let value = if d <= inner {
        1.0
    } else if d >= 1.0 {
        0.0
    } else {
        1.0 - smootherstep((d - inner) / mask.feather)
    };

    if mask.invert { 1.0 - value } else { value }
}

/// Combines a mask's raw value with the previous effective weight.
#[inline]
fn combine(mode: MaskBlendMode, acc: f32, value: f32) -> f32 {
    match mode {
        MaskBlendMode::Multiply => acc * value,
        MaskBlendMode::Screen => acc + value - acc * value,
        MaskBlendMode::Add => (acc + value).min(1.0),
        MaskBlendMode::Max => acc.max(value),
    }
}

#[inline]
fn blend_identity(mode: MaskBlendMode) -> f32 {
    match mode {
        MaskBlendMode::Multiply => 1.0,
        _ => 0.0,
    }
}

enum MaskRef<'a> {
    Linear(&'a LinearMask),
    Radial(&'a RadialMask),
}

impl MaskRef<'_> {
    #[inline]
    fn eval(&self, p: Vec2) -> f32 {
        match self {
            MaskRef::Linear(m) => eval_linear(m, p),
            MaskRef::Radial(m) => eval_radial(m, p),
        }
    }

    #[inline]
    fn adjustments(&self) -> &crate::pipeline::params::Adjustments {
        match self {
            MaskRef::Linear(m) => &m.adjustments,
            MaskRef::Radial(m) => &m.adjustments,
        }
    }
}

/// Blends every enabled mask's adjustments into the buffer, in place.
///
/// Masks are visited in list order (linear first, then radial). The stack's
/// blend mode turns each mask's raw gradient value into an effective weight
/// against the previously accumulated weight; the colour lerp uses that
/// effective weight. Pixels where a mask's weight falls below
/// [`MASK_EPSILON`] skip its adjustment entirely.
pub fn apply(buf: &mut PixelBuf, stack: &MaskStack, token: &CancelToken) -> Result<()> {
    if stack.is_empty() {
        return Ok(());
    }

    let masks: Vec<MaskRef<'_>> = stack
        .linear
        .iter()
        .filter(|m| m.enabled)
        .map(MaskRef::Linear)
        .chain(stack.radial.iter().filter(|m| m.enabled).map(MaskRef::Radial))
        .collect();

    let width = buf.width();
    let height = buf.height();
    let inv_w = 1.0 / width as f32;
    let inv_h = 1.0 / height as f32;
    let mode = stack.blend_mode;

    for y in 0..height {
        if y % 16 == 0 {
            token.check()?;
        }
        let ny = (y as f32 + 0.5) * inv_h;
        for x in 0..width {
            let nx = (x as f32 + 0.5) * inv_w;
            let p = Vec2::new(nx, ny);

            let mut px = buf.get(x, y);
            let mut acc = blend_identity(mode);
            let mut first = true;

            for mask in &masks {
                let raw = mask.eval(p);
                let weight = if first {
                    first = false;
                    raw
                } else {
                    combine(mode, acc, raw)
                };
                acc = weight;

                if weight <= MASK_EPSILON {
                    continue;
                }
                let adj = mask.adjustments();
                if adj.is_neutral() {
                    continue;
                }
                let adjusted = adjust_rgb(px, adj);
                for c in 0..3 {
                    px[c] += (adjusted[c] - px[c]) * weight;
                }
            }

            buf.set(x, y, px);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::{Adjustments, MaskPoint};
    use uuid::Uuid;

    fn radial(feather: f32, invert: bool) -> RadialMask {
        RadialMask {
            id: Uuid::new_v4(),
            center: MaskPoint::new(0.5, 0.5),
            radius_x: 0.5,
            radius_y: 0.5,
            rotation: 0.0,
            feather,
            invert,
            enabled: true,
            adjustments: Adjustments::default(),
        }
    }

    #[test]
    fn hard_radial_is_binary() {
        let mask = radial(0.0, false);
        assert_eq!(eval_radial(&mask, Vec2::new(0.5, 0.5)), 1.0);
        assert_eq!(eval_radial(&mask, Vec2::new(0.5, 0.7)), 1.0);
        assert_eq!(eval_radial(&mask, Vec2::new(0.99, 0.99)), 0.0);
    }

    #[test]
    fn inverted_radial_flips() {
        let mask = radial(0.0, true);
        assert_eq!(eval_radial(&mask, Vec2::new(0.5, 0.5)), 0.0);
        assert_eq!(eval_radial(&mask, Vec2::new(0.99, 0.99)), 1.0);
    }

    #[test]
    fn feathered_radial_ramps() {
        let mask = radial(0.5, false);
        let inner = eval_radial(&mask, Vec2::new(0.5, 0.6)); // d = 0.2 < 0.5
        let mid = eval_radial(&mask, Vec2::new(0.5, 0.875)); // d = 0.75
        let outer = eval_radial(&mask, Vec2::new(0.5, 0.999));
        assert_eq!(inner, 1.0);
        assert!(mid > 0.0 && mid < 1.0);
        assert!(outer < 0.05);
    }

    #[test]
    fn linear_fades_start_to_end() {
        let mask = LinearMask {
            id: Uuid::new_v4(),
            start: MaskPoint::new(0.0, 0.0),
            end: MaskPoint::new(1.0, 0.0),
            feather: 0.5,
            enabled: true,
            adjustments: Adjustments::default(),
        };
        assert_eq!(eval_linear(&mask, Vec2::new(0.0, 0.5)), 1.0);
        assert_eq!(eval_linear(&mask, Vec2::new(1.0, 0.5)), 0.0);
        let mid = eval_linear(&mask, Vec2::new(0.5, 0.5));
        assert!((mid - 0.5).abs() < 1e-5);
    }

    #[test]
    fn blend_modes_combine_as_documented() {
        assert!((combine(MaskBlendMode::Multiply, 0.5, 0.5) - 0.25).abs() < 1e-6);
        assert!((combine(MaskBlendMode::Screen, 0.5, 0.5) - 0.75).abs() < 1e-6);
        assert!((combine(MaskBlendMode::Add, 0.7, 0.7) - 1.0).abs() < 1e-6);
        assert!((combine(MaskBlendMode::Max, 0.5, 0.8) - 0.8).abs() < 1e-6);
    }
}
