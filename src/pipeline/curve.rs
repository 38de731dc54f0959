//! Tone-Curve Engine
//!
//! Monotone cubic Hermite interpolation (Fritsch–Carlson) over ordered
//! control points, baked into 256-entry `u8` lookup tables. LUTs are cached
//! by a hash of the control-point sequence so slider drags that revisit a
//! shape reuse the baked table.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

use crate::errors::{Error, Result};
use crate::pipeline::buffer::PixelBuf;
use crate::pipeline::params::{CurvePoint, ToneCurve};
use crate::util::CancelToken;

/// A baked 256-entry channel lookup table.
pub type CurveLut = [u8; 256];

const IDENTITY_EPS: f32 = 1e-6;

/// Validates the curve contract: strict x-monotonicity, non-decreasing y,
/// unit-range values, endpoints pinned to x=0 and x=1.
///
/// Descending control sequences are rejected so every accepted curve maps
/// monotonically upward; there is no inverting-curve mode.
pub fn validate(points: &[CurvePoint]) -> Result<()> {
    if points.len() < 2 {
        return Ok(()); // 0 and 1 points have defined special meanings
    }
    for p in points {
        if !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y) {
            return Err(Error::InvalidCurve(format!(
                "point ({}, {}) outside the unit square",
                p.x, p.y
            )));
        }
    }
    for pair in points.windows(2) {
        if pair[1].x <= pair[0].x {
            return Err(Error::InvalidCurve(format!(
                "x values must strictly increase ({} then {})",
                pair[0].x, pair[1].x
            )));
        }
        if pair[1].y < pair[0].y {
            return Err(Error::InvalidCurve(format!(
                "y values must not decrease ({} then {})",
                pair[0].y, pair[1].y
            )));
        }
    }
    if points[0].x.abs() > IDENTITY_EPS {
        return Err(Error::InvalidCurve("first point must sit at x=0".to_string()));
    }
    if (points[points.len() - 1].x - 1.0).abs() > IDENTITY_EPS {
        return Err(Error::InvalidCurve("last point must sit at x=1".to_string()));
    }
    Ok(())
}

/// Fritsch–Carlson tangents for a validated point sequence.
fn tangents(points: &[CurvePoint]) -> Vec<f32> {
    let n = points.len();
    let mut h = vec![0.0f32; n - 1];
    let mut delta = vec![0.0f32; n - 1];
    for i in 0..n - 1 {
        h[i] = points[i + 1].x - points[i].x;
        delta[i] = (points[i + 1].y - points[i].y) / h[i];
    }

    let mut m = vec![0.0f32; n];
    m[0] = delta[0];
    m[n - 1] = delta[n - 2];
    for i in 1..n - 1 {
        if delta[i - 1] * delta[i] <= 0.0 {
            m[i] = 0.0;
        } else {
            // Weighted harmonic mean of the neighbouring secants.
            let w1 = 2.0 * h[i] + h[i - 1];
            let w2 = h[i] + 2.0 * h[i - 1];
            m[i] = (w1 + w2) / (w1 / delta[i - 1] + w2 / delta[i]);
        }
    }

    // Monotonicity enforcement: keep tangent/secant ratios inside [0, 3].
    for i in 0..n - 1 {
        if delta[i] == 0.0 {
            m[i] = 0.0;
            m[i + 1] = 0.0;
            continue;
        }
        let alpha = m[i] / delta[i];
        let beta = m[i + 1] / delta[i];
        if alpha < 0.0 {
            m[i] = 0.0;
        } else if alpha > 3.0 {
            m[i] = 3.0 * delta[i];
        }
        if beta < 0.0 {
            m[i + 1] = 0.0;
        } else if beta > 3.0 {
            m[i + 1] = 3.0 * delta[i];
        }
    }
    m
}

/// Evaluates the curve at `x ∈ [0, 1]`, clamped to the unit range.
fn eval(points: &[CurvePoint], m: &[f32], x: f32) -> f32 {
    let n = points.len();
    if x <= points[0].x {
        return points[0].y.clamp(0.0, 1.0);
    }
    if x >= points[n - 1].x {
        return points[n - 1].y.clamp(0.0, 1.0);
    }
    // Find the containing segment.
    let mut seg = 0;
    for i in 0..n - 1 {
        if x < points[i + 1].x {
            seg = i;
            break;
        }
    }

    let h = points[seg + 1].x - points[seg].x;
    let t = (x - points[seg].x) / h;
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    let y = h00 * points[seg].y + h10 * h * m[seg] + h01 * points[seg + 1].y + h11 * h * m[seg + 1];
    y.clamp(0.0, 1.0)
}

/// Bakes a LUT from a control-point sequence.
///
/// Zero points yield the identity table; a single point yields a constant.
pub fn build_lut(points: &[CurvePoint]) -> Result<CurveLut> {
    let mut lut = [0u8; 256];
    match points.len() {
        0 => {
            for (i, slot) in lut.iter_mut().enumerate() {
                *slot = i as u8;
            }
        }
        1 => {
            let v = quantize(points[0].y);
            lut.fill(v);
        }
        _ => {
            validate(points)?;
            let m = tangents(points);
            for (i, slot) in lut.iter_mut().enumerate() {
                let x = i as f32 / 255.0;
                *slot = quantize(eval(points, &m, x));
            }
        }
    }
    Ok(lut)
}

/// Quantizes a unit-range value to u8 with round-half-to-even.
#[inline]
fn quantize(y: f32) -> u8 {
    (y.clamp(0.0, 1.0) * 255.0).round_ties_even() as u8
}

/// Applies a LUT per channel, in place.
pub fn apply_lut(buf: &mut PixelBuf, lut: &CurveLut, token: &CancelToken) -> Result<()> {
    let width = buf.width() as usize;
    for (row_idx, row) in buf.data_mut().chunks_mut(width * 3).enumerate() {
        if row_idx % 64 == 0 {
            token.check()?;
        }
        for c in row.iter_mut() {
            let idx = (c.clamp(0.0, 1.0) * 255.0).round() as usize;
            *c = f32::from(lut[idx]) / 255.0;
        }
    }
    Ok(())
}

// ============================================================================
// LUT cache
// ============================================================================

/// Hash key for a control-point sequence.
#[must_use]
pub fn curve_key(curve: &ToneCurve) -> u64 {
    let mut hasher = Xxh3::new();
    for p in &curve.points {
        hasher.update(&p.x.to_bits().to_le_bytes());
        hasher.update(&p.y.to_bits().to_le_bytes());
    }
    hasher.digest()
}

/// Keyed cache of baked LUTs. Any change to the point sequence produces a
/// new key, so stale entries are never served; `clear` bounds growth on
/// folder changes.
#[derive(Default)]
pub struct CurveCache {
    luts: FxHashMap<u64, Arc<CurveLut>>,
}

impl CurveCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, curve: &ToneCurve) -> Result<Arc<CurveLut>> {
        let key = curve_key(curve);
        if let Some(lut) = self.luts.get(&key) {
            return Ok(lut.clone());
        }
        let lut = Arc::new(build_lut(&curve.points)?);
        self.luts.insert(key, lut.clone());
        Ok(lut)
    }

    pub fn clear(&mut self) {
        self.luts.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.luts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.luts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_curve_is_near_exact() {
        let lut = build_lut(&[CurvePoint::new(0.0, 0.0), CurvePoint::new(1.0, 1.0)]).unwrap();
        for (i, &v) in lut.iter().enumerate() {
            assert!((i32::from(v) - i as i32).abs() <= 1, "lut[{i}] = {v}");
        }
    }

    #[test]
    fn duplicate_x_rejected() {
        let points = [
            CurvePoint::new(0.0, 0.0),
            CurvePoint::new(0.5, 0.4),
            CurvePoint::new(0.5, 0.6),
            CurvePoint::new(1.0, 1.0),
        ];
        assert!(matches!(
            build_lut(&points),
            Err(Error::InvalidCurve(_))
        ));
    }

    #[test]
    fn descending_y_rejected() {
        let points = [
            CurvePoint::new(0.0, 1.0),
            CurvePoint::new(0.5, 0.5),
            CurvePoint::new(1.0, 0.0),
        ];
        assert!(matches!(build_lut(&points), Err(Error::InvalidCurve(_))));
    }

    #[test]
    fn empty_and_single_point_shapes() {
        let identity = build_lut(&[]).unwrap();
        assert_eq!(identity[0], 0);
        assert_eq!(identity[255], 255);

        let constant = build_lut(&[CurvePoint::new(0.3, 0.5)]).unwrap();
        assert!(constant.iter().all(|&v| v == 128));
    }

    #[test]
    fn flat_segment_stays_flat() {
        // A plateau between two rising segments must not overshoot.
        let points = [
            CurvePoint::new(0.0, 0.0),
            CurvePoint::new(0.4, 0.5),
            CurvePoint::new(0.6, 0.5),
            CurvePoint::new(1.0, 1.0),
        ];
        let lut = build_lut(&points).unwrap();
        let mid = lut[128];
        assert_eq!(mid, 128, "plateau midpoint must hold its value");
        for pair in lut.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn cache_reuses_and_invalidates() {
        let mut cache = CurveCache::new();
        let curve = ToneCurve::default();
        let a = cache.get_or_build(&curve).unwrap();
        let b = cache.get_or_build(&curve).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let mut steeper = curve.clone();
        steeper.points.insert(1, CurvePoint::new(0.5, 0.6));
        let c = cache.get_or_build(&steeper).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }
}
