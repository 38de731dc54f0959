//! Edit Parameter Types
//!
//! Value types for everything the pixel pipeline can be asked to do to an
//! image: global adjustments, tone-curve control points, crop/rotation, and
//! the local mask stack. These types serialize to the versioned JSON stored in
//! the asset index, so field names are part of the persistence format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

// ============================================================================
// Global adjustments
// ============================================================================

/// The ten global tonal knobs.
///
/// `exposure` is in stops (±5); every other knob is a percentage in ±100.
/// Zero is always neutral.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Adjustments {
    pub temperature: f32,
    pub tint: f32,
    pub exposure: f32,
    pub contrast: f32,
    pub highlights: f32,
    pub shadows: f32,
    pub whites: f32,
    pub blacks: f32,
    pub vibrance: f32,
    pub saturation: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            tint: 0.0,
            exposure: 0.0,
            contrast: 0.0,
            highlights: 0.0,
            shadows: 0.0,
            whites: 0.0,
            blacks: 0.0,
            vibrance: 0.0,
            saturation: 0.0,
        }
    }
}

impl Adjustments {
    /// True when every knob sits at its neutral position.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Clamps every knob into its documented range.
    pub fn clamp_ranges(&mut self) {
        self.exposure = self.exposure.clamp(-5.0, 5.0);
        for knob in [
            &mut self.temperature,
            &mut self.tint,
            &mut self.contrast,
            &mut self.highlights,
            &mut self.shadows,
            &mut self.whites,
            &mut self.blacks,
            &mut self.vibrance,
            &mut self.saturation,
        ] {
            *knob = knob.clamp(-100.0, 100.0);
        }
    }
}

// ============================================================================
// Tone curve
// ============================================================================

/// One tone-curve control point in the unit square.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f32,
    pub y: f32,
}

impl CurvePoint {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Ordered tone-curve control points, endpoints pinned to x=0 and x=1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneCurve {
    pub points: Vec<CurvePoint>,
}

impl Default for ToneCurve {
    fn default() -> Self {
        Self {
            points: vec![CurvePoint::new(0.0, 0.0), CurvePoint::new(1.0, 1.0)],
        }
    }
}

impl ToneCurve {
    /// True for the two-point identity curve.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// Crop and rotation
// ============================================================================

/// Normalized crop rectangle relative to the post-rotation bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl CropRect {
    /// Full-frame rect, the identity crop.
    #[must_use]
    pub fn full() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    /// Validates range and non-degeneracy.
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.left) || !in_unit(self.top) {
            return Err(Error::InvalidCrop(format!(
                "origin out of range: ({}, {})",
                self.left, self.top
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidCrop("zero-area rect".to_string()));
        }
        if self.left + self.width > 1.0 + f32::EPSILON || self.top + self.height > 1.0 + f32::EPSILON
        {
            return Err(Error::InvalidCrop("rect extends past the frame".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.left == 0.0 && self.top == 0.0 && self.width == 1.0 && self.height == 1.0
    }
}

/// Rotation in degrees: a coarse angle plus a fine straighten component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rotation {
    /// Coarse angle in [-180, 180].
    pub angle: f32,
    /// Straighten in [-45, 45].
    pub straighten: f32,
}

impl Rotation {
    /// Combined rotation in degrees, clamped per component.
    #[must_use]
    pub fn total_degrees(&self) -> f32 {
        self.angle.clamp(-180.0, 180.0) + self.straighten.clamp(-45.0, 45.0)
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.total_degrees().abs() < 1e-4
    }
}

/// Crop plus rotation. `crop: None` means no crop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CropTransform {
    pub crop: Option<CropRect>,
    pub rotation: Rotation,
}

impl CropTransform {
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rotation.is_identity() && self.crop.is_none_or(|c| c.is_full())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(crop) = &self.crop {
            crop.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// Masks
// ============================================================================

/// How successive mask values combine into an effective blend weight.
///
/// Multiply intersects a mask with the coverage accumulated so far; the
/// other modes grow coverage. A single mask behaves identically under every
/// mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskBlendMode {
    #[default]
    Multiply,
    Screen,
    Add,
    Max,
}

/// A 2D point in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskPoint {
    pub x: f32,
    pub y: f32,
}

impl MaskPoint {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Linear-gradient mask: full strength at `start`, fading to zero at `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearMask {
    pub id: Uuid,
    pub start: MaskPoint,
    pub end: MaskPoint,
    /// Reserved for a future softness control; kept in [0, 1].
    pub feather: f32,
    pub enabled: bool,
    pub adjustments: Adjustments,
}

impl LinearMask {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.feather) {
            return Err(Error::InvalidMask(format!(
                "linear mask feather {} out of [0, 1]",
                self.feather
            )));
        }
        Ok(())
    }
}

/// Elliptical radial mask, optionally inverted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialMask {
    pub id: Uuid,
    pub center: MaskPoint,
    pub radius_x: f32,
    pub radius_y: f32,
    /// Ellipse rotation in radians.
    pub rotation: f32,
    pub feather: f32,
    pub invert: bool,
    pub enabled: bool,
    pub adjustments: Adjustments,
}

impl RadialMask {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.feather) {
            return Err(Error::InvalidMask(format!(
                "radial mask feather {} out of [0, 1]",
                self.feather
            )));
        }
        if self.radius_x <= 0.0 || self.radius_y <= 0.0 {
            return Err(Error::InvalidMask("non-positive radius".to_string()));
        }
        Ok(())
    }
}

/// The ordered mask stack: linear masks first, then radial, in list order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaskStack {
    pub linear: Vec<LinearMask>,
    pub radial: Vec<RadialMask>,
    pub blend_mode: MaskBlendMode,
}

impl MaskStack {
    /// True when no enabled mask would touch any pixel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.linear.iter().any(|m| m.enabled) && !self.radial.iter().any(|m| m.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        for mask in &self.linear {
            mask.validate()?;
        }
        for mask in &self.radial {
            mask.validate()?;
        }
        Ok(())
    }
}
