//! Edit Documents
//!
//! [`EditState`] is the full set of a user's edits for one asset: the ten
//! global knobs, the tone curve, crop/rotation, and the mask stack. It
//! persists as versioned JSON inside the asset index; loading an older
//! version upgrades it field-by-field, and a version newer than this build
//! refuses to load.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};
use crate::pipeline::params::{Adjustments, CropTransform, MaskStack, ToneCurve};

/// Current on-disk schema version.
pub const EDIT_SCHEMA_VERSION: u32 = 4;

/// Which edit groups an operation touches (copy/paste, section reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditGroups {
    pub basic: bool,
    pub curve: bool,
    pub crop: bool,
    pub masks: bool,
}

impl EditGroups {
    #[must_use]
    pub fn all() -> Self {
        Self {
            basic: true,
            curve: true,
            crop: true,
            masks: true,
        }
    }
}

/// The full edit document for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditState {
    pub schema_version: u32,
    pub adjustments: Adjustments,
    pub tone_curve: ToneCurve,
    pub crop_transform: CropTransform,
    pub masks: MaskStack,
}

impl Default for EditState {
    fn default() -> Self {
        Self {
            schema_version: EDIT_SCHEMA_VERSION,
            adjustments: Adjustments::default(),
            tone_curve: ToneCurve::default(),
            crop_transform: CropTransform::default(),
            masks: MaskStack::default(),
        }
    }
}

impl EditState {
    /// True when nothing differs from a fresh document.
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Validates every embedded parameter group.
    pub fn validate(&self) -> Result<()> {
        crate::pipeline::curve::validate(&self.tone_curve.points)?;
        self.crop_transform.validate()?;
        self.masks.validate()?;
        Ok(())
    }

    /// Serializes for storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Loads from stored JSON, migrating older versions up to current.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(value)
    }

    /// Migrates a raw JSON document to the current schema and deserializes.
    pub fn from_json_value(mut value: Value) -> Result<Self> {
        let found = value
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .map_or(1, |v| v as u32);

        if found > EDIT_SCHEMA_VERSION {
            return Err(Error::SchemaUnsupported {
                found,
                supported: EDIT_SCHEMA_VERSION,
            });
        }

        let map = value
            .as_object_mut()
            .ok_or_else(|| Error::SchemaUnsupported {
                found: 0,
                supported: EDIT_SCHEMA_VERSION,
            })?;

        // Sequential upgrades. Leaf-level gaps inside existing containers
        // are filled by serde defaults; each step only guarantees the
        // containers that version introduced.
        let mut version = found;
        while version < EDIT_SCHEMA_VERSION {
            match version {
                1 => {
                    // v2 introduced cropTransform.
                    map.entry("cropTransform")
                        .or_insert_with(|| serde_json::json!({ "crop": null, "rotation": {} }));
                }
                2 => {
                    // v3 introduced linear masks.
                    map.entry("masks")
                        .or_insert_with(|| serde_json::json!({ "linear": [] }));
                }
                3 => {
                    // v4 introduced radial masks, the stack blend mode, and
                    // the straighten component of rotation.
                    if let Some(masks) = map.get_mut("masks").and_then(Value::as_object_mut) {
                        masks
                            .entry("radial")
                            .or_insert_with(|| serde_json::json!([]));
                        masks
                            .entry("blendMode")
                            .or_insert_with(|| serde_json::json!("multiply"));
                    }
                }
                _ => {}
            }
            version += 1;
        }
        map.insert(
            "schemaVersion".to_string(),
            serde_json::json!(EDIT_SCHEMA_VERSION),
        );

        let mut state: EditState = serde_json::from_value(value)?;
        state.schema_version = EDIT_SCHEMA_VERSION;
        state.adjustments.clamp_ranges();
        Ok(state)
    }

    /// Copies the selected groups from another document; untouched groups
    /// keep their current values.
    pub fn copy_groups(&mut self, source: &EditState, groups: EditGroups) {
        if groups.basic {
            self.adjustments = source.adjustments;
        }
        if groups.curve {
            self.tone_curve = source.tone_curve.clone();
        }
        if groups.crop {
            self.crop_transform = source.crop_transform;
        }
        if groups.masks {
            self.masks = source.masks.clone();
        }
    }

    /// Restores the selected groups to their defaults.
    pub fn reset_groups(&mut self, groups: EditGroups) {
        self.copy_groups(&EditState::default(), groups);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::params::CurvePoint;

    #[test]
    fn default_round_trips() {
        let state = EditState::default();
        let json = state.to_json().unwrap();
        let back = EditState::from_json(&json).unwrap();
        assert_eq!(back, state);
        assert!(back.is_default());
    }

    #[test]
    fn v1_document_migrates_to_current() {
        let v1 = serde_json::json!({
            "schemaVersion": 1,
            "adjustments": { "exposure": 1.5 },
            "toneCurve": { "points": [ {"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 1.0} ] }
        });
        let state = EditState::from_json_value(v1).unwrap();
        assert_eq!(state.schema_version, EDIT_SCHEMA_VERSION);
        assert!((state.adjustments.exposure - 1.5).abs() < f32::EPSILON);
        assert!(state.crop_transform.crop.is_none());
        assert!(state.masks.radial.is_empty());
    }

    #[test]
    fn v3_document_gains_blend_mode() {
        let v3 = serde_json::json!({
            "schemaVersion": 3,
            "masks": { "linear": [] }
        });
        let state = EditState::from_json_value(v3).unwrap();
        assert_eq!(state.schema_version, EDIT_SCHEMA_VERSION);
        assert_eq!(
            state.masks.blend_mode,
            crate::pipeline::params::MaskBlendMode::Multiply
        );
    }

    #[test]
    fn future_version_is_refused() {
        let v9 = serde_json::json!({ "schemaVersion": 9 });
        assert!(matches!(
            EditState::from_json_value(v9),
            Err(Error::SchemaUnsupported { found: 9, .. })
        ));
    }

    #[test]
    fn out_of_range_values_are_clamped_on_load() {
        let doc = serde_json::json!({
            "schemaVersion": 4,
            "adjustments": { "exposure": 12.0, "contrast": 400.0 }
        });
        let state = EditState::from_json_value(doc).unwrap();
        assert!((state.adjustments.exposure - 5.0).abs() < f32::EPSILON);
        assert!((state.adjustments.contrast - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn group_copy_is_selective() {
        let mut source = EditState::default();
        source.adjustments.exposure = 2.0;
        source.tone_curve.points.insert(1, CurvePoint::new(0.5, 0.6));

        let mut target = EditState::default();
        target.crop_transform.rotation.angle = 90.0;

        target.copy_groups(
            &source,
            EditGroups {
                basic: true,
                ..Default::default()
            },
        );
        assert!((target.adjustments.exposure - 2.0).abs() < f32::EPSILON);
        assert_eq!(target.tone_curve, ToneCurve::default());
        assert!((target.crop_transform.rotation.angle - 90.0).abs() < f32::EPSILON);
    }
}
