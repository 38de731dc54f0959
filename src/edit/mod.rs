//! Edit State & Render Coordination
//!
//! [`EditCoordinator`] owns the current asset's edit document, the
//! per-folder cache of loaded/edited documents, copy/paste, and the
//! debounced two-tier re-render policy. It is deliberately free of threads
//! and timers: the host loop calls [`EditCoordinator::poll`] with the
//! current instant and forwards the returned directives to the scheduler,
//! which keeps the debounce windows deterministic and testable.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::catalog::edit::{EditGroups, EditState};
use crate::catalog::index::AssetIndex;
use crate::catalog::model::AssetId;
use crate::errors::{Error, Result};
use crate::pipeline::params::{CropTransform, LinearMask, MaskStack, RadialMask, ToneCurve};
use crate::pipeline::runner::RenderTier;
use crate::settings::EngineSettings;

/// The ten adjustment knobs, for the single-knob mutation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Knob {
    Temperature,
    Tint,
    Exposure,
    Contrast,
    Highlights,
    Shadows,
    Whites,
    Blacks,
    Vibrance,
    Saturation,
}

/// A render the coordinator wants executed.
#[derive(Debug, Clone)]
pub struct RenderDirective {
    pub asset_id: AssetId,
    pub edit: EditState,
    pub tier: RenderTier,
    pub generation: u64,
}

#[derive(Debug)]
struct PendingRender {
    first_mutation_at: Instant,
    last_mutation_at: Instant,
    draft_emitted: bool,
}

/// Owner of the current edit document and the re-render debounce.
pub struct EditCoordinator {
    current_asset: Option<AssetId>,
    current: EditState,
    /// Documents touched this folder session.
    cache: FxHashMap<AssetId, EditState>,
    /// Last persisted form of each document, for dirty derivation.
    persisted: FxHashMap<AssetId, EditState>,
    clipboard: Option<(EditState, EditGroups)>,
    pending: Option<PendingRender>,
    /// Bumped on every mutation; stale render completions are dropped
    /// against it.
    generation: u64,
    draft_delay: Duration,
    full_delay: Duration,
}

impl EditCoordinator {
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            current_asset: None,
            current: EditState::default(),
            cache: FxHashMap::default(),
            persisted: FxHashMap::default(),
            clipboard: None,
            pending: None,
            generation: 0,
            draft_delay: settings.draft_delay,
            full_delay: settings.full_delay,
        }
    }

    // ========================================================================
    // Document lifecycle
    // ========================================================================

    /// Makes `id` the current asset, loading its persisted document (or
    /// defaults) unless this session already has it cached.
    pub fn load_for_asset(&mut self, index: &AssetIndex, id: &str) -> Result<&EditState> {
        self.stash_current();

        let document = if let Some(cached) = self.cache.get(id) {
            cached.clone()
        } else {
            let loaded = index.load_edit(id)?;
            if let Some(persisted) = &loaded {
                self.persisted.insert(id.to_string(), persisted.clone());
            }
            loaded.unwrap_or_default()
        };

        self.current_asset = Some(id.to_string());
        self.current = document;
        self.pending = None;
        Ok(&self.current)
    }

    fn stash_current(&mut self) {
        if let Some(asset) = &self.current_asset {
            self.cache.insert(asset.clone(), self.current.clone());
        }
    }

    #[must_use]
    pub fn current_asset(&self) -> Option<&str> {
        self.current_asset.as_deref()
    }

    #[must_use]
    pub fn current(&self) -> &EditState {
        &self.current
    }

    /// Dirty means the document differs from what the index holds (or from
    /// defaults when nothing was ever persisted).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let Some(asset) = &self.current_asset else {
            return false;
        };
        match self.persisted.get(asset) {
            Some(persisted) => self.current != *persisted,
            None => !self.current.is_default(),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Applies a mutation to the current document and schedules re-renders.
    pub fn mutate(&mut self, now: Instant, f: impl FnOnce(&mut EditState)) -> Result<()> {
        if self.current_asset.is_none() {
            return Err(Error::NotFound("no asset loaded for editing".to_string()));
        }
        f(&mut self.current);
        self.current.adjustments.clamp_ranges();
        self.current.validate()?;

        self.generation += 1;
        self.stash_current();
        match &mut self.pending {
            Some(pending) => {
                pending.last_mutation_at = now;
                pending.draft_emitted = false;
            }
            None => {
                self.pending = Some(PendingRender {
                    first_mutation_at: now,
                    last_mutation_at: now,
                    draft_emitted: false,
                });
            }
        }
        Ok(())
    }

    /// Sets one adjustment knob (clamped to its range).
    pub fn set_knob(&mut self, now: Instant, knob: Knob, value: f32) -> Result<()> {
        self.mutate(now, |edit| {
            let slot = match knob {
                Knob::Temperature => &mut edit.adjustments.temperature,
                Knob::Tint => &mut edit.adjustments.tint,
                Knob::Exposure => &mut edit.adjustments.exposure,
                Knob::Contrast => &mut edit.adjustments.contrast,
                Knob::Highlights => &mut edit.adjustments.highlights,
                Knob::Shadows => &mut edit.adjustments.shadows,
                Knob::Whites => &mut edit.adjustments.whites,
                Knob::Blacks => &mut edit.adjustments.blacks,
                Knob::Vibrance => &mut edit.adjustments.vibrance,
                Knob::Saturation => &mut edit.adjustments.saturation,
            };
            *slot = value;
        })
    }

    pub fn set_tone_curve(&mut self, now: Instant, curve: ToneCurve) -> Result<()> {
        self.mutate(now, |edit| edit.tone_curve = curve)
    }

    pub fn set_crop_transform(&mut self, now: Instant, transform: CropTransform) -> Result<()> {
        self.mutate(now, |edit| edit.crop_transform = transform)
    }

    pub fn add_linear_mask(&mut self, now: Instant, mask: LinearMask) -> Result<()> {
        self.mutate(now, |edit| edit.masks.linear.push(mask))
    }

    pub fn add_radial_mask(&mut self, now: Instant, mask: RadialMask) -> Result<()> {
        self.mutate(now, |edit| edit.masks.radial.push(mask))
    }

    /// Updates a mask in place by id. Fails with `NotFound` for unknown ids.
    pub fn update_mask(&mut self, now: Instant, mask_id: uuid::Uuid, f: impl FnOnce(&mut MaskStack, usize, bool)) -> Result<()> {
        let (idx, linear) = self.find_mask(mask_id)?;
        self.mutate(now, |edit| f(&mut edit.masks, idx, linear))
    }

    pub fn delete_mask(&mut self, now: Instant, mask_id: uuid::Uuid) -> Result<()> {
        let (idx, linear) = self.find_mask(mask_id)?;
        self.mutate(now, |edit| {
            if linear {
                edit.masks.linear.remove(idx);
            } else {
                edit.masks.radial.remove(idx);
            }
        })
    }

    pub fn toggle_mask_enabled(&mut self, now: Instant, mask_id: uuid::Uuid) -> Result<()> {
        let (idx, linear) = self.find_mask(mask_id)?;
        self.mutate(now, |edit| {
            if linear {
                edit.masks.linear[idx].enabled = !edit.masks.linear[idx].enabled;
            } else {
                edit.masks.radial[idx].enabled = !edit.masks.radial[idx].enabled;
            }
        })
    }

    fn find_mask(&self, mask_id: uuid::Uuid) -> Result<(usize, bool)> {
        if let Some(idx) = self.current.masks.linear.iter().position(|m| m.id == mask_id) {
            return Ok((idx, true));
        }
        if let Some(idx) = self.current.masks.radial.iter().position(|m| m.id == mask_id) {
            return Ok((idx, false));
        }
        Err(Error::NotFound(format!("mask {mask_id}")))
    }

    /// Restores the whole document to defaults.
    pub fn reset(&mut self, now: Instant) -> Result<()> {
        self.mutate(now, |edit| *edit = EditState::default())
    }

    /// Restores one section to defaults.
    pub fn reset_section(&mut self, now: Instant, groups: EditGroups) -> Result<()> {
        self.mutate(now, |edit| edit.reset_groups(groups))
    }

    // ========================================================================
    // Copy / paste
    // ========================================================================

    /// Copies the selected groups of an asset's document to the clipboard.
    pub fn copy(&mut self, index: &AssetIndex, source_id: &str, groups: EditGroups) -> Result<()> {
        let source = self.document_for(index, source_id)?;
        self.clipboard = Some((source, groups));
        Ok(())
    }

    /// Pastes the clipboard groups onto a target document. Pasting onto the
    /// current asset schedules a re-render; pasting elsewhere only updates
    /// the session cache (persisted on save).
    pub fn paste(&mut self, index: &AssetIndex, now: Instant, target_id: &str) -> Result<()> {
        let (source, groups) = self
            .clipboard
            .clone()
            .ok_or_else(|| Error::NotFound("clipboard is empty".to_string()))?;

        if self.current_asset.as_deref() == Some(target_id) {
            return self.mutate(now, |edit| edit.copy_groups(&source, groups));
        }

        let mut target = self.document_for(index, target_id)?;
        target.copy_groups(&source, groups);
        self.cache.insert(target_id.to_string(), target);
        Ok(())
    }

    fn document_for(&mut self, index: &AssetIndex, id: &str) -> Result<EditState> {
        if self.current_asset.as_deref() == Some(id) {
            return Ok(self.current.clone());
        }
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let loaded = index.load_edit(id)?;
        if let Some(persisted) = &loaded {
            self.persisted.insert(id.to_string(), persisted.clone());
        }
        Ok(loaded.unwrap_or_default())
    }

    // ========================================================================
    // Persistence & teardown
    // ========================================================================

    /// Persists the current document. The index invalidates the asset's
    /// cached-render flags in the same transaction; the engine follows up
    /// with a background thumbnail regeneration.
    pub fn save(&mut self, index: &AssetIndex) -> Result<AssetId> {
        let asset = self
            .current_asset
            .clone()
            .ok_or_else(|| Error::NotFound("no asset loaded for editing".to_string()))?;
        index.save_edit(&asset, &self.current)?;
        self.persisted.insert(asset.clone(), self.current.clone());
        self.cache.insert(asset.clone(), self.current.clone());
        Ok(asset)
    }

    /// Saves the cached document of a non-current asset (paste targets).
    pub fn save_asset(&mut self, index: &AssetIndex, id: &str) -> Result<()> {
        let Some(document) = self.cache.get(id).cloned() else {
            return Err(Error::NotFound(format!("no session edits for {id}")));
        };
        index.save_edit(id, &document)?;
        self.persisted.insert(id.to_string(), document);
        Ok(())
    }

    /// Folder change: drops the session cache, current asset, clipboard,
    /// and any pending renders.
    pub fn clear(&mut self) {
        self.current_asset = None;
        self.current = EditState::default();
        self.cache.clear();
        self.persisted.clear();
        self.clipboard = None;
        self.pending = None;
        self.generation += 1;
    }

    #[must_use]
    pub fn cached_edit_count(&self) -> usize {
        self.cache.len()
    }

    // ========================================================================
    // Debounced re-render pump
    // ========================================================================

    /// Emits due render directives for the current instant.
    ///
    /// Policy: a draft render once the draft window has elapsed since the
    /// latest mutation burst began, re-armed by further mutations; a full
    /// render once mutations have been quiescent for the full window. A new
    /// mutation supersedes any full render still in flight via the
    /// generation counter.
    pub fn poll(&mut self, now: Instant) -> Vec<RenderDirective> {
        let Some(asset) = self.current_asset.clone() else {
            self.pending = None;
            return Vec::new();
        };
        let Some(pending) = &mut self.pending else {
            return Vec::new();
        };

        let mut directives = Vec::new();

        if !pending.draft_emitted
            && now.duration_since(pending.first_mutation_at) >= self.draft_delay
        {
            pending.draft_emitted = true;
            directives.push(RenderDirective {
                asset_id: asset.clone(),
                edit: self.current.clone(),
                tier: RenderTier::Draft,
                generation: self.generation,
            });
        }

        if now.duration_since(pending.last_mutation_at) >= self.full_delay {
            directives.push(RenderDirective {
                asset_id: asset,
                edit: self.current.clone(),
                tier: RenderTier::Preview { scale: 1 },
                generation: self.generation,
            });
            self.pending = None;
        }

        directives
    }

    /// True when a completed render is still authoritative: right asset,
    /// newest generation, and no newer mutation pending.
    #[must_use]
    pub fn accepts_result(&self, asset_id: &str, generation: u64) -> bool {
        self.current_asset.as_deref() == Some(asset_id) && generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator_and_index() -> (EditCoordinator, AssetIndex) {
        (
            EditCoordinator::new(&EngineSettings::default()),
            AssetIndex::open_in_memory().unwrap(),
        )
    }

    #[test]
    fn draft_then_full_debounce() {
        let (mut coord, index) = coordinator_and_index();
        coord.load_for_asset(&index, "a").unwrap();

        let t0 = Instant::now();
        coord.set_knob(t0, Knob::Exposure, 1.0).unwrap();

        // Too early for anything.
        assert!(coord.poll(t0 + Duration::from_millis(1)).is_empty());

        // Draft fires after the draft window.
        let drafts = coord.poll(t0 + Duration::from_millis(20));
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].tier, RenderTier::Draft);

        // Full fires after quiescence; pending clears.
        let fulls = coord.poll(t0 + Duration::from_millis(400));
        assert_eq!(fulls.len(), 1);
        assert!(matches!(fulls[0].tier, RenderTier::Preview { scale: 1 }));
        assert!(coord.poll(t0 + Duration::from_millis(800)).is_empty());
    }

    #[test]
    fn new_mutation_invalidates_older_generation() {
        let (mut coord, index) = coordinator_and_index();
        coord.load_for_asset(&index, "a").unwrap();

        let t0 = Instant::now();
        coord.set_knob(t0, Knob::Exposure, 1.0).unwrap();
        let first = coord.poll(t0 + Duration::from_millis(400)).remove(0);

        coord.set_knob(t0 + Duration::from_millis(500), Knob::Contrast, 10.0).unwrap();
        assert!(!coord.accepts_result("a", first.generation));
    }

    #[test]
    fn dirty_tracks_persisted_snapshot() {
        let (mut coord, index) = coordinator_and_index();
        coord.load_for_asset(&index, "a").unwrap();
        assert!(!coord.is_dirty());

        coord.set_knob(Instant::now(), Knob::Exposure, 0.5).unwrap();
        assert!(coord.is_dirty());

        coord.save(&index).unwrap();
        assert!(!coord.is_dirty());

        // Reloading from the index round-trips the saved document.
        coord.clear();
        coord.load_for_asset(&index, "a").unwrap();
        assert!((coord.current().adjustments.exposure - 0.5).abs() < f32::EPSILON);
        assert!(!coord.is_dirty());
    }

    #[test]
    fn copy_paste_applies_selected_groups() {
        let (mut coord, index) = coordinator_and_index();
        coord.load_for_asset(&index, "source").unwrap();
        coord.set_knob(Instant::now(), Knob::Exposure, 2.0).unwrap();
        coord.save(&index).unwrap();

        coord
            .copy(
                &index,
                "source",
                EditGroups {
                    basic: true,
                    ..Default::default()
                },
            )
            .unwrap();

        coord.load_for_asset(&index, "target").unwrap();
        coord.paste(&index, Instant::now(), "target").unwrap();
        assert!((coord.current().adjustments.exposure - 2.0).abs() < f32::EPSILON);
        assert!(coord.is_dirty());
    }

    #[test]
    fn clear_empties_the_session() {
        let (mut coord, index) = coordinator_and_index();
        coord.load_for_asset(&index, "a").unwrap();
        coord.set_knob(Instant::now(), Knob::Exposure, 1.0).unwrap();

        coord.clear();
        assert_eq!(coord.cached_edit_count(), 0);
        assert!(coord.current_asset().is_none());
        assert!(coord.poll(Instant::now()).is_empty());
    }
}
