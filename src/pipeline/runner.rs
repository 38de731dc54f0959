//! Pipeline Runner
//!
//! Orchestrates the fixed stage order — decode → rotate → crop → adjust →
//! curve → mask — with a fingerprint-keyed stage cache. Each stage's
//! fingerprint hashes the serialized inputs of every prior stage, so a
//! re-render resumes from the longest cached prefix and recomputes only the
//! stages whose parameters changed. Entries are evicted least-recently-used
//! against a byte budget.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

use crate::catalog::edit::EditState;
use crate::errors::{Error, Result};
use crate::pipeline::buffer::{BufferPool, PixelBuf};
use crate::pipeline::curve::CurveCache;
use crate::pipeline::decode::{DecodeIntent, SourceFormat, decode};
use crate::pipeline::histogram::HistogramData;
use crate::pipeline::resize::{ResizeFilter, fit_long_edge, fit_short_edge};
use crate::pipeline::{adjust, crop, curve, histogram, mask, resize, rotate};
use crate::settings::EngineSettings;
use crate::util::CancelToken;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    Decode,
    Rotate,
    Crop,
    Adjust,
    Curve,
    Mask,
}

/// All stages, in execution order.
pub const STAGES: [RenderStage; 6] = [
    RenderStage::Decode,
    RenderStage::Rotate,
    RenderStage::Crop,
    RenderStage::Adjust,
    RenderStage::Curve,
    RenderStage::Mask,
];

/// Output sizing and fidelity for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTier {
    /// Interactive drag: small, bilinear, embedded previews allowed.
    Draft,
    /// Cached grid thumbnail.
    Thumbnail,
    /// Cached display preview, 1× or 2× the configured long edge.
    Preview { scale: u8 },
    /// Sensor-resolution render for export; the exporter resizes afterwards.
    Export,
}

impl RenderTier {
    fn decode_intent(self) -> DecodeIntent {
        match self {
            RenderTier::Draft | RenderTier::Thumbnail => DecodeIntent::Thumbnail,
            RenderTier::Preview { .. } | RenderTier::Export => DecodeIntent::Full,
        }
    }
}

/// One render request against the runner.
pub struct RenderRequest<'a> {
    pub asset_id: &'a str,
    pub bytes: &'a [u8],
    pub format: SourceFormat,
    pub tier: RenderTier,
    pub edit: &'a EditState,
    pub token: CancelToken,
}

/// Final pixels plus the histogram side channel.
pub struct RenderOutput {
    pub pixels: Arc<PixelBuf>,
    pub histogram: HistogramData,
}

/// An encoded render ready for the blob store.
pub struct EncodedRender {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub histogram: HistogramData,
}

// ============================================================================
// Stage cache
// ============================================================================

type StageKey = (String, RenderStage, u64);

struct CacheEntry {
    pixels: Arc<PixelBuf>,
    bytes: usize,
    last_used: u64,
}

/// LRU cache of per-stage outputs keyed by `(asset, stage, fingerprint)`.
struct StageCache {
    entries: FxHashMap<StageKey, CacheEntry>,
    total_bytes: usize,
    budget: usize,
    tick: u64,
}

impl StageCache {
    fn new(budget: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            total_bytes: 0,
            budget,
            tick: 0,
        }
    }

    fn get(&mut self, key: &StageKey) -> Option<Arc<PixelBuf>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.pixels.clone()
        })
    }

    /// Inserts an entry, returning buffers displaced by LRU eviction so the
    /// caller can recycle their storage.
    fn insert(&mut self, key: StageKey, pixels: Arc<PixelBuf>) -> Vec<Arc<PixelBuf>> {
        let bytes = pixels.byte_size();
        if bytes > self.budget {
            return Vec::new();
        }
        self.tick += 1;
        let mut displaced = Vec::new();
        if let Some(old) = self.entries.insert(
            key,
            CacheEntry {
                pixels,
                bytes,
                last_used: self.tick,
            },
        ) {
            self.total_bytes -= old.bytes;
            displaced.push(old.pixels);
        }
        self.total_bytes += bytes;
        self.evict_to_budget(&mut displaced);
        displaced
    }

    fn evict_to_budget(&mut self, displaced: &mut Vec<Arc<PixelBuf>>) {
        while self.total_bytes > self.budget {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.total_bytes -= entry.bytes;
                displaced.push(entry.pixels);
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Stateful pipeline orchestrator shared by the render workers and the
/// exporter.
pub struct PipelineRunner {
    cache: Mutex<StageCache>,
    curves: Mutex<CurveCache>,
    /// Recycled backing storage for stage working copies.
    pool: BufferPool,
    draft_short_edge: u32,
    thumbnail_short_edge: u32,
    preview_long_edge: u32,
    timeout: std::time::Duration,
}

impl PipelineRunner {
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            cache: Mutex::new(StageCache::new(settings.stage_cache_budget_bytes)),
            curves: Mutex::new(CurveCache::new()),
            pool: BufferPool::new(8),
            draft_short_edge: settings.draft_short_edge,
            thumbnail_short_edge: settings.thumbnail_short_edge,
            preview_long_edge: settings.preview_long_edge,
            timeout: settings.render_timeout,
        }
    }

    /// Drops every cached intermediate. Called on folder change.
    pub fn clear_caches(&self) {
        self.cache.lock().clear();
        self.curves.lock().clear();
    }

    /// Drops cached intermediates for one asset (e.g. before rescan updates).
    pub fn invalidate_asset(&self, asset_id: &str) {
        let mut cache = self.cache.lock();
        let stale: Vec<StageKey> = cache
            .entries
            .keys()
            .filter(|(id, _, _)| id == asset_id)
            .cloned()
            .collect();
        for key in stale {
            if let Some(entry) = cache.entries.remove(&key) {
                cache.total_bytes -= entry.bytes;
            }
        }
    }

    /// Runs the pipeline and returns final pixels plus the histogram.
    pub fn render(&self, req: &RenderRequest<'_>) -> Result<RenderOutput> {
        let started = Instant::now();
        let fps = self.fingerprints(req);

        // Longest cached prefix.
        let mut start_stage = 0usize;
        let mut current: Option<Arc<PixelBuf>> = None;
        {
            let mut cache = self.cache.lock();
            for (i, stage) in STAGES.iter().enumerate().rev() {
                let key = (req.asset_id.to_string(), *stage, fps[i]);
                if let Some(hit) = cache.get(&key) {
                    current = Some(hit);
                    start_stage = i + 1;
                    break;
                }
            }
        }

        for (i, stage) in STAGES.iter().enumerate().skip(start_stage) {
            req.token.check()?;
            self.check_deadline(started)?;

            let output = self.run_stage(*stage, current.as_ref(), req)?;
            let displaced = self
                .cache
                .lock()
                .insert((req.asset_id.to_string(), *stage, fps[i]), output.clone());
            for buffer in displaced {
                // Sole-owner buffers go back to the arena.
                if let Ok(owned) = Arc::try_unwrap(buffer) {
                    self.pool.release(owned);
                }
            }
            current = Some(output);
        }

        let pixels = current.expect("pipeline produced no stages");
        let histogram = histogram::compute(&pixels);
        Ok(RenderOutput { pixels, histogram })
    }

    /// Runs the pipeline and encodes the result as a JPEG.
    pub fn render_encoded(&self, req: &RenderRequest<'_>, quality: u8) -> Result<EncodedRender> {
        let output = self.render(req)?;
        req.token.check()?;
        let bytes = crate::pipeline::encode::encode_jpeg(&output.pixels, quality)?;
        Ok(EncodedRender {
            bytes,
            width: output.pixels.width(),
            height: output.pixels.height(),
            histogram: output.histogram,
        })
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        let elapsed = started.elapsed();
        if elapsed > self.timeout {
            return Err(Error::Timeout {
                operation: "render",
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn run_stage(
        &self,
        stage: RenderStage,
        input: Option<&Arc<PixelBuf>>,
        req: &RenderRequest<'_>,
    ) -> Result<Arc<PixelBuf>> {
        match stage {
            RenderStage::Decode => {
                let decoded = decode(req.bytes, req.format, req.tier.decode_intent(), &req.token)?;
                Ok(Arc::new(self.tier_resize(decoded, req.tier)))
            }
            RenderStage::Rotate => {
                let input = stage_input(input)?;
                let rotation = &req.edit.crop_transform.rotation;
                if rotation.is_identity() {
                    return Ok(input.clone());
                }
                rotate::apply(input, rotation.total_degrees(), &req.token).map(Arc::new)
            }
            RenderStage::Crop => {
                let input = stage_input(input)?;
                match &req.edit.crop_transform.crop {
                    Some(rect) if !rect.is_full() => crop::apply(input, rect).map(Arc::new),
                    _ => Ok(input.clone()),
                }
            }
            RenderStage::Adjust => {
                let input = stage_input(input)?;
                if req.edit.adjustments.is_neutral() {
                    return Ok(input.clone());
                }
                let mut out = self.working_copy(input);
                adjust::apply(&mut out, &req.edit.adjustments, &req.token)?;
                Ok(Arc::new(out))
            }
            RenderStage::Curve => {
                let input = stage_input(input)?;
                if req.edit.tone_curve.is_identity() {
                    return Ok(input.clone());
                }
                let lut = self.curves.lock().get_or_build(&req.edit.tone_curve)?;
                let mut out = self.working_copy(input);
                curve::apply_lut(&mut out, &lut, &req.token)?;
                Ok(Arc::new(out))
            }
            RenderStage::Mask => {
                let input = stage_input(input)?;
                if req.edit.masks.is_empty() {
                    return Ok(input.clone());
                }
                let mut out = self.working_copy(input);
                mask::apply(&mut out, &req.edit.masks, &req.token)?;
                Ok(Arc::new(out))
            }
        }
    }

    /// Mutable copy of a stage input, backed by the arena.
    fn working_copy(&self, input: &PixelBuf) -> PixelBuf {
        let mut out = self.pool.acquire(input.width(), input.height());
        out.data_mut().copy_from_slice(input.data());
        out
    }

    fn tier_resize(&self, decoded: PixelBuf, tier: RenderTier) -> PixelBuf {
        let (w, h) = (decoded.width(), decoded.height());
        let (target, filter) = match tier {
            RenderTier::Draft => (fit_short_edge(w, h, self.draft_short_edge), ResizeFilter::Bilinear),
            RenderTier::Thumbnail => (
                fit_short_edge(w, h, self.thumbnail_short_edge),
                ResizeFilter::Bilinear,
            ),
            RenderTier::Preview { scale } => (
                fit_long_edge(w, h, self.preview_long_edge * u32::from(scale.max(1))),
                ResizeFilter::Lanczos3,
            ),
            RenderTier::Export => return decoded,
        };
        resize::apply(&decoded, target.0, target.1, filter)
    }

    // ── Fingerprints ─────────────────────────────────────────────────────────

    fn fingerprints(&self, req: &RenderRequest<'_>) -> [u64; 6] {
        let seed = {
            let mut hasher = Xxh3::new();
            hasher.update(req.format.as_str().as_bytes());
            hasher.update(&tier_tag(req.tier));
            hasher.update(&self.draft_short_edge.to_le_bytes());
            hasher.update(&self.thumbnail_short_edge.to_le_bytes());
            hasher.update(&self.preview_long_edge.to_le_bytes());
            hasher.digest()
        };

        let rotate_fp = chain(seed, &req.edit.crop_transform.rotation);
        let crop_fp = chain(rotate_fp, &req.edit.crop_transform.crop);
        let adjust_fp = chain(crop_fp, &req.edit.adjustments);
        let curve_fp = chain(adjust_fp, &req.edit.tone_curve);
        let mask_fp = chain(curve_fp, &req.edit.masks);
        [seed, rotate_fp, crop_fp, adjust_fp, curve_fp, mask_fp]
    }
}

fn stage_input(input: Option<&Arc<PixelBuf>>) -> Result<&Arc<PixelBuf>> {
    input.ok_or_else(|| Error::Encode("stage executed without input".to_string()))
}

fn tier_tag(tier: RenderTier) -> [u8; 2] {
    match tier {
        RenderTier::Draft => [0, 0],
        RenderTier::Thumbnail => [1, 0],
        RenderTier::Preview { scale } => [2, scale],
        RenderTier::Export => [3, 0],
    }
}

/// Chains a serialized parameter block onto a previous fingerprint.
fn chain<T: Serialize>(prev: u64, params: &T) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&prev.to_le_bytes());
    match serde_json::to_vec(params) {
        Ok(json) => hasher.update(&json),
        Err(_) => hasher.update(b"<unserializable>"),
    }
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;
    use crate::testing;

    fn runner() -> PipelineRunner {
        PipelineRunner::new(&EngineSettings::default())
    }

    fn request<'a>(bytes: &'a [u8], edit: &'a EditState) -> RenderRequest<'a> {
        RenderRequest {
            asset_id: "asset-1",
            bytes,
            format: SourceFormat::Jpeg,
            tier: RenderTier::Export,
            edit,
            token: CancelToken::new(),
        }
    }

    #[test]
    fn default_edit_renders_source_pixels() {
        let jpeg = testing::grey_jpeg(8, 8, 120);
        let edit = EditState::default();
        let out = runner().render(&request(&jpeg, &edit)).unwrap();
        assert_eq!((out.pixels.width(), out.pixels.height()), (8, 8));
        let px = out.pixels.get(4, 4);
        assert!((px[0] - 120.0 / 255.0).abs() < 0.02);
    }

    #[test]
    fn cached_prefix_is_reused_across_renders() {
        let jpeg = testing::grey_jpeg(8, 8, 120);
        let runner = runner();

        let edit = EditState::default();
        let first = runner.render(&request(&jpeg, &edit)).unwrap();

        // Change only the adjustments; decode/rotate/crop outputs are reused.
        let mut edited = EditState::default();
        edited.adjustments.exposure = 1.0;
        let second = runner.render(&request(&jpeg, &edited)).unwrap();

        let before = first.pixels.get(4, 4)[0];
        let after = second.pixels.get(4, 4)[0];
        assert!(after > before, "exposure increase must brighten");
    }

    #[test]
    fn cancellation_propagates() {
        let jpeg = testing::grey_jpeg(8, 8, 120);
        let edit = EditState::default();
        let token = CancelToken::new();
        token.cancel();
        let req = RenderRequest {
            token,
            ..request(&jpeg, &edit)
        };
        assert!(matches!(runner().render(&req), Err(Error::Cancelled)));
    }
}
