//! Engine Settings
//!
//! Configuration for every tunable budget and timing window in the engine.
//! Callers construct a settings value once and override individual fields:
//!
//! ```rust
//! use literoom::settings::EngineSettings;
//!
//! let settings = EngineSettings {
//!     thumbnail_workers: 2,
//!     ..Default::default()
//! };
//! # let _ = settings;
//! ```

use std::time::Duration;

/// Configuration options for the catalog engine.
///
/// | Field | Description | Default |
/// |-------|-------------|---------|
/// | `thumbnail_short_edge` | Thumbnail short-edge size in px | `256` |
/// | `preview_long_edge` | Preview long-edge size in px | `2560` |
/// | `draft_short_edge` | Draft-render short edge during slider drag | `800` |
/// | `memory_cache_entries` | Blob-store memory LRU capacity | `150` |
/// | `disk_cache_budget_bytes` | Persistent blob tier byte budget | 1 GiB |
/// | `stage_cache_budget_bytes` | Pipeline stage-cache byte budget | 256 MiB |
/// | `queue_cap` | Scheduler queue bound before eviction | `200` |
/// | `thumbnail_workers` | Render worker threads | `1` |
/// | `export_workers` | Export worker threads | `2` |
/// | `draft_delay` | Mutation → draft render debounce | 16 ms |
/// | `full_delay` | Quiescence → full render debounce | 300 ms |
/// | `render_timeout` | Per-render / per-decode budget | 30 s |
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Short-edge target for cached thumbnails.
    pub thumbnail_short_edge: u32,

    /// Long-edge target for cached previews (the `preview1x` operation).
    /// `preview2x` doubles this.
    pub preview_long_edge: u32,

    /// Short-edge target for draft renders during interactive slider drag.
    pub draft_short_edge: u32,

    /// JPEG quality used for cached thumbnails and previews.
    pub cache_jpeg_quality: u8,

    /// Number of entries the blob store keeps in its in-memory LRU tier.
    pub memory_cache_entries: usize,

    /// Byte budget for the persistent blob tier; exceeding it evicts
    /// least-recently-accessed blobs.
    pub disk_cache_budget_bytes: u64,

    /// Byte budget for the pipeline runner's intermediate stage cache.
    pub stage_cache_budget_bytes: usize,

    /// Scheduler queue bound. Above it, worst-priority entries are evicted.
    pub queue_cap: usize,

    /// Fixed pool size for thumbnail/preview render workers.
    ///
    /// One worker keeps completion order predictable; raise it for batch
    /// regeneration on fast storage.
    pub thumbnail_workers: usize,

    /// Worker threads used by the exporter.
    pub export_workers: usize,

    /// Delay from the first pending mutation to a draft render.
    pub draft_delay: Duration,

    /// Quiescence window after the last mutation before a full render.
    pub full_delay: Duration,

    /// Per-render and per-decode time budget.
    pub render_timeout: Duration,

    /// Scanner batch size delivered to the index per transaction.
    pub scan_batch: usize,

    /// Scanner yields the thread after this many files.
    pub scan_yield_every: usize,

    /// Minimum interval between scan progress callbacks.
    pub progress_min_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            thumbnail_short_edge: 256,
            preview_long_edge: 2560,
            draft_short_edge: 800,
            cache_jpeg_quality: 85,
            memory_cache_entries: 150,
            disk_cache_budget_bytes: 1024 * 1024 * 1024,
            stage_cache_budget_bytes: 256 * 1024 * 1024,
            queue_cap: 200,
            thumbnail_workers: 1,
            export_workers: 2,
            draft_delay: Duration::from_millis(16),
            full_delay: Duration::from_millis(300),
            render_timeout: Duration::from_secs(30),
            scan_batch: 50,
            scan_yield_every: 100,
            progress_min_interval: Duration::from_millis(100),
        }
    }
}
