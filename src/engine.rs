//! Engine Core Module
//!
//! [`Engine`] is the central coordinator binding every subsystem: the asset
//! index, blob store, handle store, pipeline runner, scheduler, edit
//! coordinator, and exporter. It exposes the command surface a UI binds to
//! (open/rescan/clear folder, culling, selection, edit mutations, export)
//! and owns the strict folder-change cleanup ordering.
//!
//! # Architecture
//!
//! The engine is single-threaded from the caller's perspective: commands
//! take `&mut self`, and the host loop drives [`Engine::pump`] with the
//! current instant to drain scheduler completions and fire debounced
//! renders. Pixel work happens on the scheduler's worker pool; workers see
//! only snapshots and communicate back over the event channel.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64;

use crate::catalog::edit::EditGroups;
use crate::catalog::index::AssetIndex;
use crate::catalog::model::{
    Asset, AssetId, Flag, FlagCounts, FlagFilter, Folder, RenderKind, SortDirection, SortField,
};
use crate::catalog::scanner::{ScanOutcome, ScanProgress, Scanner};
use crate::edit::EditCoordinator;
use crate::errors::{Error, Result};
use crate::export::{ExportOptions, ExportProgress, ExportSummary, Exporter};
use crate::pipeline::histogram::HistogramData;
use crate::pipeline::runner::{PipelineRunner, RenderRequest, RenderTier};
use crate::scheduler::{
    EditRenderPayload, JobExecutor, JobOutput, Operation, Priority, QueuedJob, Scheduler,
    SchedulerEvent, Viewport,
};
use crate::settings::EngineSettings;
use crate::store::blob::BlobStore;
use crate::store::handles::HandleStore;
use crate::util::CancelToken;
use crate::vfs::{Handle, HostFs, PermissionState, UserGesture};

/// Which view the UI is in; kept here so `next`/`prev` and folder cleanup
/// behave the same for every frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Grid,
    Loupe,
    Edit,
}

/// Notifications the engine surfaces to the UI from [`Engine::pump`].
#[derive(Debug)]
pub enum EngineEvent {
    ThumbnailReady {
        asset_id: AssetId,
    },
    PreviewReady {
        asset_id: AssetId,
        kind: RenderKind,
    },
    /// A draft or full edit render for the current asset.
    EditRenderReady {
        asset_id: AssetId,
        bytes: Arc<Vec<u8>>,
        width: u32,
        height: u32,
        histogram: Option<HistogramData>,
        full_quality: bool,
    },
    RenderFailed {
        asset_id: AssetId,
        message: String,
    },
}

// ============================================================================
// Render executor — what the worker pool actually runs
// ============================================================================

struct RenderExecutor {
    fs: Arc<dyn HostFs>,
    index: Arc<AssetIndex>,
    blobs: Arc<BlobStore>,
    runner: Arc<PipelineRunner>,
    folder_root: RwLock<Option<Handle>>,
    cache_quality: u8,
}

impl RenderExecutor {
    fn source_bytes(&self, asset: &Asset) -> Result<Vec<u8>> {
        let root = self
            .folder_root
            .read()
            .clone()
            .ok_or_else(|| Error::NotFound("no active folder".to_string()))?;
        let handle = self.fs.resolve(&root, &asset.path)?;
        self.fs.open_file(&handle)
    }
}

impl JobExecutor for RenderExecutor {
    fn execute(&self, job: &QueuedJob, token: &CancelToken) -> Result<JobOutput> {
        let asset = self
            .index
            .get_asset(&job.asset_id)?
            .ok_or_else(|| Error::NotFound(job.asset_id.clone()))?;
        let format = asset.format().ok_or_else(|| {
            Error::Decode(crate::errors::DecodeError::UnsupportedFormat(
                asset.extension.clone(),
            ))
        })?;
        let bytes = self.source_bytes(&asset)?;
        token.check()?;

        match job.operation.render_kind() {
            // Cached render kinds: render, encode, persist, mark ready.
            Some(kind) => {
                let tier = match kind {
                    RenderKind::Thumbnail => RenderTier::Thumbnail,
                    RenderKind::Preview1x => RenderTier::Preview { scale: 1 },
                    RenderKind::Preview2x => RenderTier::Preview { scale: 2 },
                };
                let edit = self.index.load_edit(&asset.id)?.unwrap_or_default();
                let encoded = self.runner.render_encoded(
                    &RenderRequest {
                        asset_id: &asset.id,
                        bytes: &bytes,
                        format,
                        tier,
                        edit: &edit,
                        token: token.clone(),
                    },
                    self.cache_quality,
                )?;

                // No side effects once the token fires.
                token.check()?;
                let key = self.blobs.put(&asset.id, kind, encoded.bytes)?;
                self.index.mark_cache_ready(&asset.id, kind, &key)?;
                Ok(JobOutput {
                    blob_key: Some(key),
                    bytes: None,
                    width: encoded.width,
                    height: encoded.height,
                    histogram: Some(encoded.histogram),
                    edit_tier: None,
                })
            }
            // Edit renders carry their document snapshot and go straight
            // back to the coordinator, bypassing the blob store.
            None => {
                let payload = job
                    .edit
                    .as_ref()
                    .ok_or_else(|| Error::NotFound("edit render without payload".to_string()))?;
                let encoded = self.runner.render_encoded(
                    &RenderRequest {
                        asset_id: &asset.id,
                        bytes: &bytes,
                        format,
                        tier: payload.tier,
                        edit: &payload.edit,
                        token: token.clone(),
                    },
                    self.cache_quality,
                )?;
                token.check()?;
                Ok(JobOutput {
                    blob_key: None,
                    bytes: Some(Arc::new(encoded.bytes)),
                    width: encoded.width,
                    height: encoded.height,
                    histogram: Some(encoded.histogram),
                    edit_tier: Some(payload.tier),
                })
            }
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The catalog engine instance.
pub struct Engine {
    settings: EngineSettings,
    fs: Arc<dyn HostFs>,
    index: Arc<AssetIndex>,
    blobs: Arc<BlobStore>,
    handles: HandleStore,
    runner: Arc<PipelineRunner>,
    scheduler: Scheduler,
    exporter: Exporter,
    executor: Arc<RenderExecutor>,
    coordinator: EditCoordinator,

    current_folder: Option<Folder>,
    /// Current grid ordering, for viewport priority mapping and next/prev.
    asset_order: Vec<AssetId>,
    selection: Vec<AssetId>,
    view_mode: ViewMode,
    filter: FlagFilter,
    sort: (SortField, SortDirection),
}

impl Engine {
    /// Opens the engine against a storage directory and a host filesystem.
    ///
    /// Startup reconciles the blob store against cache metadata and
    /// classifies saved folders, but never silently restores one — the UI
    /// presents recents and the user picks.
    pub fn open(storage_dir: &Path, fs: Arc<dyn HostFs>, settings: EngineSettings) -> Result<Self> {
        let index = Arc::new(AssetIndex::open(storage_dir)?);
        let blobs = Arc::new(BlobStore::open(storage_dir, &settings)?);
        let handles = HandleStore::open(storage_dir)?;
        let runner = Arc::new(PipelineRunner::new(&settings));

        // Blob ↔ metadata reconcile: orphan blobs are deleted, metadata
        // whose blob vanished loses its ready flags.
        let referenced: std::collections::HashSet<String> =
            index.all_cache_keys()?.into_iter().collect();
        let report = blobs.reconcile(&referenced)?;
        let cleared = index.reconcile_cache(&report.live_keys)?;
        if report.orphans_removed > 0 || cleared > 0 {
            log::info!(
                "blob reconcile: removed {} orphan blob(s), cleared {} stale ready flag(s)",
                report.orphans_removed,
                cleared
            );
        }

        let executor = Arc::new(RenderExecutor {
            fs: fs.clone(),
            index: index.clone(),
            blobs: blobs.clone(),
            runner: runner.clone(),
            folder_root: RwLock::new(None),
            cache_quality: settings.cache_jpeg_quality,
        });
        let job_executor: Arc<dyn JobExecutor> = executor.clone();
        let scheduler = Scheduler::new(&settings, job_executor);
        let exporter = Exporter::new(&settings);
        let coordinator = EditCoordinator::new(&settings);

        Ok(Self {
            settings,
            fs,
            index,
            blobs,
            handles,
            runner,
            scheduler,
            exporter,
            executor,
            coordinator,
            current_folder: None,
            asset_order: Vec::new(),
            selection: Vec::new(),
            view_mode: ViewMode::Grid,
            filter: FlagFilter::All,
            sort: (SortField::CaptureDate, SortDirection::Ascending),
        })
    }

    // ========================================================================
    // Folder lifecycle
    // ========================================================================

    /// Saved folders with their current authorization states, most recently
    /// scanned first.
    pub fn recent_folders(&self) -> Result<Vec<(Folder, PermissionState)>> {
        let folders = self.index.recent_folders(20)?;
        folders
            .into_iter()
            .map(|folder| {
                let state = self.handles.classify(self.fs.as_ref(), &folder.handle_key)?;
                Ok((folder, state))
            })
            .collect()
    }

    /// Opens a folder from a freshly selected handle and scans it.
    pub fn open_folder(
        &mut self,
        handle: Handle,
        name: &str,
        token: &CancelToken,
        on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutcome> {
        self.cleanup_session();

        let folder_id = format!("folder-{:016x}", xxh3_64(handle.as_bytes()));
        self.handles.save(&folder_id, &handle)?;
        self.index.upsert_folder(&Folder {
            id: folder_id.clone(),
            name: name.to_string(),
            handle_key: folder_id.clone(),
            last_scan_at: None,
        })?;

        *self.executor.folder_root.write() = Some(handle.clone());
        let outcome = self.scan_into_index(&handle, &folder_id, token, on_progress)?;

        self.current_folder = self.index.get_folder(&folder_id)?;
        self.refresh_order()?;
        self.seed_thumbnails();
        Ok(outcome)
    }

    /// Re-opens a saved folder. `prompt`-state folders need a user gesture
    /// for re-authorization; deep-link restore passes `None` and requires
    /// the handle to still be granted.
    pub fn open_recent_folder(
        &mut self,
        folder_id: &str,
        gesture: Option<&UserGesture>,
        token: &CancelToken,
        on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutcome> {
        let folder = self
            .index
            .get_folder(folder_id)?
            .ok_or_else(|| Error::NotFound(format!("folder {folder_id}")))?;
        let handle = self
            .handles
            .load(&folder.handle_key)?
            .ok_or_else(|| Error::NotFound(format!("handle {}", folder.handle_key)))?;

        let mut state = self.fs.query(&handle);
        if state == PermissionState::Prompt {
            if let Some(gesture) = gesture {
                state = self.fs.request(&handle, gesture);
            }
        }
        if state != PermissionState::Granted {
            return Err(Error::PermissionDenied(folder.name.clone()));
        }

        self.cleanup_session();
        *self.executor.folder_root.write() = Some(handle.clone());
        let outcome = self.scan_into_index(&handle, folder_id, token, on_progress)?;

        self.current_folder = self.index.get_folder(folder_id)?;
        self.refresh_order()?;
        self.seed_thumbnails();
        Ok(outcome)
    }

    /// Rescans the current folder, reconciling new and changed files.
    pub fn rescan_folder(
        &mut self,
        token: &CancelToken,
        on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutcome> {
        let folder = self
            .current_folder
            .clone()
            .ok_or_else(|| Error::NotFound("no active folder".to_string()))?;
        let handle = self
            .handles
            .load(&folder.handle_key)?
            .ok_or_else(|| Error::NotFound(format!("handle {}", folder.handle_key)))?;

        // Outstanding thumbnails may reference assets about to change.
        self.scheduler.clear_all();
        self.runner.clear_caches();

        let outcome = self.scan_into_index(&handle, &folder.id, token, on_progress)?;
        self.refresh_order()?;
        self.seed_thumbnails();
        Ok(outcome)
    }

    /// Removes the current folder's catalog data: assets, edits, cache
    /// metadata, cached blobs, and the saved handle.
    pub fn clear_folder(&mut self) -> Result<()> {
        let Some(folder) = self.current_folder.clone() else {
            return Ok(());
        };
        self.cleanup_session();

        for asset_id in self.index.asset_ids(&folder.id)? {
            self.blobs.remove(&asset_id)?;
        }
        self.index.remove_folder(&folder.id)?;
        self.handles.remove(&folder.handle_key)?;
        Ok(())
    }

    /// The ordered cleanup every folder change runs: cancel scheduler work,
    /// clear its queue, drop the edit session, drop the memory blob tier,
    /// and stop reusing stage-cache intermediates.
    fn cleanup_session(&mut self) {
        self.scheduler.clear_all();
        self.coordinator.clear();
        self.blobs.clear_memory();
        self.runner.clear_caches();
        *self.executor.folder_root.write() = None;
        self.current_folder = None;
        self.asset_order.clear();
        self.selection.clear();
        self.view_mode = ViewMode::Grid;
    }

    fn scan_into_index(
        &self,
        handle: &Handle,
        folder_id: &str,
        token: &CancelToken,
        on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutcome> {
        let scanner = Scanner::new(&self.settings);
        let index = &self.index;
        let outcome = scanner.scan(
            self.fs.as_ref(),
            handle,
            folder_id,
            token,
            |batch| index.bulk_put(&batch),
            on_progress,
        )?;
        self.index
            .touch_folder_scanned(folder_id, chrono::Utc::now())?;
        log::info!(
            "scan of {folder_id}: {} file(s), {} dir(s), {} error(s)",
            outcome.files_found,
            outcome.directories_visited,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    fn seed_thumbnails(&self) {
        for asset_id in &self.asset_order {
            self.scheduler.enqueue(
                asset_id.clone(),
                Operation::Thumbnail,
                Priority::Background,
                None,
            );
        }
    }

    fn refresh_order(&mut self) -> Result<()> {
        let Some(folder) = &self.current_folder else {
            self.asset_order.clear();
            return Ok(());
        };
        let assets = self.index.list_assets(
            &folder.id,
            self.filter,
            self.sort.0,
            self.sort.1,
            usize::MAX >> 1,
            0,
        )?;
        self.asset_order = assets.into_iter().map(|a| a.id).collect();
        Ok(())
    }

    // ========================================================================
    // Grid queries, culling, selection
    // ========================================================================

    #[must_use]
    pub fn current_folder(&self) -> Option<&Folder> {
        self.current_folder.as_ref()
    }

    pub fn list_assets(&self, limit: usize, offset: usize) -> Result<Vec<Asset>> {
        let folder = self
            .current_folder
            .as_ref()
            .ok_or_else(|| Error::NotFound("no active folder".to_string()))?;
        self.index
            .list_assets(&folder.id, self.filter, self.sort.0, self.sort.1, limit, offset)
    }

    pub fn flag_counts(&self) -> Result<FlagCounts> {
        let folder = self
            .current_folder
            .as_ref()
            .ok_or_else(|| Error::NotFound("no active folder".to_string()))?;
        self.index.count_flags(&folder.id)
    }

    pub fn set_flag(&mut self, asset_id: &str, flag: Flag) -> Result<()> {
        self.index.set_flag(asset_id, flag)?;
        // Flag changes never touch pixels; no render work follows.
        if self.filter != FlagFilter::All {
            self.refresh_order()?;
        }
        Ok(())
    }

    pub fn set_filter(&mut self, filter: FlagFilter) -> Result<()> {
        self.filter = filter;
        self.refresh_order()
    }

    pub fn set_sort(&mut self, field: SortField, direction: SortDirection) -> Result<()> {
        self.sort = (field, direction);
        self.refresh_order()
    }

    #[must_use]
    pub fn asset_order(&self) -> &[AssetId] {
        &self.asset_order
    }

    pub fn select(&mut self, asset_id: &str) {
        self.selection = vec![asset_id.to_string()];
    }

    /// Extends the selection to cover the ordered range between the last
    /// selected item and `asset_id`.
    pub fn select_range(&mut self, asset_id: &str) {
        let Some(anchor) = self.selection.last().cloned() else {
            self.select(asset_id);
            return;
        };
        let a = self.asset_order.iter().position(|id| *id == anchor);
        let b = self.asset_order.iter().position(|id| id == asset_id);
        if let (Some(a), Some(b)) = (a, b) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            self.selection = self.asset_order[lo..=hi].to_vec();
        }
    }

    pub fn select_all(&mut self) {
        self.selection = self.asset_order.clone();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    #[must_use]
    pub fn selection(&self) -> &[AssetId] {
        &self.selection
    }

    /// Moves the single selection forward in grid order.
    pub fn next(&mut self) {
        self.step(1);
    }

    /// Moves the single selection backward in grid order.
    pub fn prev(&mut self) {
        self.step(-1);
    }

    fn step(&mut self, delta: isize) {
        let Some(current) = self.selection.first() else {
            return;
        };
        let Some(pos) = self.asset_order.iter().position(|id| id == current) else {
            return;
        };
        let next = pos.saturating_add_signed(delta);
        if let Some(id) = self.asset_order.get(next) {
            self.selection = vec![id.clone()];
        }
    }

    #[must_use]
    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn enter_loupe(&mut self) {
        self.view_mode = ViewMode::Loupe;
    }

    pub fn exit_to_grid(&mut self) {
        self.view_mode = ViewMode::Grid;
    }

    /// Enters the editor on an asset, loading its edit document.
    pub fn enter_edit(&mut self, asset_id: &str) -> Result<()> {
        self.coordinator.load_for_asset(&self.index, asset_id)?;
        self.select(asset_id);
        self.view_mode = ViewMode::Edit;
        Ok(())
    }

    // ========================================================================
    // Cached renders
    // ========================================================================

    /// Fetches a cached render, enqueueing regeneration on miss or when the
    /// cached copy was invalidated by an edit.
    pub fn cached_render(
        &self,
        asset_id: &str,
        kind: RenderKind,
        priority: Priority,
    ) -> Result<Option<Arc<Vec<u8>>>> {
        let metadata = self.index.cache_metadata(asset_id)?;
        let ready = match kind {
            RenderKind::Thumbnail => metadata.thumbnail_ready,
            RenderKind::Preview1x => metadata.preview1x_ready,
            RenderKind::Preview2x => metadata.preview2x_ready,
        };
        if ready {
            if let Some(blob) = self.blobs.get(asset_id, kind) {
                return Ok(Some(blob));
            }
        }
        let operation = match kind {
            RenderKind::Thumbnail => Operation::Thumbnail,
            RenderKind::Preview1x => Operation::Preview1x,
            RenderKind::Preview2x => Operation::Preview2x,
        };
        self.scheduler
            .enqueue(asset_id.to_string(), operation, priority, None);
        Ok(None)
    }

    /// Applies a viewport move to queued thumbnail priorities.
    pub fn update_viewport(&self, viewport: &Viewport) {
        self.scheduler
            .reprioritize(viewport, &self.asset_order, Operation::Thumbnail);
    }

    // ========================================================================
    // Editing
    // ========================================================================

    #[must_use]
    pub fn edits(&mut self) -> &mut EditCoordinator {
        &mut self.coordinator
    }

    #[must_use]
    pub fn edits_ref(&self) -> &EditCoordinator {
        &self.coordinator
    }

    /// Persists the current edit document and regenerates the thumbnail in
    /// the background.
    pub fn save_edits(&mut self) -> Result<()> {
        let asset_id = self.coordinator.save(&self.index)?;
        self.scheduler.enqueue(
            asset_id,
            Operation::Thumbnail,
            Priority::Background,
            None,
        );
        Ok(())
    }

    pub fn copy_edits(&mut self, source_id: &str, groups: EditGroups) -> Result<()> {
        self.coordinator.copy(&self.index, source_id, groups)
    }

    pub fn paste_edits(&mut self, now: Instant, target_id: &str) -> Result<()> {
        self.coordinator.paste(&self.index, now, target_id)?;
        if self.coordinator.current_asset() != Some(target_id) {
            self.coordinator.save_asset(&self.index, target_id)?;
            self.scheduler.enqueue(
                target_id.to_string(),
                Operation::Thumbnail,
                Priority::Background,
                None,
            );
        }
        Ok(())
    }

    pub fn reset_edits(&mut self, now: Instant) -> Result<()> {
        self.coordinator.reset(now)
    }

    // ========================================================================
    // Event pump
    // ========================================================================

    /// Drains scheduler completions and fires due debounced renders.
    ///
    /// The host loop calls this once per tick with the current instant and
    /// routes the returned events into the UI.
    pub fn pump(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        while let Ok(event) = self.scheduler.events().try_recv() {
            let SchedulerEvent::Completed {
                asset_id,
                operation,
                generation,
                result,
                ..
            } = event;
            match result {
                Ok(output) => match operation.render_kind() {
                    Some(RenderKind::Thumbnail) => {
                        events.push(EngineEvent::ThumbnailReady { asset_id });
                    }
                    Some(kind) => {
                        events.push(EngineEvent::PreviewReady { asset_id, kind });
                    }
                    None => {
                        // Edit render: only the newest generation for the
                        // current asset is authoritative.
                        let generation = generation.unwrap_or(0);
                        if !self.coordinator.accepts_result(&asset_id, generation) {
                            log::debug!("dropping stale edit render for {asset_id}");
                            continue;
                        }
                        if let Some(bytes) = output.bytes {
                            events.push(EngineEvent::EditRenderReady {
                                asset_id,
                                bytes,
                                width: output.width,
                                height: output.height,
                                histogram: output.histogram,
                                full_quality: output.edit_tier != Some(RenderTier::Draft),
                            });
                        }
                    }
                },
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    events.push(EngineEvent::RenderFailed {
                        asset_id,
                        message: e.to_string(),
                    });
                }
            }
        }

        for directive in self.coordinator.poll(now) {
            self.scheduler.enqueue(
                directive.asset_id,
                Operation::EditRender,
                Priority::Visible,
                Some(EditRenderPayload {
                    edit: directive.edit,
                    tier: directive.tier,
                    generation: directive.generation,
                }),
            );
        }

        events
    }

    /// Blocks until the scheduler has no queued or running work. Test and
    /// shutdown aid.
    pub fn wait_for_renders(&self) {
        self.scheduler.wait_quiescent();
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.scheduler.queue_len()
    }

    #[must_use]
    pub fn memory_cache_len(&self) -> usize {
        self.blobs.memory_len()
    }

    #[must_use]
    pub fn cached_edit_count(&self) -> usize {
        self.coordinator.cached_edit_count()
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Runs an export batch against the current folder.
    pub fn export(
        &self,
        options: &ExportOptions,
        token: &CancelToken,
        on_progress: impl Fn(&ExportProgress) + Send + Sync,
    ) -> Result<ExportSummary> {
        let folder = self
            .current_folder
            .as_ref()
            .ok_or_else(|| Error::NotFound("no active folder".to_string()))?;
        let root = self
            .executor
            .folder_root
            .read()
            .clone()
            .ok_or_else(|| Error::NotFound("no active folder handle".to_string()))?;
        self.exporter.export(
            self.fs.as_ref(),
            &self.index,
            &self.runner,
            &folder.id,
            &root,
            options,
            token,
            on_progress,
        )
    }

    // ========================================================================
    // Permissions
    // ========================================================================

    /// Re-requests authorization for a saved folder under a user gesture.
    pub fn request_folder_access(
        &self,
        folder_id: &str,
        gesture: &UserGesture,
    ) -> Result<PermissionState> {
        self.handles
            .request_access(self.fs.as_ref(), folder_id, gesture)
    }
}
