//! Exporter
//!
//! Renders picked (or explicitly selected) assets through the full pipeline
//! at sensor resolution, applies the optional long-edge resize, encodes
//! JPEGs at the requested quality, and writes them into the destination
//! folder with template-derived, collision-safe filenames. Per-asset
//! failures are captured and logged; the batch always runs to completion
//! and reports a summary.

pub mod template;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::catalog::index::AssetIndex;
use crate::catalog::model::{Asset, AssetId, FlagFilter, SortDirection, SortField};
use crate::errors::{Error, Result};
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::resize::{self, ResizeFilter};
use crate::pipeline::runner::{PipelineRunner, RenderRequest, RenderTier};
use crate::settings::EngineSettings;
use crate::util::CancelToken;
use crate::vfs::{Handle, HostFs};
pub use template::FilenameTemplate;

/// Which assets an export covers.
#[derive(Debug, Clone)]
pub enum ExportScope {
    /// Every asset flagged as a pick, in capture order.
    Picks,
    /// An explicit selection.
    Selection(Vec<AssetId>),
}

/// Output sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    None,
    LongEdge(u32),
}

/// One export batch.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub destination: Handle,
    pub template: String,
    pub quality: u8,
    pub resize: ResizeMode,
    pub scope: ExportScope,
}

/// Progress snapshot delivered per finished asset.
#[derive(Debug, Clone)]
pub struct ExportProgress {
    pub current: usize,
    pub total: usize,
    pub current_filename: String,
}

/// One asset that failed to export.
#[derive(Debug)]
pub struct ExportFailure {
    pub asset_id: AssetId,
    pub message: String,
}

/// Batch result: partial success is success.
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub success_count: usize,
    pub failures: Vec<ExportFailure>,
}

/// Export engine; holds only configuration.
pub struct Exporter {
    workers: usize,
}

impl Exporter {
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            workers: settings.export_workers.max(1),
        }
    }

    /// Runs an export batch.
    ///
    /// `source_root` is the granted handle of the folder the assets live in.
    pub fn export(
        &self,
        fs: &dyn HostFs,
        index: &AssetIndex,
        runner: &PipelineRunner,
        folder_id: &str,
        source_root: &Handle,
        options: &ExportOptions,
        token: &CancelToken,
        on_progress: impl Fn(&ExportProgress) + Send + Sync,
    ) -> Result<ExportSummary> {
        let template = FilenameTemplate::parse(&options.template)?;
        let assets = self.resolve_scope(index, folder_id, &options.scope)?;
        let total = assets.len();
        log::info!("exporting {total} asset(s) with {} worker(s)", self.workers);

        // Sequence numbers are assigned up front so they are stable however
        // the parallel workers interleave.
        let jobs: Vec<(usize, Asset)> = assets.into_iter().enumerate().collect();

        let reserved: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let done = AtomicUsize::new(0);
        let failures: Mutex<Vec<ExportFailure>> = Mutex::new(Vec::new());
        let successes = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("literoom-export-{i}"))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        pool.install(|| {
            rayon::scope(|scope| {
                for (seq_index, asset) in &jobs {
                    let template = &template;
                    let reserved = &reserved;
                    let done = &done;
                    let failures = &failures;
                    let successes = &successes;
                    let on_progress = &on_progress;
                    scope.spawn(move |_| {
                        if token.is_cancelled() {
                            return;
                        }
                        let filename = match self.export_one(
                            fs,
                            index,
                            runner,
                            source_root,
                            options,
                            template,
                            reserved,
                            asset,
                            seq_index + 1,
                            token,
                        ) {
                            Ok(filename) => {
                                successes.fetch_add(1, Ordering::SeqCst);
                                filename
                            }
                            Err(e) if e.is_cancelled() => return,
                            Err(e) => {
                                // The silent-failure rule: log before moving on.
                                log::error!("export failed for {}: {e}", asset.id);
                                failures.lock().push(ExportFailure {
                                    asset_id: asset.id.clone(),
                                    message: e.to_string(),
                                });
                                asset.filename.clone()
                            }
                        };
                        let current = done.fetch_add(1, Ordering::SeqCst) + 1;
                        on_progress(&ExportProgress {
                            current,
                            total,
                            current_filename: filename,
                        });
                    });
                }
            });
        });

        token.check()?;
        Ok(ExportSummary {
            success_count: successes.load(Ordering::SeqCst),
            failures: failures.into_inner(),
        })
    }

    fn resolve_scope(
        &self,
        index: &AssetIndex,
        folder_id: &str,
        scope: &ExportScope,
    ) -> Result<Vec<Asset>> {
        match scope {
            ExportScope::Picks => index.list_assets(
                folder_id,
                FlagFilter::Pick,
                SortField::CaptureDate,
                SortDirection::Ascending,
                usize::MAX >> 1,
                0,
            ),
            ExportScope::Selection(ids) => {
                let mut assets = Vec::with_capacity(ids.len());
                for id in ids {
                    match index.get_asset(id)? {
                        Some(asset) => assets.push(asset),
                        None => return Err(Error::NotFound(format!("asset {id}"))),
                    }
                }
                Ok(assets)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn export_one(
        &self,
        fs: &dyn HostFs,
        index: &AssetIndex,
        runner: &PipelineRunner,
        source_root: &Handle,
        options: &ExportOptions,
        template: &FilenameTemplate,
        reserved: &Mutex<HashSet<String>>,
        asset: &Asset,
        sequence: usize,
        token: &CancelToken,
    ) -> Result<String> {
        token.check()?;

        let format = asset
            .format()
            .ok_or_else(|| Error::Decode(crate::errors::DecodeError::UnsupportedFormat(
                asset.extension.clone(),
            )))?;

        // 1. Source bytes through the folder handle.
        let file_handle = fs.resolve(source_root, &asset.path)?;
        let bytes = fs.open_file(&file_handle)?;

        // 2. Full-resolution pipeline with the persisted edit document.
        let edit = index.load_edit(&asset.id)?.unwrap_or_default();
        let output = runner.render(&RenderRequest {
            asset_id: &asset.id,
            bytes: &bytes,
            format,
            tier: RenderTier::Export,
            edit: &edit,
            token: token.clone(),
        })?;

        // 3. Optional long-edge resize.
        let pixels = match options.resize {
            ResizeMode::None => output.pixels,
            ResizeMode::LongEdge(edge) => {
                let (w, h) =
                    resize::fit_long_edge(output.pixels.width(), output.pixels.height(), edge);
                std::sync::Arc::new(resize::apply(&output.pixels, w, h, ResizeFilter::Lanczos3))
            }
        };

        // 4. Encode.
        token.check()?;
        let encoded = encode_jpeg(&pixels, options.quality)?;

        // 5. Collision-safe write.
        let stem = template.format(file_stem(&asset.filename), sequence, asset.capture_date);
        let filename = reserve_name(fs, &options.destination, &stem, reserved)?;
        let mut writer = fs.create_file(&options.destination, &filename)?;
        writer.write_all(&encoded)?;
        writer.close()?;
        Ok(filename)
    }
}

fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map_or(filename, |(stem, _)| stem)
}

/// Picks `stem.jpg`, or `stem-1.jpg`, `stem-2.jpg`, … on collision with the
/// destination or with names already reserved by this batch.
fn reserve_name(
    fs: &dyn HostFs,
    destination: &Handle,
    stem: &str,
    reserved: &Mutex<HashSet<String>>,
) -> Result<String> {
    let mut reserved = reserved.lock();
    let mut suffix = 0usize;
    loop {
        let candidate = if suffix == 0 {
            format!("{stem}.jpg")
        } else {
            format!("{stem}-{suffix}.jpg")
        };
        if !reserved.contains(&candidate) && !fs.exists(destination, &candidate)? {
            reserved.insert(candidate.clone());
            return Ok(candidate);
        }
        suffix += 1;
    }
}
