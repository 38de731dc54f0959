//! Folder Scanner
//!
//! Depth-first walk over a granted folder handle, filtering for catalogable
//! extensions, batching discoveries for the index, and extracting header
//! metadata (dimensions, capture date, orientation) from a bounded file
//! prefix. Cancellation is checked per entry; per-subtree permission errors
//! are logged and skipped, while a permission error at the root aborts the
//! whole scan.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::catalog::model::{Asset, asset_id_for};
use crate::errors::{Error, Result};
use crate::pipeline::decode::{SourceFormat, probe_metadata};
use crate::settings::EngineSettings;
use crate::util::{CancelToken, Throttle};
use crate::vfs::{DirEntry, EntryKind, Handle, HostFs};

/// How much of each file the scanner reads for metadata. EXIF blocks live in
/// the leading segments of both JPEG and ARW files.
const METADATA_PREFIX_BYTES: usize = 256 * 1024;

/// Throttled progress snapshot.
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    pub files_found: usize,
    pub directories_visited: usize,
    pub current_path: String,
    pub done: bool,
}

/// Summary of a finished (or cancelled-free) scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files_found: usize,
    pub directories_visited: usize,
    /// Subtrees skipped because of permission errors.
    pub skipped_subtrees: Vec<String>,
    /// Per-file errors that did not stop the walk.
    pub errors: Vec<String>,
}

/// Recursive folder scanner.
pub struct Scanner {
    batch_size: usize,
    yield_every: usize,
    progress_interval: std::time::Duration,
}

impl Scanner {
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            batch_size: settings.scan_batch.max(1),
            yield_every: settings.scan_yield_every.max(1),
            progress_interval: settings.progress_min_interval,
        }
    }

    /// Walks `root`, delivering batches of discovered assets to `on_batch`.
    ///
    /// Rescan uses the same entry point: the index upsert refreshes file
    /// facts for known paths and inserts new ones. Files that vanished keep
    /// their rows.
    pub fn scan(
        &self,
        fs: &dyn HostFs,
        root: &Handle,
        folder_id: &str,
        token: &CancelToken,
        mut on_batch: impl FnMut(Vec<Asset>) -> Result<()>,
        mut on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        let mut throttle = Throttle::new(self.progress_interval);
        let mut batch: Vec<Asset> = Vec::with_capacity(self.batch_size);
        let mut since_yield = 0usize;

        // Root listing failures abort; subtree failures are survivable.
        let root_entries = fs.read_dir(root)?;
        outcome.directories_visited += 1;

        // Depth-first: each stack frame is (entries, relative dir path).
        let mut stack: Vec<(Vec<DirEntry>, String)> = vec![(sorted(root_entries), String::new())];

        while let Some((entries, dir_path)) = stack.pop() {
            for (idx, entry) in entries.iter().enumerate() {
                token.check()?;

                let rel_path = if dir_path.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{dir_path}/{}", entry.name)
                };

                match entry.kind {
                    EntryKind::Directory => {
                        match fs.read_dir(&entry.handle) {
                            Ok(children) => {
                                outcome.directories_visited += 1;
                                // Re-push the rest of this frame, then descend.
                                let remaining = entries[idx + 1..].to_vec();
                                if !remaining.is_empty() {
                                    stack.push((remaining, dir_path.clone()));
                                }
                                stack.push((sorted(children), rel_path));
                                break;
                            }
                            Err(Error::PermissionDenied(path)) => {
                                log::warn!("skipping subtree without permission: {path}");
                                outcome.skipped_subtrees.push(rel_path);
                            }
                            Err(e) => {
                                log::warn!("skipping unreadable subtree {rel_path}: {e}");
                                outcome.errors.push(format!("{rel_path}: {e}"));
                            }
                        }
                    }
                    EntryKind::File => {
                        let Some(format) = extension_format(&entry.name) else {
                            continue;
                        };
                        match self.build_asset(fs, entry, folder_id, &rel_path, format) {
                            Ok(asset) => {
                                outcome.files_found += 1;
                                batch.push(asset);
                                if batch.len() >= self.batch_size {
                                    on_batch(std::mem::take(&mut batch))?;
                                }
                            }
                            Err(e) => {
                                log::warn!("skipping unreadable file {rel_path}: {e}");
                                outcome.errors.push(format!("{rel_path}: {e}"));
                            }
                        }

                        since_yield += 1;
                        if since_yield >= self.yield_every {
                            since_yield = 0;
                            std::thread::yield_now();
                        }
                        if throttle.ready(Instant::now()) {
                            on_progress(&ScanProgress {
                                files_found: outcome.files_found,
                                directories_visited: outcome.directories_visited,
                                current_path: rel_path,
                                done: false,
                            });
                        }
                    }
                }
            }
        }

        if !batch.is_empty() {
            on_batch(batch)?;
        }

        throttle.force(Instant::now());
        on_progress(&ScanProgress {
            files_found: outcome.files_found,
            directories_visited: outcome.directories_visited,
            current_path: String::new(),
            done: true,
        });
        Ok(outcome)
    }

    fn build_asset(
        &self,
        fs: &dyn HostFs,
        entry: &DirEntry,
        folder_id: &str,
        rel_path: &str,
        format: SourceFormat,
    ) -> Result<Asset> {
        let meta = fs.file_meta(&entry.handle)?;
        let modified_at: DateTime<Utc> = meta.modified.into();

        let header = fs
            .read_prefix(&entry.handle, METADATA_PREFIX_BYTES)
            .map(|prefix| probe_metadata(&prefix, format))
            .unwrap_or_else(|e| {
                log::debug!("metadata probe failed for {rel_path}: {e}");
                crate::pipeline::decode::SourceMetadata::default()
            });

        let extension = entry
            .name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        Ok(Asset {
            id: asset_id_for(folder_id, rel_path),
            folder_id: folder_id.to_string(),
            path: rel_path.to_string(),
            filename: entry.name.clone(),
            extension,
            file_size: meta.size,
            modified_at,
            // EXIF capture date when present, file mtime otherwise.
            capture_date: header.capture_date.or(Some(modified_at)),
            width: header.width,
            height: header.height,
            orientation: header.orientation,
            flag: Default::default(),
        })
    }
}

fn extension_format(name: &str) -> Option<SourceFormat> {
    let ext = name.rsplit('.').next()?;
    if ext.len() == name.len() {
        return None; // no dot at all
    }
    SourceFormat::from_extension(ext)
}

fn sorted(mut entries: Vec<DirEntry>) -> Vec<DirEntry> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert_eq!(extension_format("a.JPG"), Some(SourceFormat::Jpeg));
        assert_eq!(extension_format("b.arw"), Some(SourceFormat::Arw));
        assert_eq!(extension_format("c.png"), None);
        assert_eq!(extension_format("no_extension"), None);
    }
}
