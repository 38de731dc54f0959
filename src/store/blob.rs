//! Two-Tier Blob Store
//!
//! Cached thumbnail and preview JPEGs live in a bounded in-memory LRU in
//! front of a flat on-disk directory tree:
//! `<storage>/literoom/{thumbnails,previews}/<hash>.jpg`. Reads fall through
//! memory to disk; writes land in both tiers. Disk eviction runs
//! least-recently-accessed once total bytes exceed the configured budget,
//! and a startup reconcile deletes orphaned blobs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::catalog::model::RenderKind;
use crate::errors::{Error, Result};
use crate::settings::EngineSettings;
use crate::store::memory::MemoryLru;

/// Root directory name under the storage root.
const STORE_DIR: &str = "literoom";

/// Relative blob key for an asset's cached render of one kind.
///
/// The asset id is hashed so keys are filesystem-safe regardless of what
/// characters the id carries; the kind participates in the hash so the
/// three renders of one asset never collide.
#[must_use]
pub fn blob_key(asset_id: &str, kind: RenderKind) -> String {
    let dir = match kind {
        RenderKind::Thumbnail => "thumbnails",
        RenderKind::Preview1x | RenderKind::Preview2x => "previews",
    };
    let hash = xxh3_64(format!("{asset_id}#{}", kind.as_str()).as_bytes());
    format!("{dir}/{hash:016x}.jpg")
}

/// Outcome of the startup reconcile pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Blobs on disk that no cache-metadata row referenced; deleted.
    pub orphans_removed: usize,
    /// Keys that exist on disk after the pass.
    pub live_keys: HashSet<String>,
}

/// Memory LRU over persistent blob files.
pub struct BlobStore {
    root: PathBuf,
    memory: Mutex<MemoryLru<String, Arc<Vec<u8>>>>,
    /// Last-access ordering for disk eviction. Survives only for the
    /// process lifetime; cold entries fall back to file modification time.
    access: Mutex<FxHashMap<String, u64>>,
    access_tick: Mutex<u64>,
    disk_budget: u64,
}

impl BlobStore {
    /// Opens the store under `storage_root`, creating its directories.
    pub fn open(storage_root: &Path, settings: &EngineSettings) -> Result<Self> {
        let root = storage_root.join(STORE_DIR);
        std::fs::create_dir_all(root.join("thumbnails"))?;
        std::fs::create_dir_all(root.join("previews"))?;

        let mut memory = MemoryLru::new(settings.memory_cache_entries);
        memory.set_release_hook(|key: &String, _blob: &Arc<Vec<u8>>| {
            // Native blobs have no object-URL analogue to revoke; the Arc
            // drop is the release. Log at trace for cache-behaviour debugging.
            log::trace!("memory tier released {key}");
        });

        Ok(Self {
            root,
            memory: Mutex::new(memory),
            access: Mutex::new(FxHashMap::default()),
            access_tick: Mutex::new(0),
            disk_budget: settings.disk_cache_budget_bytes,
        })
    }

    fn touch(&self, key: &str) {
        let mut tick = self.access_tick.lock();
        *tick += 1;
        self.access.lock().insert(key.to_string(), *tick);
    }

    fn disk_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read-through lookup: memory tier first, then disk. `None` on miss.
    pub fn get(&self, asset_id: &str, kind: RenderKind) -> Option<Arc<Vec<u8>>> {
        let key = blob_key(asset_id, kind);
        if let Some(blob) = self.memory.lock().get(&key) {
            self.touch(&key);
            return Some(blob.clone());
        }
        match std::fs::read(self.disk_path(&key)) {
            Ok(bytes) => {
                let blob = Arc::new(bytes);
                self.memory.lock().put(key.clone(), blob.clone());
                self.touch(&key);
                Some(blob)
            }
            Err(_) => None,
        }
    }

    /// Write-through store. Returns the blob key recorded in cache metadata.
    pub fn put(&self, asset_id: &str, kind: RenderKind, bytes: Vec<u8>) -> Result<String> {
        let key = blob_key(asset_id, kind);
        let path = self.disk_path(&key);

        // Atomic per-key replace: readers see the old file or the new one.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes).map_err(map_disk)?;
        std::fs::rename(&tmp, &path).map_err(map_disk)?;

        self.memory.lock().put(key.clone(), Arc::new(bytes));
        self.touch(&key);
        self.enforce_disk_budget()?;
        Ok(key)
    }

    /// Removes every cached render of an asset from both tiers.
    pub fn remove(&self, asset_id: &str) -> Result<()> {
        for kind in [
            RenderKind::Thumbnail,
            RenderKind::Preview1x,
            RenderKind::Preview2x,
        ] {
            let key = blob_key(asset_id, kind);
            self.memory.lock().remove(&key);
            self.access.lock().remove(&key);
            match std::fs::remove_file(self.disk_path(&key)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drops the whole memory tier (folder change).
    pub fn clear_memory(&self) {
        self.memory.lock().clear();
    }

    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Deletes blobs no metadata row references and reports what survives.
    pub fn reconcile(&self, referenced: &HashSet<String>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for dir in ["thumbnails", "previews"] {
            let dir_path = self.root.join(dir);
            for entry in std::fs::read_dir(&dir_path)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let key = format!("{dir}/{}", entry.file_name().to_string_lossy());
                if referenced.contains(&key) {
                    report.live_keys.insert(key);
                } else {
                    log::debug!("removing orphaned blob {key}");
                    std::fs::remove_file(entry.path())?;
                    report.orphans_removed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Evicts least-recently-accessed disk blobs above the byte budget.
    fn enforce_disk_budget(&self) -> Result<()> {
        let mut files: Vec<(String, u64, u64)> = Vec::new(); // key, size, order
        let access = self.access.lock().clone();
        let mut total: u64 = 0;

        for dir in ["thumbnails", "previews"] {
            let dir_path = self.root.join(dir);
            for entry in std::fs::read_dir(&dir_path)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                if !meta.is_file() {
                    continue;
                }
                let key = format!("{dir}/{}", entry.file_name().to_string_lossy());
                let order = access.get(&key).copied().unwrap_or_else(|| {
                    // Cold file from a previous session: order by mtime.
                    meta.modified()
                        .ok()
                        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                        .map_or(0, |d| d.as_secs())
                });
                total += meta.len();
                files.push((key, meta.len(), order));
            }
        }

        if total <= self.disk_budget {
            return Ok(());
        }

        files.sort_by_key(|&(_, _, order)| order);
        for (key, size, _) in files {
            if total <= self.disk_budget {
                break;
            }
            match std::fs::remove_file(self.disk_path(&key)) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    self.memory.lock().remove(&key);
                    self.access.lock().remove(&key);
                    log::debug!("disk tier evicted {key} ({size} bytes)");
                }
                Err(e) => log::warn!("disk tier eviction failed for {key}: {e}"),
            }
        }
        Ok(())
    }
}

fn map_disk(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::StorageFull {
        Error::StorageFull("blob store".to_string())
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> BlobStore {
        BlobStore::open(dir.path(), &EngineSettings::default()).unwrap()
    }

    #[test]
    fn write_through_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = store
            .put("asset-1", RenderKind::Thumbnail, vec![1, 2, 3])
            .unwrap();
        assert!(key.starts_with("thumbnails/"));

        let blob = store.get("asset-1", RenderKind::Thumbnail).unwrap();
        assert_eq!(*blob, vec![1, 2, 3]);

        // Survives a memory clear via the disk tier.
        store.clear_memory();
        assert_eq!(store.memory_len(), 0);
        let blob = store.get("asset-1", RenderKind::Thumbnail).unwrap();
        assert_eq!(*blob, vec![1, 2, 3]);
    }

    #[test]
    fn kinds_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.put("a", RenderKind::Preview1x, vec![1]).unwrap();
        store.put("a", RenderKind::Preview2x, vec![2]).unwrap();
        assert_eq!(*store.get("a", RenderKind::Preview1x).unwrap(), vec![1]);
        assert_eq!(*store.get("a", RenderKind::Preview2x).unwrap(), vec![2]);
    }

    #[test]
    fn reconcile_removes_orphans() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let keep = store.put("keep", RenderKind::Thumbnail, vec![1]).unwrap();
        store.put("orphan", RenderKind::Thumbnail, vec![2]).unwrap();

        let referenced: HashSet<String> = [keep.clone()].into_iter().collect();
        let report = store.reconcile(&referenced).unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert!(report.live_keys.contains(&keep));
        assert!(store.get("orphan", RenderKind::Thumbnail).is_none());
    }

    #[test]
    fn disk_budget_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let settings = EngineSettings {
            disk_cache_budget_bytes: 8,
            ..Default::default()
        };
        let store = BlobStore::open(dir.path(), &settings).unwrap();
        store.put("a", RenderKind::Thumbnail, vec![0; 6]).unwrap();
        store.put("b", RenderKind::Thumbnail, vec![0; 6]).unwrap();
        // Budget 8 with 12 bytes on disk: the older blob goes.
        assert!(store.get("a", RenderKind::Thumbnail).is_none());
        assert!(store.get("b", RenderKind::Thumbnail).is_some());
    }
}
