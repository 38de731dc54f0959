//! In-memory host filesystem for tests.
//!
//! Paths are `/`-rooted strings; handles wrap the path bytes. Permission
//! states and `request` outcomes are scriptable per path so permission-flow
//! scenarios (prompt → deny → re-request → grant) can run without a host.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::errors::{Error, Result};
use crate::vfs::{
    DirEntry, EntryKind, FileMeta, FileWriter, Handle, HostFs, PermissionState, UserGesture,
};

#[derive(Clone)]
struct MemoryFile {
    bytes: Arc<Vec<u8>>,
    modified: SystemTime,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, MemoryFile>,
    dirs: BTreeSet<String>,
    permissions: HashMap<String, PermissionState>,
    request_script: HashMap<String, VecDeque<PermissionState>>,
    capacity: Option<usize>,
}

impl Inner {
    fn effective_state(&self, path: &str) -> PermissionState {
        // Exact override first, then nearest configured ancestor.
        let mut probe = path.to_string();
        loop {
            if let Some(&state) = self.permissions.get(&probe) {
                return state;
            }
            match probe.rfind('/') {
                Some(0) | None => break,
                Some(idx) => probe.truncate(idx),
            }
        }
        if self.dirs.contains(path) || self.files.contains_key(path) {
            PermissionState::Granted
        } else {
            PermissionState::Missing
        }
    }

    fn total_bytes(&self) -> usize {
        self.files.values().map(|f| f.bytes.len()).sum()
    }
}

/// Scriptable in-memory [`HostFs`].
#[derive(Clone, Default)]
pub struct MemoryFs {
    inner: Arc<Mutex<Inner>>,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn path_of(handle: &Handle) -> Result<String> {
    std::str::from_utf8(handle.as_bytes())
        .map(ToOwned::to_owned)
        .map_err(|_| Error::NotFound("undecodable handle".to_string()))
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn handle_for(path: &str) -> Handle {
        Handle::from_bytes(path.as_bytes().to_vec())
    }

    /// Creates a directory (and all ancestors).
    pub fn add_dir(&self, path: &str) {
        let mut inner = self.inner.lock();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            inner.dirs.insert(current.clone());
        }
        inner.dirs.insert("/".to_string());
    }

    /// Creates a file (and its parent directories).
    pub fn add_file(&self, path: &str, bytes: Vec<u8>) {
        if let Some(parent) = parent_of(path) {
            self.add_dir(parent);
        }
        self.inner.lock().files.insert(
            path.to_string(),
            MemoryFile {
                bytes: Arc::new(bytes),
                modified: SystemTime::now(),
            },
        );
    }

    /// Overrides the modification time of an existing file.
    pub fn set_modified(&self, path: &str, modified: SystemTime) {
        if let Some(file) = self.inner.lock().files.get_mut(path) {
            file.modified = modified;
        }
    }

    /// Forces the permission state reported for a path (and its subtree,
    /// unless a deeper override exists).
    pub fn set_permission(&self, path: &str, state: PermissionState) {
        self.inner
            .lock()
            .permissions
            .insert(path.to_string(), state);
    }

    /// Queues outcomes for successive [`HostFs::request`] calls on a path.
    pub fn script_request(&self, path: &str, outcomes: Vec<PermissionState>) {
        self.inner
            .lock()
            .request_script
            .insert(path.to_string(), outcomes.into());
    }

    /// Caps total stored bytes; writes beyond the cap fail with `StorageFull`.
    pub fn set_capacity(&self, bytes: Option<usize>) {
        self.inner.lock().capacity = bytes;
    }

    /// Bytes of a file, for assertions.
    #[must_use]
    pub fn file_bytes(&self, path: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().files.get(path).map(|f| f.bytes.clone())
    }

    /// Names of files directly inside a directory, for assertions.
    #[must_use]
    pub fn list_files(&self, dir: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .files
            .keys()
            .filter(|p| parent_of(p) == Some(dir))
            .filter_map(|p| p.rsplit('/').next().map(ToOwned::to_owned))
            .collect()
    }
}

impl HostFs for MemoryFs {
    fn query(&self, handle: &Handle) -> PermissionState {
        let Ok(path) = path_of(handle) else {
            return PermissionState::Missing;
        };
        self.inner.lock().effective_state(&path)
    }

    fn request(&self, handle: &Handle, _gesture: &UserGesture) -> PermissionState {
        let Ok(path) = path_of(handle) else {
            return PermissionState::Missing;
        };
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(queue) = inner.request_script.get_mut(&path) {
            if let Some(outcome) = queue.pop_front() {
                inner.permissions.insert(path.clone(), outcome);
                return outcome;
            }
        }
        match inner.effective_state(&path) {
            PermissionState::Prompt => {
                inner.permissions.insert(path, PermissionState::Granted);
                PermissionState::Granted
            }
            state => state,
        }
    }

    fn read_dir(&self, handle: &Handle) -> Result<Vec<DirEntry>> {
        let path = path_of(handle)?;
        let inner = self.inner.lock();
        match inner.effective_state(&path) {
            PermissionState::Granted => {}
            PermissionState::Missing => return Err(Error::NotFound(path)),
            _ => return Err(Error::PermissionDenied(path)),
        }
        if !inner.dirs.contains(&path) {
            return Err(Error::NotFound(path));
        }
        let mut entries = Vec::new();
        for dir in &inner.dirs {
            if parent_of(dir) == Some(path.as_str()) {
                entries.push(DirEntry {
                    name: dir.rsplit('/').next().unwrap_or_default().to_string(),
                    kind: EntryKind::Directory,
                    handle: MemoryFs::handle_for(dir),
                });
            }
        }
        for file in inner.files.keys() {
            if parent_of(file) == Some(path.as_str()) {
                entries.push(DirEntry {
                    name: file.rsplit('/').next().unwrap_or_default().to_string(),
                    kind: EntryKind::File,
                    handle: MemoryFs::handle_for(file),
                });
            }
        }
        Ok(entries)
    }

    fn open_file(&self, handle: &Handle) -> Result<Vec<u8>> {
        let path = path_of(handle)?;
        let inner = self.inner.lock();
        match inner.effective_state(&path) {
            PermissionState::Granted => {}
            PermissionState::Missing => return Err(Error::NotFound(path)),
            _ => return Err(Error::PermissionDenied(path)),
        }
        inner
            .files
            .get(&path)
            .map(|f| f.bytes.as_ref().clone())
            .ok_or(Error::NotFound(path))
    }

    fn file_meta(&self, handle: &Handle) -> Result<FileMeta> {
        let path = path_of(handle)?;
        let inner = self.inner.lock();
        inner
            .files
            .get(&path)
            .map(|f| FileMeta {
                size: f.bytes.len() as u64,
                modified: f.modified,
            })
            .ok_or(Error::NotFound(path))
    }

    fn resolve(&self, dir: &Handle, relative: &str) -> Result<Handle> {
        let mut path = path_of(dir)?;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(Error::NotFound(relative.to_string()));
            }
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str(segment);
        }
        Ok(MemoryFs::handle_for(&path))
    }

    fn exists(&self, dir: &Handle, name: &str) -> Result<bool> {
        let target = path_of(&self.resolve(dir, name)?)?;
        let inner = self.inner.lock();
        Ok(inner.files.contains_key(&target) || inner.dirs.contains(&target))
    }

    fn create_file(&self, dir: &Handle, name: &str) -> Result<Box<dyn FileWriter>> {
        let target = path_of(&self.resolve(dir, name)?)?;
        Ok(Box::new(MemoryFileWriter {
            fs: self.inner.clone(),
            path: target,
            pending: Vec::new(),
        }))
    }

    fn display_name(&self, handle: &Handle) -> String {
        path_of(handle).map_or_else(
            |_| "<invalid handle>".to_string(),
            |p| p.rsplit('/').next().unwrap_or(&p).to_string(),
        )
    }
}

struct MemoryFileWriter {
    fs: Arc<Mutex<Inner>>,
    path: String,
    pending: Vec<u8>,
}

impl FileWriter for MemoryFileWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut inner = self.fs.lock();
        if let Some(cap) = inner.capacity {
            if inner.total_bytes() + self.pending.len() > cap {
                return Err(Error::StorageFull(self.path));
            }
        }
        inner.files.insert(
            self.path,
            MemoryFile {
                bytes: Arc::new(self.pending),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_listing_and_resolution() {
        let fs = MemoryFs::new();
        fs.add_file("/photos/a.jpg", vec![1, 2, 3]);
        fs.add_file("/photos/sub/b.jpg", vec![4]);

        let root = MemoryFs::handle_for("/photos");
        let entries = fs.read_dir(&root).unwrap();
        assert_eq!(entries.len(), 2);

        let resolved = fs.resolve(&root, "sub/b.jpg").unwrap();
        assert_eq!(fs.open_file(&resolved).unwrap(), vec![4]);
    }

    #[test]
    fn scripted_request_flow() {
        let fs = MemoryFs::new();
        fs.add_dir("/photos");
        fs.set_permission("/photos", PermissionState::Prompt);
        fs.script_request(
            "/photos",
            vec![PermissionState::Denied, PermissionState::Granted],
        );

        let handle = MemoryFs::handle_for("/photos");
        let gesture = UserGesture::from_user_interaction();
        assert_eq!(fs.request(&handle, &gesture), PermissionState::Denied);
        assert!(fs.read_dir(&handle).is_err());
        assert_eq!(fs.request(&handle, &gesture), PermissionState::Granted);
        assert!(fs.read_dir(&handle).is_ok());
    }
}
