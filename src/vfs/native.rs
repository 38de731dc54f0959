//! Local-disk host filesystem.
//!
//! Handles are UTF-8 absolute paths. Authorization is the OS's own file
//! permissions: a readable directory is `granted`, a vanished one `missing`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};
use crate::vfs::{
    DirEntry, EntryKind, FileMeta, FileWriter, Handle, HostFs, PermissionState, UserGesture,
};

/// [`HostFs`] over `std::fs`.
#[derive(Debug, Default)]
pub struct NativeFs;

impl NativeFs {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Wraps an absolute path into a handle.
    #[must_use]
    pub fn handle_for_path(path: &Path) -> Handle {
        Handle::from_bytes(path.to_string_lossy().into_owned().into_bytes())
    }

    fn path_of(handle: &Handle) -> Result<PathBuf> {
        let text = std::str::from_utf8(handle.as_bytes())
            .map_err(|_| Error::NotFound("undecodable handle".to_string()))?;
        Ok(PathBuf::from(text))
    }
}

fn map_io(path: &Path, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.display().to_string()),
        std::io::ErrorKind::StorageFull => Error::StorageFull(path.display().to_string()),
        _ => Error::Io(err),
    }
}

impl HostFs for NativeFs {
    fn query(&self, handle: &Handle) -> PermissionState {
        match Self::path_of(handle) {
            Ok(path) if path.exists() => PermissionState::Granted,
            _ => PermissionState::Missing,
        }
    }

    fn request(&self, handle: &Handle, _gesture: &UserGesture) -> PermissionState {
        // The OS has no prompt flow; re-authorization is just re-checking.
        self.query(handle)
    }

    fn read_dir(&self, handle: &Handle) -> Result<Vec<DirEntry>> {
        let path = Self::path_of(handle)?;
        let read = fs::read_dir(&path).map_err(|e| map_io(&path, e))?;
        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| map_io(&path, e))?;
            let file_type = entry.file_type().map_err(|e| map_io(&path, e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue; // symlinks and specials are not catalog material
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                handle: Self::handle_for_path(&entry.path()),
            });
        }
        Ok(entries)
    }

    fn open_file(&self, handle: &Handle) -> Result<Vec<u8>> {
        let path = Self::path_of(handle)?;
        fs::read(&path).map_err(|e| map_io(&path, e))
    }

    fn read_prefix(&self, handle: &Handle, max_len: usize) -> Result<Vec<u8>> {
        let path = Self::path_of(handle)?;
        let file = fs::File::open(&path).map_err(|e| map_io(&path, e))?;
        let mut buf = Vec::with_capacity(max_len.min(1 << 20));
        file.take(max_len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| map_io(&path, e))?;
        Ok(buf)
    }

    fn file_meta(&self, handle: &Handle) -> Result<FileMeta> {
        let path = Self::path_of(handle)?;
        let meta = fs::metadata(&path).map_err(|e| map_io(&path, e))?;
        Ok(FileMeta {
            size: meta.len(),
            modified: meta.modified().map_err(|e| map_io(&path, e))?,
        })
    }

    fn resolve(&self, dir: &Handle, relative: &str) -> Result<Handle> {
        let mut path = Self::path_of(dir)?;
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(Error::NotFound(relative.to_string()));
            }
            path.push(segment);
        }
        Ok(Self::handle_for_path(&path))
    }

    fn exists(&self, dir: &Handle, name: &str) -> Result<bool> {
        let path = Self::path_of(dir)?.join(name);
        Ok(path.exists())
    }

    fn create_file(&self, dir: &Handle, name: &str) -> Result<Box<dyn FileWriter>> {
        let path = Self::path_of(dir)?.join(name);
        let file = fs::File::create(&path).map_err(|e| map_io(&path, e))?;
        Ok(Box::new(NativeFileWriter { path, file }))
    }

    fn display_name(&self, handle: &Handle) -> String {
        Self::path_of(handle).map_or_else(
            |_| "<invalid handle>".to_string(),
            |p| {
                p.file_name()
                    .map_or_else(|| p.display().to_string(), |n| n.to_string_lossy().into_owned())
            },
        )
    }
}

struct NativeFileWriter {
    path: PathBuf,
    file: fs::File,
}

impl FileWriter for NativeFileWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|e| map_io(&self.path, e))
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.file.flush().map_err(|e| map_io(&self.path, e))?;
        self.file.sync_all().map_err(|e| map_io(&self.path, e))
    }
}
