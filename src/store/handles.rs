//! Permission & Handle Store
//!
//! Persists the opaque folder handles the user has granted (`literoom-fs`),
//! classifies each saved handle against the host's permission states, and
//! drives the re-authorization flow. Handles are stored as raw bytes and
//! never interpreted here.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::errors::{Error, Result};
use crate::vfs::{Handle, HostFs, PermissionState, UserGesture};

/// Database file name inside the engine's storage root.
pub const HANDLE_DB_NAME: &str = "literoom-fs.sqlite3";

/// Persistent key → handle map.
pub struct HandleStore {
    conn: Mutex<Connection>,
}

impl HandleStore {
    /// Opens (or creates) the handle database under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::from_connection(Connection::open(dir.join(HANDLE_DB_NAME))?)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS handles (
                 key      TEXT PRIMARY KEY,
                 handle   BLOB NOT NULL,
                 saved_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn save(&self, key: &str, handle: &Handle) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO handles (key, handle, saved_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 handle = excluded.handle,
                 saved_at = excluded.saved_at",
            params![key, handle.as_bytes(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<Option<Handle>> {
        self.conn
            .lock()
            .query_row(
                "SELECT handle FROM handles WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map(|bytes| Some(Handle::from_bytes(bytes)))
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM handles WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Every saved `(key, handle)` pair, oldest first.
    pub fn list(&self) -> Result<Vec<(String, Handle)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, handle FROM handles ORDER BY saved_at ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Handle::from_bytes(row.get::<_, Vec<u8>>(1)?),
            ))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Host-reported state of a saved handle; `Missing` when the key was
    /// never saved or the directory is gone. Never prompts.
    pub fn classify(&self, fs: &dyn HostFs, key: &str) -> Result<PermissionState> {
        match self.load(key)? {
            Some(handle) => Ok(fs.query(&handle)),
            None => Ok(PermissionState::Missing),
        }
    }

    /// Asks the host to re-authorize a saved handle. Requires a user
    /// gesture; a denial is recorded by the host, not retried here.
    pub fn request_access(
        &self,
        fs: &dyn HostFs,
        key: &str,
        gesture: &UserGesture,
    ) -> Result<PermissionState> {
        let handle = self
            .load(key)?
            .ok_or_else(|| Error::NotFound(format!("handle {key}")))?;
        let state = fs.request(&handle, gesture);
        log::info!("re-authorization for {key}: {}", state.as_str());
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    #[test]
    fn save_load_remove_round_trip() {
        let store = HandleStore::open_in_memory().unwrap();
        let handle = Handle::from_bytes(b"/photos".to_vec());
        store.save("folder-1", &handle).unwrap();
        assert_eq!(store.load("folder-1").unwrap(), Some(handle));
        store.remove("folder-1").unwrap();
        assert_eq!(store.load("folder-1").unwrap(), None);
    }

    #[test]
    fn classify_reports_missing_for_unknown_keys() {
        let store = HandleStore::open_in_memory().unwrap();
        let fs = MemoryFs::new();
        assert_eq!(
            store.classify(&fs, "never-saved").unwrap(),
            PermissionState::Missing
        );
    }

    #[test]
    fn classify_tracks_host_state() {
        let store = HandleStore::open_in_memory().unwrap();
        let fs = MemoryFs::new();
        fs.add_dir("/photos");
        fs.set_permission("/photos", PermissionState::Prompt);

        let handle = MemoryFs::handle_for("/photos");
        store.save("folder-1", &handle).unwrap();
        assert_eq!(
            store.classify(&fs, "folder-1").unwrap(),
            PermissionState::Prompt
        );
    }
}
