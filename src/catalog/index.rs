//! Asset Index
//!
//! The persistent catalog: assets, folders, edit documents, and cache
//! metadata in one SQLite database (`LiteroomCatalog.sqlite3`). Every listed
//! query is served by an index, not a table scan; the schema is versioned
//! through `PRAGMA user_version` with sequential migrations.
//!
//! Concurrency: one writer behind a mutex; a database held by another
//! process surfaces as the recoverable [`Error::IndexBusy`], never a
//! deadlock.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::catalog::edit::EditState;
use crate::catalog::model::{
    Asset, AssetId, CacheMetadata, Flag, FlagCounts, FlagFilter, Folder, RenderKind,
    SortDirection, SortField,
};
use crate::errors::{Error, Result};

/// Database file name inside the engine's storage root.
pub const CATALOG_DB_NAME: &str = "LiteroomCatalog.sqlite3";

/// Highest schema version this build understands.
pub const SCHEMA_VERSION: u32 = 3;

const BUSY_TIMEOUT_MS: u32 = 1_000;

/// Typed store over the catalog database.
pub struct AssetIndex {
    conn: Mutex<Connection>,
}

/// Maps lock contention onto the recoverable busy error.
fn map_sql(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if matches!(
            failure.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ) {
            return Error::IndexBusy;
        }
    }
    Error::Index(err)
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_rfc3339(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

impl AssetIndex {
    /// Opens (or creates) the catalog at `dir/LiteroomCatalog.sqlite3`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join(CATALOG_DB_NAME)).map_err(map_sql)?;
        Self::from_connection(conn)
    }

    /// In-memory catalog for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sql)?;
        Self::from_connection(conn)
    }

    /// Opens an existing catalog read-only (used to probe schema versions).
    pub fn open_existing(dir: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            dir.join(CATALOG_DB_NAME),
            OpenFlags::SQLITE_OPEN_READ_WRITE,
        )
        .map_err(map_sql)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))
            .map_err(map_sql)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(map_sql)?;
        Self::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ========================================================================
    // Schema & migrations
    // ========================================================================

    fn migrate(conn: &mut Connection) -> Result<()> {
        let found: u32 = conn
            .query_row("SELECT user_version FROM pragma_user_version", [], |row| {
                row.get(0)
            })
            .map_err(map_sql)?;

        if found > SCHEMA_VERSION {
            return Err(Error::SchemaUnsupported {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found == SCHEMA_VERSION {
            return Ok(());
        }

        log::info!("migrating catalog schema v{found} -> v{SCHEMA_VERSION}");
        let tx = conn.transaction().map_err(map_sql)?;
        for version in found..SCHEMA_VERSION {
            match version {
                0 => Self::migrate_to_v1(&tx)?,
                1 => Self::migrate_to_v2(&tx)?,
                2 => Self::migrate_to_v3(&tx)?,
                _ => {}
            }
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(map_sql)?;
        tx.commit().map_err(map_sql)?;
        Ok(())
    }

    fn migrate_to_v1(tx: &rusqlite::Transaction<'_>) -> Result<()> {
        tx.execute_batch(
            "CREATE TABLE folders (
                 id           TEXT PRIMARY KEY,
                 name         TEXT NOT NULL,
                 handle_key   TEXT NOT NULL,
                 last_scan_at TEXT
             );
             CREATE TABLE assets (
                 id           TEXT PRIMARY KEY,
                 folder_id    TEXT NOT NULL,
                 path         TEXT NOT NULL,
                 filename     TEXT NOT NULL,
                 extension    TEXT NOT NULL,
                 file_size    INTEGER NOT NULL,
                 modified_at  TEXT NOT NULL,
                 capture_date TEXT,
                 width        INTEGER,
                 height       INTEGER,
                 flag         TEXT NOT NULL DEFAULT 'unflagged',
                 UNIQUE (folder_id, path)
             );
             CREATE INDEX idx_assets_folder_capture ON assets (folder_id, capture_date);
             CREATE TABLE edits (
                 asset_id   TEXT PRIMARY KEY,
                 document   TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(map_sql)
    }

    fn migrate_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
        tx.execute_batch(
            "ALTER TABLE assets ADD COLUMN orientation INTEGER;
             CREATE INDEX idx_assets_folder_filename ON assets (folder_id, filename);
             CREATE INDEX idx_assets_folder_flag_capture ON assets (folder_id, flag, capture_date);",
        )
        .map_err(map_sql)
    }

    fn migrate_to_v3(tx: &rusqlite::Transaction<'_>) -> Result<()> {
        tx.execute_batch(
            "CREATE TABLE cache_metadata (
                 asset_id         TEXT PRIMARY KEY,
                 thumbnail_ready  INTEGER NOT NULL DEFAULT 0,
                 preview1x_ready  INTEGER NOT NULL DEFAULT 0,
                 preview2x_ready  INTEGER NOT NULL DEFAULT 0,
                 thumbnail_key    TEXT,
                 preview1x_key    TEXT,
                 preview2x_key    TEXT
             );",
        )
        .map_err(map_sql)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub fn upsert_folder(&self, folder: &Folder) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO folders (id, name, handle_key, last_scan_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     handle_key = excluded.handle_key",
                params![
                    folder.id,
                    folder.name,
                    folder.handle_key,
                    folder.last_scan_at.map(to_rfc3339)
                ],
            )
            .map_err(map_sql)?;
        Ok(())
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, name, handle_key, last_scan_at FROM folders WHERE id = ?1",
                params![id],
                row_to_folder,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })
    }

    /// Folders ordered by most recent scan, for the recents dropdown.
    pub fn recent_folders(&self, limit: usize) -> Result<Vec<Folder>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, handle_key, last_scan_at FROM folders
                 ORDER BY last_scan_at IS NULL, last_scan_at DESC
                 LIMIT ?1",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_folder)
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }

    pub fn touch_folder_scanned(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE folders SET last_scan_at = ?2 WHERE id = ?1",
                params![id, to_rfc3339(at)],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("folder {id}")));
        }
        Ok(())
    }

    /// Removes a folder and everything hanging off it.
    pub fn remove_folder(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "DELETE FROM edits WHERE asset_id IN (SELECT id FROM assets WHERE folder_id = ?1)",
            params![id],
        )
        .map_err(map_sql)?;
        tx.execute(
            "DELETE FROM cache_metadata WHERE asset_id IN (SELECT id FROM assets WHERE folder_id = ?1)",
            params![id],
        )
        .map_err(map_sql)?;
        tx.execute("DELETE FROM assets WHERE folder_id = ?1", params![id])
            .map_err(map_sql)?;
        tx.execute("DELETE FROM folders WHERE id = ?1", params![id])
            .map_err(map_sql)?;
        tx.commit().map_err(map_sql)
    }

    // ========================================================================
    // Assets
    // ========================================================================

    /// Ingests a scanner batch in one transaction. Existing rows refresh
    /// their file facts but keep their flag.
    pub fn bulk_put(&self, assets: &[Asset]) -> Result<()> {
        if assets.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sql)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO assets
                         (id, folder_id, path, filename, extension, file_size,
                          modified_at, capture_date, width, height, orientation, flag)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(folder_id, path) DO UPDATE SET
                         file_size = excluded.file_size,
                         modified_at = excluded.modified_at,
                         capture_date = excluded.capture_date,
                         width = excluded.width,
                         height = excluded.height,
                         orientation = excluded.orientation",
                )
                .map_err(map_sql)?;
            for asset in assets {
                stmt.execute(params![
                    asset.id,
                    asset.folder_id,
                    asset.path,
                    asset.filename,
                    asset.extension,
                    asset.file_size as i64,
                    to_rfc3339(asset.modified_at),
                    asset.capture_date.map(to_rfc3339),
                    asset.width,
                    asset.height,
                    asset.orientation,
                    asset.flag.as_str(),
                ])
                .map_err(map_sql)?;
            }
        }
        tx.commit().map_err(map_sql)
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<Asset>> {
        self.conn
            .lock()
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
                params![id],
                row_to_asset,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })
    }

    /// Paginated, filtered, sorted listing — the grid query.
    pub fn list_assets(
        &self,
        folder_id: &str,
        filter: FlagFilter,
        sort: SortField,
        direction: SortDirection,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Asset>> {
        // Column and direction come from fixed vocabularies, never user text.
        let sort_column = match sort {
            SortField::CaptureDate => "capture_date",
            SortField::Filename => "filename",
            SortField::ModifiedAt => "modified_at",
            SortField::FileSize => "file_size",
        };
        let dir = match direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        let flag_clause = match filter {
            FlagFilter::All => "",
            FlagFilter::Pick | FlagFilter::Reject | FlagFilter::Unflagged => "AND flag = ?4",
        };

        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE folder_id = ?1 {flag_clause}
             ORDER BY {sort_column} {dir}, id {dir}
             LIMIT ?2 OFFSET ?3"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql).map_err(map_sql)?;
        let rows = match filter {
            FlagFilter::All => stmt
                .query_map(
                    params![folder_id, limit as i64, offset as i64],
                    row_to_asset,
                )
                .map_err(map_sql)?
                .collect::<rusqlite::Result<Vec<_>>>(),
            FlagFilter::Pick => collect_filtered(&mut stmt, folder_id, limit, offset, "pick"),
            FlagFilter::Reject => collect_filtered(&mut stmt, folder_id, limit, offset, "reject"),
            FlagFilter::Unflagged => {
                collect_filtered(&mut stmt, folder_id, limit, offset, "unflagged")
            }
        };
        rows.map_err(map_sql)
    }

    /// Flag counts for the header badges, in one indexed pass.
    pub fn count_flags(&self, folder_id: &str) -> Result<FlagCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT flag, COUNT(*) FROM assets WHERE folder_id = ?1 GROUP BY flag",
            )
            .map_err(map_sql)?;
        let mut counts = FlagCounts::default();
        let rows = stmt
            .query_map(params![folder_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(map_sql)?;
        for row in rows {
            let (flag, count) = row.map_err(map_sql)?;
            let count = count as u64;
            counts.total += count;
            match Flag::from_str(&flag) {
                Some(Flag::Pick) => counts.picks += count,
                Some(Flag::Reject) => counts.rejects += count,
                _ => counts.unflagged += count,
            }
        }
        Ok(counts)
    }

    pub fn set_flag(&self, id: &str, flag: Flag) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE assets SET flag = ?2 WHERE id = ?1",
                params![id, flag.as_str()],
            )
            .map_err(map_sql)?;
        if changed == 0 {
            return Err(Error::NotFound(format!("asset {id}")));
        }
        Ok(())
    }

    /// All asset ids in a folder, in capture order, for queue seeding.
    pub fn asset_ids(&self, folder_id: &str) -> Result<Vec<AssetId>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id FROM assets WHERE folder_id = ?1 ORDER BY capture_date, id",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map(params![folder_id], |row| row.get::<_, String>(0))
            .map_err(map_sql)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql)
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Loads and migrates the persisted edit document, if any.
    pub fn load_edit(&self, asset_id: &str) -> Result<Option<EditState>> {
        let document: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT document FROM edits WHERE asset_id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql(other)),
            })?;
        document.map(|text| EditState::from_json(&text)).transpose()
    }

    /// Persists an edit document and invalidates every cached render flag
    /// for the asset, atomically.
    pub fn save_edit(&self, asset_id: &str, edit: &EditState) -> Result<()> {
        edit.validate()?;
        let document = edit.to_json()?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(map_sql)?;
        tx.execute(
            "INSERT INTO edits (asset_id, document, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(asset_id) DO UPDATE SET
                 document = excluded.document,
                 updated_at = excluded.updated_at",
            params![asset_id, document, to_rfc3339(Utc::now())],
        )
        .map_err(map_sql)?;
        tx.execute(
            "UPDATE cache_metadata
             SET thumbnail_ready = 0, preview1x_ready = 0, preview2x_ready = 0
             WHERE asset_id = ?1",
            params![asset_id],
        )
        .map_err(map_sql)?;
        tx.commit().map_err(map_sql)
    }

    pub fn delete_edit(&self, asset_id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM edits WHERE asset_id = ?1", params![asset_id])
            .map_err(map_sql)?;
        Ok(())
    }

    // ========================================================================
    // Cache metadata
    // ========================================================================

    pub fn cache_metadata(&self, asset_id: &str) -> Result<CacheMetadata> {
        self.conn
            .lock()
            .query_row(
                "SELECT thumbnail_ready, preview1x_ready, preview2x_ready,
                        thumbnail_key, preview1x_key, preview2x_key
                 FROM cache_metadata WHERE asset_id = ?1",
                params![asset_id],
                |row| {
                    Ok(CacheMetadata {
                        asset_id: asset_id.to_string(),
                        thumbnail_ready: row.get(0)?,
                        preview1x_ready: row.get(1)?,
                        preview2x_ready: row.get(2)?,
                        thumbnail_key: row.get(3)?,
                        preview1x_key: row.get(4)?,
                        preview2x_key: row.get(5)?,
                    })
                },
            )
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(CacheMetadata {
                    asset_id: asset_id.to_string(),
                    ..CacheMetadata::default()
                }),
                other => Err(map_sql(other)),
            })
    }

    /// Records a finished render for one kind.
    pub fn mark_cache_ready(&self, asset_id: &str, kind: RenderKind, blob_key: &str) -> Result<()> {
        let (ready_col, key_col) = cache_columns(kind);
        let sql = format!(
            "INSERT INTO cache_metadata (asset_id, {ready_col}, {key_col}) VALUES (?1, 1, ?2)
             ON CONFLICT(asset_id) DO UPDATE SET {ready_col} = 1, {key_col} = excluded.{key_col}"
        );
        self.conn
            .lock()
            .execute(&sql, params![asset_id, blob_key])
            .map_err(map_sql)?;
        Ok(())
    }

    /// Clears every readiness flag for an asset (keys are kept so blobs can
    /// be reconciled or overwritten).
    pub fn invalidate_cache(&self, asset_id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "UPDATE cache_metadata
                 SET thumbnail_ready = 0, preview1x_ready = 0, preview2x_ready = 0
                 WHERE asset_id = ?1",
                params![asset_id],
            )
            .map_err(map_sql)?;
        Ok(())
    }

    /// Every blob key referenced by cache metadata, for the startup
    /// reconcile pass.
    pub fn all_cache_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT thumbnail_key, preview1x_key, preview2x_key FROM cache_metadata",
            )
            .map_err(map_sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok([
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ])
            })
            .map_err(map_sql)?;
        let mut keys = Vec::new();
        for row in rows {
            for key in row.map_err(map_sql)?.into_iter().flatten() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Drops readiness flags whose blob keys are not in the live set.
    pub fn reconcile_cache(&self, live_keys: &std::collections::HashSet<String>) -> Result<usize> {
        let stale: Vec<(String, RenderKind)> = {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT asset_id, thumbnail_key, preview1x_key, preview2x_key
                     FROM cache_metadata
                     WHERE thumbnail_ready = 1 OR preview1x_ready = 1 OR preview2x_ready = 1",
                )
                .map_err(map_sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(map_sql)?;
            let mut stale = Vec::new();
            for row in rows {
                let (asset_id, thumb, p1, p2) = row.map_err(map_sql)?;
                for (key, kind) in [
                    (thumb, RenderKind::Thumbnail),
                    (p1, RenderKind::Preview1x),
                    (p2, RenderKind::Preview2x),
                ] {
                    if let Some(key) = key {
                        if !live_keys.contains(&key) {
                            stale.push((asset_id.clone(), kind));
                        }
                    }
                }
            }
            stale
        };

        for (asset_id, kind) in &stale {
            let (ready_col, _) = cache_columns(*kind);
            let sql = format!("UPDATE cache_metadata SET {ready_col} = 0 WHERE asset_id = ?1");
            self.conn
                .lock()
                .execute(&sql, params![asset_id])
                .map_err(map_sql)?;
        }
        Ok(stale.len())
    }
}

const ASSET_COLUMNS: &str = "id, folder_id, path, filename, extension, file_size, \
                             modified_at, capture_date, width, height, orientation, flag";

fn cache_columns(kind: RenderKind) -> (&'static str, &'static str) {
    match kind {
        RenderKind::Thumbnail => ("thumbnail_ready", "thumbnail_key"),
        RenderKind::Preview1x => ("preview1x_ready", "preview1x_key"),
        RenderKind::Preview2x => ("preview2x_ready", "preview2x_key"),
    }
}

fn collect_filtered(
    stmt: &mut rusqlite::CachedStatement<'_>,
    folder_id: &str,
    limit: usize,
    offset: usize,
    flag: &str,
) -> rusqlite::Result<Vec<Asset>> {
    stmt.query_map(
        params![folder_id, limit as i64, offset as i64, flag],
        row_to_asset,
    )?
    .collect()
}

fn row_to_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    let last_scan: Option<String> = row.get(3)?;
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        handle_key: row.get(2)?,
        last_scan_at: last_scan
            .map(|text| parse_rfc3339(3, &text))
            .transpose()?,
    })
}

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    let modified: String = row.get(6)?;
    let capture: Option<String> = row.get(7)?;
    let flag: String = row.get(11)?;
    Ok(Asset {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        path: row.get(2)?,
        filename: row.get(3)?,
        extension: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        modified_at: parse_rfc3339(6, &modified)?,
        capture_date: capture.map(|text| parse_rfc3339(7, &text)).transpose()?,
        width: row.get(8)?,
        height: row.get(9)?,
        orientation: row.get(10)?,
        flag: Flag::from_str(&flag).unwrap_or_default(),
    })
}
