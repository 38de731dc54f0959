//! Catalog Data Model
//!
//! Row types for the asset index: assets, folders, per-asset cache metadata,
//! and the query vocabulary (flag filters, sort fields).

use chrono::{DateTime, Utc};

use crate::pipeline::decode::SourceFormat;

/// Stable asset identifier: `folderId` joined with the relative path.
pub type AssetId = String;

/// Derives the stable id for a file within a folder.
#[must_use]
pub fn asset_id_for(folder_id: &str, relative_path: &str) -> AssetId {
    format!("{folder_id}:{relative_path}")
}

/// Culling state of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    #[default]
    Unflagged,
    Pick,
    Reject,
}

impl Flag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Unflagged => "unflagged",
            Flag::Pick => "pick",
            Flag::Reject => "reject",
        }
    }

    #[must_use]
    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "unflagged" => Some(Flag::Unflagged),
            "pick" => Some(Flag::Pick),
            "reject" => Some(Flag::Reject),
            _ => None,
        }
    }
}

/// One image file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub folder_id: String,
    /// `/`-separated path relative to the folder root.
    pub path: String,
    pub filename: String,
    /// Lower-case extension without the dot.
    pub extension: String,
    pub file_size: u64,
    pub modified_at: DateTime<Utc>,
    pub capture_date: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// EXIF orientation (tag 274), when the header carried one.
    pub orientation: Option<u16>,
    pub flag: Flag,
}

impl Asset {
    /// Decode format implied by the extension.
    #[must_use]
    pub fn format(&self) -> Option<SourceFormat> {
        SourceFormat::from_extension(&self.extension)
    }
}

/// One user-chosen directory root.
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub id: String,
    pub name: String,
    /// Key into the handle store; the handle itself stays opaque.
    pub handle_key: String,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// Readiness flags and blob keys for one asset's cached renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetadata {
    pub asset_id: AssetId,
    pub thumbnail_ready: bool,
    pub preview1x_ready: bool,
    pub preview2x_ready: bool,
    pub thumbnail_key: Option<String>,
    pub preview1x_key: Option<String>,
    pub preview2x_key: Option<String>,
}

/// The cached render products tracked per asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderKind {
    Thumbnail,
    Preview1x,
    Preview2x,
}

impl RenderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RenderKind::Thumbnail => "thumbnail",
            RenderKind::Preview1x => "preview1x",
            RenderKind::Preview2x => "preview2x",
        }
    }
}

/// Per-flag counts for the header badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounts {
    pub total: u64,
    pub picks: u64,
    pub rejects: u64,
    pub unflagged: u64,
}

/// Grid filter over culling flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagFilter {
    #[default]
    All,
    Pick,
    Reject,
    Unflagged,
}

/// Sortable asset columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CaptureDate,
    Filename,
    ModifiedAt,
    FileSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}
