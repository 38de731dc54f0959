//! The Catalog
//!
//! Persistent asset index ([`index::AssetIndex`]), the data model it stores,
//! versioned edit documents, and the folder scanner that feeds it.

pub mod edit;
pub mod index;
pub mod model;
pub mod scanner;

pub use edit::{EDIT_SCHEMA_VERSION, EditGroups, EditState};
pub use index::AssetIndex;
pub use model::{
    Asset, AssetId, CacheMetadata, Flag, FlagCounts, FlagFilter, Folder, RenderKind,
    SortDirection, SortField,
};
pub use scanner::{ScanOutcome, ScanProgress, Scanner};
