//! Error Types
//!
//! The main error type [`Error`] covers every failure mode of the catalog
//! engine: host folder access, decoding, edit-state validation, the render
//! pipeline, the asset index, and export.
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. [`Error::Cancelled`] is a control-flow
//! outcome, never something to show the user; check it with
//! [`Error::is_cancelled`] before surfacing an error.

use thiserror::Error;

/// Why a source file could not be decoded into pixels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The file extension or magic bytes name a format the engine does not read.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The container structure is damaged beyond recovery.
    #[error("corrupt image data: {0}")]
    Corrupt(String),

    /// The file ends before the declared data does.
    #[error("truncated image data")]
    Truncated,
}

/// The main error type for the catalog engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Host folder access
    // ========================================================================
    /// Folder access refused or revoked by the host.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An asset or folder vanished between queries.
    #[error("not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Pixel pipeline
    // ========================================================================
    /// Source bytes cannot be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Tone-curve control points violate the curve contract.
    #[error("invalid tone curve: {0}")]
    InvalidCurve(String),

    /// Crop rectangle is degenerate or out of range.
    #[error("invalid crop: {0}")]
    InvalidCrop(String),

    /// Mask geometry is out of range.
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// JPEG encode failed.
    #[error("encode failed: {0}")]
    Encode(String),

    // ========================================================================
    // Control flow
    // ========================================================================
    /// Operation aborted via its cancellation token. Never user-visible.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation exceeded its configured time budget.
    #[error("{operation} timed out after {elapsed_ms} ms")]
    Timeout {
        /// Name of the operation that ran over.
        operation: &'static str,
        /// How long it ran before the check fired.
        elapsed_ms: u64,
    },

    // ========================================================================
    // Persistence
    // ========================================================================
    /// Persistent cache or export destination is out of space.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// The asset index was written by a newer version of the engine.
    #[error("catalog schema version {found} is newer than supported version {supported}")]
    SchemaUnsupported {
        /// Version found in the database.
        found: u32,
        /// Highest version this build can open.
        supported: u32,
    },

    /// Another process is holding the asset index open; retry later.
    #[error("catalog is busy; retry")]
    IndexBusy,

    /// Asset index query or statement failure.
    #[error("catalog error: {0}")]
    Index(#[from] rusqlite::Error),

    /// File I/O error outside the decode path.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Edit-state JSON could not be read or written.
    #[error("edit state serialization error: {0}")]
    EditState(#[from] serde_json::Error),

    // ========================================================================
    // Export
    // ========================================================================
    /// Filename template contains an unknown or malformed token.
    #[error("invalid filename template: {0}")]
    InvalidTemplate(String),
}

impl Error {
    /// True when this error is the cancellation outcome rather than a fault.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(DecodeError::Corrupt(err.to_string()))
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
