//! Host Folder-Handle Surface
//!
//! The engine never touches paths directly: every directory and file the user
//! grants access to is an opaque [`Handle`] interpreted by a [`HostFs`]
//! implementation. Handles are persistable byte strings — the engine stores
//! them in the handle store and never inspects or normalizes their contents.
//!
//! Two implementations ship with the crate:
//!
//! - [`NativeFs`]: interprets handles as absolute paths on the local disk.
//! - [`MemoryFs`]: an in-memory tree with scriptable permission states, used
//!   by the test suite.
//!
//! Operations that platform conventions gate behind a user gesture
//! ([`HostFs::request`]) take a [`UserGesture`] proof value that only UI code
//! should construct.

mod memory;
mod native;

pub use memory::MemoryFs;
pub use native::NativeFs;

use std::time::SystemTime;

use crate::errors::Result;

/// Opaque, persistable reference to a host-managed file or directory.
///
/// The byte content is owned by the [`HostFs`] that produced the handle;
/// round-tripping it through persistence must yield an equivalent handle.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Handle {
    bytes: Vec<u8>,
}

impl Handle {
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Kind of a directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry yielded while iterating a directory handle.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub handle: Handle,
}

/// Authorization state of a handle, as reported by the host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PermissionState {
    /// Access is currently authorized.
    Granted,
    /// The host will ask the user on the next [`HostFs::request`].
    Prompt,
    /// The user refused access; no automatic retry.
    Denied,
    /// The referenced directory no longer exists.
    Missing,
}

impl PermissionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionState::Granted => "granted",
            PermissionState::Prompt => "prompt",
            PermissionState::Denied => "denied",
            PermissionState::Missing => "missing",
        }
    }
}

/// Size and modification time of a file handle.
#[derive(Clone, Copy, Debug)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
}

/// Proof that a call originates from a user interaction.
///
/// Hosts refuse permission prompts outside input-event handlers; threading
/// this token through keeps that requirement visible in the API.
#[derive(Debug)]
pub struct UserGesture(());

impl UserGesture {
    /// Construct from UI code running inside a user input handler.
    #[must_use]
    pub fn from_user_interaction() -> Self {
        Self(())
    }
}

/// Sink returned by [`HostFs::create_file`].
pub trait FileWriter: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Flushes and finalizes the file. Dropping without closing discards
    /// nothing but may leave a partially written file.
    fn close(self: Box<Self>) -> Result<()>;
}

/// The host filesystem surface — the only system edge of the engine.
pub trait HostFs: Send + Sync {
    /// Authorization state of a handle, without prompting.
    fn query(&self, handle: &Handle) -> PermissionState;

    /// Asks the host to (re-)authorize a handle. Requires a user gesture.
    fn request(&self, handle: &Handle, gesture: &UserGesture) -> PermissionState;

    /// Lists a directory. Fails with `PermissionDenied` when unauthorized.
    fn read_dir(&self, handle: &Handle) -> Result<Vec<DirEntry>>;

    /// Reads a file handle in full.
    fn open_file(&self, handle: &Handle) -> Result<Vec<u8>>;

    /// Reads at most `max_len` leading bytes of a file.
    ///
    /// Metadata extraction reads headers only; implementations should avoid
    /// pulling a whole raw file into memory for it.
    fn read_prefix(&self, handle: &Handle, max_len: usize) -> Result<Vec<u8>> {
        let mut bytes = self.open_file(handle)?;
        bytes.truncate(max_len);
        Ok(bytes)
    }

    /// Size and modification time of a file handle.
    fn file_meta(&self, handle: &Handle) -> Result<FileMeta>;

    /// Resolves a `/`-separated relative path against a directory handle.
    fn resolve(&self, dir: &Handle, relative: &str) -> Result<Handle>;

    /// True when `name` already exists inside the directory.
    fn exists(&self, dir: &Handle, name: &str) -> Result<bool>;

    /// Creates (or truncates) a file inside the directory and returns a writer.
    fn create_file(&self, dir: &Handle, name: &str) -> Result<Box<dyn FileWriter>>;

    /// Human-readable name for UI display. Never fails; falls back to a
    /// placeholder for undisplayable handles.
    fn display_name(&self, handle: &Handle) -> String;
}
