//! Literoom — a non-destructive photo catalog and raster edit engine.
//!
//! The crate provides the engineering core of a desktop photo editor for
//! large local libraries: a deterministic floating-point pixel pipeline
//! (decode, rotate, crop, tonal adjustments, tone curve, gradient masks), a
//! persistent asset index with compound-indexed queries, a two-tier
//! thumbnail/preview cache, a viewport-driven priority scheduler over a
//! fixed render worker pool, a debounced edit coordinator, and a
//! collision-safe JPEG exporter. UI widgets, file pickers, and store
//! plumbing are external collaborators behind the [`vfs::HostFs`] trait and
//! the [`engine::Engine`] command surface.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod catalog;
pub mod edit;
pub mod engine;
pub mod errors;
pub mod export;
pub mod pipeline;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod testing;
pub mod util;
pub mod vfs;

pub use catalog::{Asset, AssetIndex, EditState, Flag, FlagFilter, Folder, RenderKind};
pub use engine::{Engine, EngineEvent, ViewMode};
pub use errors::{DecodeError, Error, Result};
pub use pipeline::{PipelineRunner, RenderTier, SourceFormat};
pub use scheduler::{Operation, Priority, Scheduler, Viewport};
pub use settings::EngineSettings;
pub use store::{BlobStore, HandleStore};
pub use util::CancelToken;
pub use vfs::{Handle, HostFs, MemoryFs, NativeFs, PermissionState, UserGesture};
