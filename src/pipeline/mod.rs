//! The Pixel Pipeline
//!
//! Deterministic, floating-point, per-pixel processing: decode → rotate →
//! crop → global adjustments → tone curve → local masks, with a histogram
//! side channel and JPEG encode at the boundary. [`runner::PipelineRunner`]
//! orchestrates the kernels and owns the stage cache; everything else in
//! this module is a pure kernel over [`buffer::PixelBuf`].

pub mod adjust;
pub mod arw;
pub mod buffer;
pub mod crop;
pub mod curve;
pub mod decode;
pub mod encode;
pub mod histogram;
pub mod mask;
pub mod params;
pub mod resize;
pub mod rotate;
pub mod runner;

pub use buffer::PixelBuf;
pub use decode::{DecodeIntent, SourceFormat};
pub use histogram::HistogramData;
pub use runner::{PipelineRunner, RenderRequest, RenderTier};
