//! JPEG Encode Kernel

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::errors::{Error, Result};
use crate::pipeline::buffer::PixelBuf;

/// Default quality for cached thumbnails and previews.
pub const DEFAULT_QUALITY: u8 = 85;

/// Encodes the buffer as a baseline JPEG at the given quality (1–100).
pub fn encode_jpeg(buf: &PixelBuf, quality: u8) -> Result<Vec<u8>> {
    let quality = quality.clamp(1, 100);
    let rgb = buf.to_rgb8();
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .write_image(&rgb, buf.width(), buf.height(), ExtendedColorType::Rgb8)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(out)
}
