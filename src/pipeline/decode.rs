//! Decode Kernel
//!
//! Turns source bytes into the working pixel format. Detection is
//! extension-first, validated against magic bytes before any heavy decode.
//! JPEG goes through the `image` crate; ARW goes through the TIFF reader —
//! embedded preview for thumbnail-grade requests, CFA demosaic (when the raw
//! is uncompressed) for full-grade requests. EXIF orientation is applied
//! here so every downstream stage sees upright pixels.

use chrono::{DateTime, Utc};
use image::ImageFormat;

use crate::errors::{DecodeError, Result};
use crate::pipeline::arw;
use crate::pipeline::buffer::PixelBuf;
use crate::util::CancelToken;

/// Source formats the catalog accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Jpeg,
    Arw,
}

/// Catalogable extensions, lower-case.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "arw"];

impl SourceFormat {
    /// Case-insensitive extension mapping.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "arw" => Some(SourceFormat::Arw),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpeg",
            SourceFormat::Arw => "arw",
        }
    }
}

/// How much fidelity a decode request needs.
///
/// `Thumbnail` permits the embedded preview of a raw file; `Full` demands
/// sensor-resolution pixels where the container provides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeIntent {
    Thumbnail,
    Full,
}

/// Header-derived facts about a source file.
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub capture_date: Option<DateTime<Utc>>,
    pub orientation: Option<u16>,
}

/// Cheap magic-byte validation before committing to a heavy decode.
pub fn validate_magic(bytes: &[u8], format: SourceFormat) -> Result<()> {
    match format {
        SourceFormat::Jpeg => {
            if bytes.len() < 3 {
                return Err(DecodeError::Truncated.into());
            }
            if bytes[0] != 0xFF || bytes[1] != 0xD8 {
                return Err(DecodeError::UnsupportedFormat(
                    "missing JPEG SOI marker".to_string(),
                )
                .into());
            }
            Ok(())
        }
        SourceFormat::Arw => arw::TiffReader::parse(bytes).map(|_| ()),
    }
}

/// Extracts metadata from a file prefix without decoding pixels.
///
/// Best effort: anything unreadable comes back `None`.
#[must_use]
pub fn probe_metadata(bytes: &[u8], format: SourceFormat) -> SourceMetadata {
    let mut meta = SourceMetadata::default();
    match format {
        SourceFormat::Jpeg => {
            if let Some((w, h)) = jpeg_dimensions(bytes) {
                meta.width = Some(w);
                meta.height = Some(h);
            }
            if let Some(tiff) = jpeg_exif_tiff(bytes) {
                if let Ok(info) = arw::parse_tiff(tiff) {
                    meta.capture_date = info.capture_date;
                    meta.orientation = info.orientation;
                }
            }
        }
        SourceFormat::Arw => {
            if let Ok(info) = arw::parse_tiff(bytes) {
                if let Some((w, h)) = info.largest_dims {
                    meta.width = Some(w);
                    meta.height = Some(h);
                }
                meta.capture_date = info.capture_date;
                meta.orientation = info.orientation;
            }
        }
    }
    meta
}

/// Decodes source bytes into upright working pixels.
pub fn decode(
    bytes: &[u8],
    format: SourceFormat,
    intent: DecodeIntent,
    token: &CancelToken,
) -> Result<PixelBuf> {
    token.check()?;
    validate_magic(bytes, format)?;

    match format {
        SourceFormat::Jpeg => {
            let orientation = jpeg_exif_tiff(bytes)
                .and_then(|tiff| arw::parse_tiff(tiff).ok())
                .and_then(|info| info.orientation);
            let pixels = decode_jpeg_pixels(bytes)?;
            token.check()?;
            Ok(apply_orientation(pixels, orientation.unwrap_or(1)))
        }
        SourceFormat::Arw => {
            let info = arw::parse_tiff(bytes)?;
            let orientation = info.orientation.unwrap_or(1);

            let pixels = match intent {
                DecodeIntent::Thumbnail => decode_arw_preview(bytes, &info)?,
                DecodeIntent::Full => {
                    if let Some(frame) = &info.cfa {
                        arw::demosaic(bytes, frame, arw::is_little_endian(bytes), token)?
                    } else {
                        log::warn!(
                            "raw frame is compressed; falling back to the embedded preview"
                        );
                        decode_arw_preview(bytes, &info)?
                    }
                }
            };
            token.check()?;
            Ok(apply_orientation(pixels, orientation))
        }
    }
}

fn decode_arw_preview(bytes: &[u8], info: &arw::TiffInfo) -> Result<PixelBuf> {
    let preview = arw::largest_preview(bytes, info)
        .ok_or_else(|| DecodeError::Corrupt("raw file has no embedded preview".to_string()))?;
    decode_jpeg_pixels(preview)
}

fn decode_jpeg_pixels(bytes: &[u8]) -> Result<PixelBuf> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    let rgb = img.to_rgb8();
    Ok(PixelBuf::from_rgb8(rgb.width(), rgb.height(), rgb.as_raw()))
}

// ============================================================================
// EXIF orientation
// ============================================================================

/// Normalizes pixels by the EXIF orientation value (1–8).
#[must_use]
pub fn apply_orientation(buf: PixelBuf, orientation: u16) -> PixelBuf {
    let (w, h) = (buf.width(), buf.height());
    let remap = |out_w: u32, out_h: u32, f: &dyn Fn(u32, u32) -> (u32, u32)| -> PixelBuf {
        let mut out = PixelBuf::new(out_w, out_h);
        for y in 0..out_h {
            for x in 0..out_w {
                let (sx, sy) = f(x, y);
                out.set(x, y, buf.get(sx, sy));
            }
        }
        out
    };

    match orientation {
        2 => remap(w, h, &|x, y| (w - 1 - x, y)),
        3 => remap(w, h, &|x, y| (w - 1 - x, h - 1 - y)),
        4 => remap(w, h, &|x, y| (x, h - 1 - y)),
        5 => remap(h, w, &|x, y| (y, x)),
        6 => remap(h, w, &|x, y| (y, h - 1 - x)),
        7 => remap(h, w, &|x, y| (w - 1 - y, h - 1 - x)),
        8 => remap(h, w, &|x, y| (w - 1 - y, x)),
        _ => buf,
    }
}

// ============================================================================
// JPEG header scanning
// ============================================================================

/// Pulls `(width, height)` from the first SOF segment, without decoding.
#[must_use]
pub fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    for (marker, payload) in JpegSegments::new(bytes) {
        // SOF0..SOF15 minus DHT/JPG/DAC carry frame dimensions.
        if (0xC0..=0xCF).contains(&marker) && ![0xC4, 0xC8, 0xCC].contains(&marker) {
            if payload.len() < 5 {
                return None;
            }
            let height = u32::from(u16::from_be_bytes([payload[1], payload[2]]));
            let width = u32::from(u16::from_be_bytes([payload[3], payload[4]]));
            return Some((width, height));
        }
    }
    None
}

/// The TIFF blob inside the first EXIF APP1 segment, if present.
#[must_use]
pub fn jpeg_exif_tiff(bytes: &[u8]) -> Option<&[u8]> {
    for (marker, payload) in JpegSegments::new(bytes) {
        if marker == 0xE1 && payload.len() > 6 && &payload[..6] == b"Exif\0\0" {
            return Some(&payload[6..]);
        }
    }
    None
}

/// Iterator over JPEG marker segments `(marker, payload)` until SOS.
struct JpegSegments<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> JpegSegments<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        // Skip the SOI marker.
        let pos = if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
            2
        } else {
            bytes.len()
        };
        Self { bytes, pos }
    }
}

impl<'a> Iterator for JpegSegments<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Resync on marker fill bytes.
            while self.pos < self.bytes.len() && self.bytes[self.pos] != 0xFF {
                self.pos += 1;
            }
            while self.pos < self.bytes.len() && self.bytes[self.pos] == 0xFF {
                self.pos += 1;
            }
            let marker = *self.bytes.get(self.pos)?;
            self.pos += 1;

            // Entropy-coded data follows SOS; stop scanning.
            if marker == 0xDA || marker == 0xD9 {
                return None;
            }
            // Standalone markers without a length field.
            if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
                continue;
            }

            let len_bytes = self.bytes.get(self.pos..self.pos + 2)?;
            let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            if len < 2 {
                return None;
            }
            let payload = self.bytes.get(self.pos + 2..self.pos + len)?;
            self.pos += len;
            return Some((marker, payload));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn extension_mapping_is_case_insensitive() {
        assert_eq!(SourceFormat::from_extension("JPG"), Some(SourceFormat::Jpeg));
        assert_eq!(SourceFormat::from_extension("Arw"), Some(SourceFormat::Arw));
        assert_eq!(SourceFormat::from_extension("png"), None);
    }

    #[test]
    fn magic_validation_catches_mislabeled_files() {
        let arw = testing::synthetic_arw();
        assert!(validate_magic(&arw, SourceFormat::Jpeg).is_err());
        assert!(validate_magic(&arw, SourceFormat::Arw).is_ok());
    }

    #[test]
    fn jpeg_round_trip_decodes() {
        let jpeg = testing::grey_jpeg(6, 4, 100);
        let buf = decode(&jpeg, SourceFormat::Jpeg, DecodeIntent::Full, &CancelToken::new())
            .unwrap();
        assert_eq!((buf.width(), buf.height()), (6, 4));
    }

    #[test]
    fn jpeg_header_probe_reads_dimensions_and_exif() {
        let jpeg = testing::jpeg_with_exif(
            &testing::grey_jpeg(6, 4, 100),
            6,
            testing::FIXTURE_DATETIME,
        );
        let meta = probe_metadata(&jpeg, SourceFormat::Jpeg);
        assert_eq!(meta.width, Some(6));
        assert_eq!(meta.height, Some(4));
        assert_eq!(meta.orientation, Some(6));
        assert!(meta.capture_date.is_some());
    }

    #[test]
    fn exif_rotation_is_applied_on_decode() {
        let jpeg = testing::jpeg_with_exif(
            &testing::grey_jpeg(6, 4, 100),
            6,
            testing::FIXTURE_DATETIME,
        );
        let buf = decode(&jpeg, SourceFormat::Jpeg, DecodeIntent::Full, &CancelToken::new())
            .unwrap();
        // Orientation 6 is a quarter turn: dimensions swap.
        assert_eq!((buf.width(), buf.height()), (4, 6));
    }

    #[test]
    fn arw_thumbnail_uses_embedded_preview() {
        let arw = testing::synthetic_arw();
        let buf = decode(&arw, SourceFormat::Arw, DecodeIntent::Thumbnail, &CancelToken::new())
            .unwrap();
        assert_eq!((buf.width(), buf.height()), (8, 8));
    }

    #[test]
    fn arw_full_demosaics_sensor_frame() {
        let arw = testing::synthetic_arw();
        let buf = decode(&arw, SourceFormat::Arw, DecodeIntent::Full, &CancelToken::new())
            .unwrap();
        assert_eq!((buf.width(), buf.height()), (16, 16));
    }

    #[test]
    fn orientation_remaps_are_involutions_where_expected() {
        let mut buf = PixelBuf::new(3, 2);
        buf.set(0, 0, [1.0, 0.0, 0.0]);
        let flipped = apply_orientation(buf.clone(), 2);
        assert_eq!(flipped.get(2, 0), [1.0, 0.0, 0.0]);
        let back = apply_orientation(flipped, 2);
        assert_eq!(back, buf);

        let turned = apply_orientation(buf.clone(), 6);
        assert_eq!((turned.width(), turned.height()), (2, 3));
    }
}
