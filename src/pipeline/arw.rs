//! TIFF/IFD Container Reader
//!
//! Sony ARW files are TIFF containers: a chain of IFDs carrying embedded
//! JPEG previews, EXIF metadata, and (for uncompressed raws) a CFA sensor
//! frame. This module walks the IFD graph defensively — every offset is
//! bounds-checked and cycles are refused — and exposes just what the
//! pipeline needs: previews, capture date, orientation, dimensions, and a
//! demosaicable CFA frame when one exists.
//!
//! JPEG EXIF blocks (APP1) are the same TIFF structure, so the decode path
//! reuses this reader for both formats.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::errors::{DecodeError, Result};
use crate::pipeline::buffer::PixelBuf;
use crate::util::CancelToken;

// TIFF tags the engine reads.
const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_LENGTH: u16 = 0x0101;
const TAG_BITS_PER_SAMPLE: u16 = 0x0102;
const TAG_COMPRESSION: u16 = 0x0103;
const TAG_PHOTOMETRIC: u16 = 0x0106;
const TAG_STRIP_OFFSETS: u16 = 0x0111;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_STRIP_BYTE_COUNTS: u16 = 0x0117;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_SUB_IFDS: u16 = 0x014A;
const TAG_JPEG_OFFSET: u16 = 0x0201;
const TAG_JPEG_LENGTH: u16 = 0x0202;
const TAG_CFA_PATTERN: u16 = 0x828E;
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;

const PHOTOMETRIC_CFA: u32 = 32803;
const COMPRESSION_NONE: u32 = 1;

/// Hard cap on IFDs visited; real files carry well under a dozen.
const MAX_IFDS: usize = 32;

/// One embedded JPEG preview.
#[derive(Debug, Clone, Copy)]
pub struct PreviewLoc {
    pub offset: usize,
    pub len: usize,
}

/// An uncompressed CFA sensor frame ready for demosaic.
#[derive(Debug, Clone)]
pub struct CfaFrame {
    pub width: u32,
    pub height: u32,
    pub bits: u32,
    /// 2×2 colour pattern, values 0=R 1=G 2=B, row-major.
    pub pattern: [u8; 4],
    /// Byte ranges of the sample strips, in row order.
    pub strips: Vec<(usize, usize)>,
}

/// Everything the catalog and decode paths need from a TIFF container.
#[derive(Debug, Default)]
pub struct TiffInfo {
    pub orientation: Option<u16>,
    pub capture_date: Option<DateTime<Utc>>,
    pub largest_dims: Option<(u32, u32)>,
    pub previews: Vec<PreviewLoc>,
    pub cfa: Option<CfaFrame>,
}

struct Entry {
    tag: u16,
    ftype: u16,
    count: u32,
    /// Offset of the entry's 4-byte value field within the file.
    value_field: usize,
}

/// Bounds-checked little/big-endian reader over a TIFF byte slice.
pub struct TiffReader<'a> {
    bytes: &'a [u8],
    le: bool,
}

impl<'a> TiffReader<'a> {
    /// Validates the TIFF header and wraps the bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(DecodeError::Truncated.into());
        }
        let le = match &bytes[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => {
                return Err(
                    DecodeError::UnsupportedFormat("not a TIFF container".to_string()).into(),
                );
            }
        };
        let reader = Self { bytes, le };
        if reader.u16_at(2)? != 42 {
            return Err(DecodeError::Corrupt("bad TIFF magic".to_string()).into());
        }
        Ok(reader)
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        let slice = self
            .bytes
            .get(offset..offset + 2)
            .ok_or(DecodeError::Truncated)?;
        let raw = [slice[0], slice[1]];
        Ok(if self.le {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let slice = self
            .bytes
            .get(offset..offset + 4)
            .ok_or(DecodeError::Truncated)?;
        let raw = [slice[0], slice[1], slice[2], slice[3]];
        Ok(if self.le {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn type_size(ftype: u16) -> usize {
        match ftype {
            1 | 2 | 6 | 7 => 1,
            3 | 8 => 2,
            4 | 9 | 11 => 4,
            5 | 10 | 12 => 8,
            _ => 0,
        }
    }

    /// Offset of an entry's payload, resolving the inline-vs-pointer rule.
    fn value_offset(&self, entry: &Entry) -> Result<usize> {
        let total = Self::type_size(entry.ftype) * entry.count as usize;
        if total == 0 {
            return Err(DecodeError::Corrupt(format!("tag {:#06x} has no payload", entry.tag)).into());
        }
        if total <= 4 {
            Ok(entry.value_field)
        } else {
            Ok(self.u32_at(entry.value_field)? as usize)
        }
    }

    /// Reads up to `max` numeric values (SHORT or LONG) from an entry.
    fn entry_u32s(&self, entry: &Entry, max: usize) -> Result<Vec<u32>> {
        let count = (entry.count as usize).min(max);
        let base = self.value_offset(entry)?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let value = match entry.ftype {
                1 | 7 => u32::from(*self.bytes.get(base + i).ok_or(DecodeError::Truncated)?),
                3 => u32::from(self.u16_at(base + i * 2)?),
                4 => self.u32_at(base + i * 4)?,
                _ => {
                    return Err(DecodeError::Corrupt(format!(
                        "tag {:#06x} has non-integer type {}",
                        entry.tag, entry.ftype
                    ))
                    .into());
                }
            };
            out.push(value);
        }
        Ok(out)
    }

    fn entry_u32(&self, entry: &Entry) -> Result<u32> {
        self.entry_u32s(entry, 1)?
            .first()
            .copied()
            .ok_or_else(|| DecodeError::Corrupt("empty entry".to_string()).into())
    }

    fn entry_ascii(&self, entry: &Entry) -> Option<String> {
        if entry.ftype != 2 {
            return None;
        }
        let base = self.value_offset(entry).ok()?;
        let len = entry.count as usize;
        let slice = self.bytes.get(base..base + len)?;
        let end = slice.iter().position(|&b| b == 0).unwrap_or(len);
        std::str::from_utf8(&slice[..end]).ok().map(str::to_owned)
    }

    fn read_ifd(&self, offset: usize) -> Result<(Vec<Entry>, usize)> {
        let count = self.u16_at(offset)? as usize;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let base = offset + 2 + i * 12;
            entries.push(Entry {
                tag: self.u16_at(base)?,
                ftype: self.u16_at(base + 2)?,
                count: self.u32_at(base + 4)?,
                value_field: base + 8,
            });
        }
        let next = self.u32_at(offset + 2 + count * 12)? as usize;
        Ok((entries, next))
    }
}

fn parse_exif_datetime(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Walks the IFD graph of a TIFF blob and summarizes it.
pub fn parse_tiff(bytes: &[u8]) -> Result<TiffInfo> {
    let reader = TiffReader::parse(bytes)?;
    let mut info = TiffInfo::default();
    let mut date_time_fallback: Option<DateTime<Utc>> = None;

    let mut pending = vec![reader.u32_at(4)? as usize];
    let mut visited: Vec<usize> = Vec::new();

    while let Some(offset) = pending.pop() {
        if offset == 0 || visited.contains(&offset) || visited.len() >= MAX_IFDS {
            continue;
        }
        visited.push(offset);

        let Ok((entries, next)) = reader.read_ifd(offset) else {
            // A damaged side IFD should not sink metadata already gathered.
            log::debug!("skipping unreadable IFD at offset {offset}");
            continue;
        };
        if next != 0 {
            pending.push(next);
        }

        let mut width = None;
        let mut height = None;
        let mut bits = None;
        let mut compression = None;
        let mut photometric = None;
        let mut strip_offsets = Vec::new();
        let mut strip_counts = Vec::new();
        let mut jpeg_offset = None;
        let mut jpeg_len = None;
        let mut cfa_pattern = None;

        for entry in &entries {
            match entry.tag {
                TAG_IMAGE_WIDTH => width = reader.entry_u32(entry).ok(),
                TAG_IMAGE_LENGTH => height = reader.entry_u32(entry).ok(),
                TAG_BITS_PER_SAMPLE => bits = reader.entry_u32(entry).ok(),
                TAG_COMPRESSION => compression = reader.entry_u32(entry).ok(),
                TAG_PHOTOMETRIC => photometric = reader.entry_u32(entry).ok(),
                TAG_STRIP_OFFSETS => {
                    strip_offsets = reader.entry_u32s(entry, 4096).unwrap_or_default();
                }
                TAG_STRIP_BYTE_COUNTS => {
                    strip_counts = reader.entry_u32s(entry, 4096).unwrap_or_default();
                }
                TAG_ORIENTATION => {
                    if info.orientation.is_none() {
                        info.orientation = reader.entry_u32(entry).ok().map(|v| v as u16);
                    }
                }
                TAG_DATE_TIME => {
                    if date_time_fallback.is_none() {
                        date_time_fallback =
                            reader.entry_ascii(entry).as_deref().and_then(parse_exif_datetime);
                    }
                }
                TAG_DATE_TIME_ORIGINAL => {
                    if info.capture_date.is_none() {
                        info.capture_date =
                            reader.entry_ascii(entry).as_deref().and_then(parse_exif_datetime);
                    }
                }
                TAG_JPEG_OFFSET => jpeg_offset = reader.entry_u32(entry).ok(),
                TAG_JPEG_LENGTH => jpeg_len = reader.entry_u32(entry).ok(),
                TAG_CFA_PATTERN => {
                    cfa_pattern = reader.entry_u32s(entry, 4).ok().and_then(|v| {
                        (v.len() == 4).then(|| [v[0] as u8, v[1] as u8, v[2] as u8, v[3] as u8])
                    });
                }
                TAG_SUB_IFDS => {
                    if let Ok(subs) = reader.entry_u32s(entry, 8) {
                        pending.extend(subs.into_iter().map(|o| o as usize));
                    }
                }
                TAG_EXIF_IFD => {
                    if let Ok(exif) = reader.entry_u32(entry) {
                        pending.push(exif as usize);
                    }
                }
                _ => {}
            }
        }

        if let (Some(w), Some(h)) = (width, height) {
            if info
                .largest_dims
                .is_none_or(|(lw, lh)| u64::from(w) * u64::from(h) > u64::from(lw) * u64::from(lh))
            {
                info.largest_dims = Some((w, h));
            }
        }

        // Embedded JPEG preview.
        if let (Some(off), Some(len)) = (jpeg_offset, jpeg_len) {
            let (off, len) = (off as usize, len as usize);
            let valid = bytes
                .get(off..off + len)
                .is_some_and(|b| b.len() >= 2 && b[0] == 0xFF && b[1] == 0xD8);
            if valid {
                info.previews.push(PreviewLoc { offset: off, len });
            } else {
                log::debug!("ignoring out-of-bounds preview at {off}+{len}");
            }
        }

        // Uncompressed CFA frame.
        if photometric == Some(PHOTOMETRIC_CFA)
            && compression == Some(COMPRESSION_NONE)
            && !strip_offsets.is_empty()
            && strip_offsets.len() == strip_counts.len()
        {
            if let (Some(w), Some(h), Some(bits)) = (width, height, bits) {
                let strips: Vec<(usize, usize)> = strip_offsets
                    .iter()
                    .zip(&strip_counts)
                    .map(|(&o, &c)| (o as usize, c as usize))
                    .collect();
                let total: usize = strips.iter().map(|&(_, c)| c).sum();
                let bytes_per_sample = if bits > 8 { 2 } else { 1 };
                if total >= w as usize * h as usize * bytes_per_sample
                    && strips
                        .iter()
                        .all(|&(o, c)| bytes.get(o..o + c).is_some())
                {
                    info.cfa = Some(CfaFrame {
                        width: w,
                        height: h,
                        bits,
                        pattern: cfa_pattern.unwrap_or([0, 1, 1, 2]), // RGGB
                        strips,
                    });
                }
            }
        }
    }

    if info.capture_date.is_none() {
        info.capture_date = date_time_fallback;
    }
    Ok(info)
}

/// Returns the largest embedded JPEG preview, if any.
#[must_use]
pub fn largest_preview<'a>(bytes: &'a [u8], info: &TiffInfo) -> Option<&'a [u8]> {
    info.previews
        .iter()
        .max_by_key(|p| p.len)
        .and_then(|p| bytes.get(p.offset..p.offset + p.len))
}

// ============================================================================
// CFA demosaic
// ============================================================================

/// Bilinear demosaic of an uncompressed CFA frame into working RGB.
pub fn demosaic(bytes: &[u8], frame: &CfaFrame, little_endian: bool, token: &CancelToken) -> Result<PixelBuf> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let max_value = ((1u32 << frame.bits.clamp(1, 16)) - 1) as f32;

    // Flatten strips into one sample plane.
    let mut samples = Vec::with_capacity(w * h);
    if frame.bits > 8 {
        for &(offset, count) in &frame.strips {
            let strip = bytes.get(offset..offset + count).ok_or(DecodeError::Truncated)?;
            for pair in strip.chunks_exact(2) {
                let raw = [pair[0], pair[1]];
                let v = if little_endian {
                    u16::from_le_bytes(raw)
                } else {
                    u16::from_be_bytes(raw)
                };
                samples.push(f32::from(v) / max_value);
            }
        }
    } else {
        for &(offset, count) in &frame.strips {
            let strip = bytes.get(offset..offset + count).ok_or(DecodeError::Truncated)?;
            samples.extend(strip.iter().map(|&b| f32::from(b) / max_value));
        }
    }
    if samples.len() < w * h {
        return Err(DecodeError::Truncated.into());
    }

    let color_at = |x: usize, y: usize| -> u8 { frame.pattern[(y % 2) * 2 + (x % 2)] };
    let sample_at = |x: usize, y: usize| -> f32 { samples[y * w + x] };

    let mut out = PixelBuf::new(frame.width, frame.height);
    for y in 0..h {
        if y % 32 == 0 {
            token.check()?;
        }
        for x in 0..w {
            let mut sums = [0.0f32; 3];
            let mut counts = [0u32; 3];
            let y_lo = y.saturating_sub(1);
            let y_hi = (y + 1).min(h - 1);
            let x_lo = x.saturating_sub(1);
            let x_hi = (x + 1).min(w - 1);
            for ny in y_lo..=y_hi {
                for nx in x_lo..=x_hi {
                    let c = color_at(nx, ny) as usize;
                    if c < 3 {
                        sums[c] += sample_at(nx, ny);
                        counts[c] += 1;
                    }
                }
            }
            let own = color_at(x, y) as usize;
            let mut px = [0.0f32; 3];
            for c in 0..3 {
                px[c] = if c == own {
                    sample_at(x, y)
                } else if counts[c] > 0 {
                    sums[c] / counts[c] as f32
                } else {
                    0.0
                };
            }
            out.set(x as u32, y as u32, px);
        }
    }
    Ok(out)
}

/// Endianness of a TIFF blob, needed to read CFA samples.
pub fn is_little_endian(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn rejects_non_tiff() {
        assert!(TiffReader::parse(b"PNG\x00xxxx").is_err());
        assert!(TiffReader::parse(b"II").is_err());
    }

    #[test]
    fn parses_synthetic_arw() {
        let arw = testing::synthetic_arw();
        let info = parse_tiff(&arw).unwrap();
        assert_eq!(info.orientation, Some(1));
        assert!(info.capture_date.is_some());
        assert_eq!(info.previews.len(), 1);
        assert!(info.cfa.is_some());

        let preview = largest_preview(&arw, &info).unwrap();
        assert_eq!(&preview[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn demosaic_recovers_flat_grey() {
        let arw = testing::synthetic_arw();
        let info = parse_tiff(&arw).unwrap();
        let frame = info.cfa.unwrap();
        let buf = demosaic(&arw, &frame, is_little_endian(&arw), &CancelToken::new()).unwrap();
        assert_eq!((buf.width(), buf.height()), (frame.width, frame.height));
        // The synthetic frame is a uniform mid-grey field; every interior
        // pixel should demosaic to the same value on all channels.
        let px = buf.get(4, 4);
        for c in px {
            assert!((c - 0.5).abs() < 0.01, "channel {c} not mid-grey");
        }
    }
}
