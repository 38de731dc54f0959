//! Synthetic fixtures for the test suite.
//!
//! Builders for small, fully in-memory image files: plain JPEGs, JPEGs with
//! an EXIF APP1 block, and a minimal uncompressed ARW-style TIFF carrying an
//! embedded preview, capture date, orientation, and a CFA frame. Kept in the
//! library (rather than a tests-only helper) so unit and integration tests
//! share one set of fixtures.

use crate::pipeline::buffer::PixelBuf;
use crate::pipeline::encode::encode_jpeg;

/// Capture date embedded by the synthetic fixtures.
pub const FIXTURE_DATETIME: &str = "2024:06:01 12:00:00";

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Writes one 12-byte IFD entry with a little-endian u32 value field.
fn push_entry(buf: &mut Vec<u8>, tag: u16, ftype: u16, count: u32, value: u32) {
    push_u16(buf, tag);
    push_u16(buf, ftype);
    push_u32(buf, count);
    push_u32(buf, value);
}

/// A flat-grey JPEG of the given dimensions.
#[must_use]
pub fn grey_jpeg(width: u32, height: u32, level: u8) -> Vec<u8> {
    let bytes = vec![level; width as usize * height as usize * 3];
    let buf = PixelBuf::from_rgb8(width, height, &bytes);
    encode_jpeg(&buf, 90).expect("fixture encode")
}

/// A JPEG built from explicit RGB bytes.
#[must_use]
pub fn jpeg_from_rgb(width: u32, height: u32, rgb: &[u8], quality: u8) -> Vec<u8> {
    let buf = PixelBuf::from_rgb8(width, height, rgb);
    encode_jpeg(&buf, quality).expect("fixture encode")
}

/// Splices a minimal EXIF APP1 block (orientation + `DateTime`) into a JPEG.
#[must_use]
pub fn jpeg_with_exif(jpeg: &[u8], orientation: u16, datetime: &str) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "fixture input must be a JPEG");
    let mut date = datetime.as_bytes().to_vec();
    date.resize(20, 0);

    // TIFF blob: header, IFD0 with two entries, date string.
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    push_u16(&mut tiff, 42);
    push_u32(&mut tiff, 8); // IFD0 right after the header
    push_u16(&mut tiff, 2);
    push_entry(&mut tiff, 0x0112, 3, 1, u32::from(orientation));
    push_entry(&mut tiff, 0x0132, 2, 20, 38); // string follows the IFD
    push_u32(&mut tiff, 0); // no next IFD
    tiff.extend_from_slice(&date);

    let payload_len = 2 + 6 + tiff.len(); // length field + "Exif\0\0" + TIFF
    let mut out = Vec::with_capacity(jpeg.len() + payload_len + 2);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// A minimal little-endian ARW-style TIFF: 16×16 uncompressed RGGB CFA frame
/// at uniform mid-grey, one embedded 8×8 JPEG preview, orientation 1, and a
/// capture date in both IFD0 and the Exif IFD.
#[must_use]
pub fn synthetic_arw() -> Vec<u8> {
    const DIM: u32 = 16;
    const BITS: u16 = 16;
    let preview = grey_jpeg(8, 8, 128);
    let plen = preview.len() as u32;

    // Fixed layout: header 8, IFD0 150, Exif IFD 18, two 20-byte date
    // strings, preview, CFA strip.
    let ifd0_offset = 8u32;
    let exif_offset = ifd0_offset + 2 + 12 * 12 + 4;
    let date0_offset = exif_offset + 2 + 12 + 4;
    let date1_offset = date0_offset + 20;
    let preview_offset = date1_offset + 20;
    let strip_offset = preview_offset + plen;
    let strip_len = DIM * DIM * 2;

    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    push_u16(&mut out, 42);
    push_u32(&mut out, ifd0_offset);

    // IFD0
    push_u16(&mut out, 12);
    push_entry(&mut out, 0x0100, 3, 1, DIM); // width
    push_entry(&mut out, 0x0101, 3, 1, DIM); // height
    push_entry(&mut out, 0x0102, 3, 1, u32::from(BITS));
    push_entry(&mut out, 0x0103, 3, 1, 1); // uncompressed
    push_entry(&mut out, 0x0106, 3, 1, 32803); // CFA
    push_entry(&mut out, 0x0111, 4, 1, strip_offset);
    push_entry(&mut out, 0x0112, 3, 1, 1); // orientation
    push_entry(&mut out, 0x0117, 4, 1, strip_len);
    push_entry(&mut out, 0x0132, 2, 20, date0_offset);
    push_entry(&mut out, 0x0201, 4, 1, preview_offset);
    push_entry(&mut out, 0x0202, 4, 1, plen);
    push_entry(&mut out, 0x8769, 4, 1, exif_offset);
    push_u32(&mut out, 0);

    // Exif IFD
    push_u16(&mut out, 1);
    push_entry(&mut out, 0x9003, 2, 20, date1_offset);
    push_u32(&mut out, 0);

    let mut date = FIXTURE_DATETIME.as_bytes().to_vec();
    date.resize(20, 0);
    out.extend_from_slice(&date);
    out.extend_from_slice(&date);
    out.extend_from_slice(&preview);

    // Uniform mid-grey CFA samples.
    let sample = (1u32 << BITS) / 2;
    for _ in 0..DIM * DIM {
        push_u16(&mut out, sample as u16);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exif_jpeg_still_decodes() {
        let plain = grey_jpeg(4, 4, 64);
        let tagged = jpeg_with_exif(&plain, 6, FIXTURE_DATETIME);
        let decoded = image::load_from_memory(&tagged).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
    }
}
