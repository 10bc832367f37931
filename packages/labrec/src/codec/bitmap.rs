//! Legacy run-length bitmap decompressor.
//!
//! Old acquisitions stored camera frames as 8-bit indexed bitmaps with
//! RLE8 compression. This expands them into plain uncompressed 8-bit
//! bitmaps so generic image readers can open them. Input without the `BM`
//! marker, or not declaring RLE8, is returned untouched.
//!
//! Layout handled:
//! ```text
//! [file header 14 bytes: "BM", size, reserved, data offset]
//! [info header 40 bytes: width, height, planes, bpp=8, compression=1, ...]
//! [color table: 256 × 4 bytes]
//! [RLE8 stream: (count, index) pairs with 0x00 escapes]
//! ```

use std::borrow::Cow;

use crate::error::{Result, StoreError};

pub const MARKER: [u8; 2] = *b"BM";

const FILE_HEADER_SIZE: usize = 14;
const INFO_HEADER_SIZE: usize = 40;
const COLOR_TABLE_SIZE: usize = 256 * 4;
const BI_RGB: u32 = 0;
const BI_RLE8: u32 = 1;

// Offsets inside the combined headers.
const OFF_FILE_SIZE: usize = 2;
const OFF_DATA_OFFSET: usize = 10;
const OFF_WIDTH: usize = 18;
const OFF_HEIGHT: usize = 22;
const OFF_BPP: usize = 28;
const OFF_COMPRESSION: usize = 30;
const OFF_IMAGE_SIZE: usize = 34;

/// Largest expanded pixel buffer accepted. The size fields of the output
/// header are `u32`, and real frames stay far below this.
pub const MAX_PIXEL_BYTES: usize = 1 << 28;

fn u16_at(data: &[u8], off: usize) -> Result<u16> {
    data.get(off..off + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| StoreError::InvalidFormat("Bitmap header truncated".into()))
}

fn u32_at(data: &[u8], off: usize) -> Result<u32> {
    data.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| StoreError::InvalidFormat("Bitmap header truncated".into()))
}

fn i32_at(data: &[u8], off: usize) -> Result<i32> {
    Ok(u32_at(data, off)? as i32)
}

/// Whether `data` is a legacy RLE8 bitmap this module would expand.
pub fn is_legacy(data: &[u8]) -> bool {
    data.starts_with(&MARKER)
        && matches!(u32_at(data, OFF_COMPRESSION), Ok(BI_RLE8))
        && matches!(u16_at(data, OFF_BPP), Ok(8))
}

/// Expand a legacy RLE8 bitmap, or pass other input through unchanged.
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !is_legacy(data) {
        return Ok(Cow::Borrowed(data));
    }

    let width = i32_at(data, OFF_WIDTH)?;
    let height = i32_at(data, OFF_HEIGHT)?;
    if width <= 0 || height == 0 {
        return Err(StoreError::InvalidFormat(format!(
            "Bitmap has invalid size {}x{}",
            width, height
        )));
    }
    let width = width as usize;
    let rows = height.unsigned_abs() as usize;
    let stride = (width + 3) & !3;
    let size = rows
        .checked_mul(stride)
        .filter(|size| *size <= MAX_PIXEL_BYTES)
        .ok_or_else(|| {
            StoreError::InvalidFormat(format!(
                "Bitmap size {}x{} exceeds {} bytes",
                width, rows, MAX_PIXEL_BYTES
            ))
        })?;

    let data_offset = u32_at(data, OFF_DATA_OFFSET)? as usize;
    let header_end = FILE_HEADER_SIZE + INFO_HEADER_SIZE + COLOR_TABLE_SIZE;
    if data_offset < header_end || data_offset > data.len() {
        return Err(StoreError::InvalidFormat("Bitmap data offset out of range".into()));
    }

    let pixels = expand_rle8(&data[data_offset..], width, rows, stride, size)?;

    let mut out = Vec::with_capacity(header_end + pixels.len());
    out.extend_from_slice(&data[..header_end]);
    out.extend_from_slice(&pixels);

    let file_size = out.len() as u32;
    out[OFF_FILE_SIZE..OFF_FILE_SIZE + 4].copy_from_slice(&file_size.to_le_bytes());
    out[OFF_DATA_OFFSET..OFF_DATA_OFFSET + 4].copy_from_slice(&(header_end as u32).to_le_bytes());
    out[OFF_COMPRESSION..OFF_COMPRESSION + 4].copy_from_slice(&BI_RGB.to_le_bytes());
    out[OFF_IMAGE_SIZE..OFF_IMAGE_SIZE + 4].copy_from_slice(&(pixels.len() as u32).to_le_bytes());
    Ok(Cow::Owned(out))
}

/// Run-length expansion into a `rows × stride` buffer of `size` bytes
/// (bottom-up rows, like the stream itself). Pixels a stream never touches
/// stay at index 0.
fn expand_rle8(stream: &[u8], width: usize, rows: usize, stride: usize, size: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; size];
    let (mut x, mut y) = (0usize, 0usize);
    let mut i = 0usize;

    let truncated = || StoreError::InvalidFormat("RLE8 stream truncated".into());

    while i < stream.len() {
        let count = *stream.get(i).ok_or_else(truncated)?;
        let value = *stream.get(i + 1).ok_or_else(truncated)?;
        i += 2;

        if count > 0 {
            for _ in 0..count {
                if x < width && y < rows {
                    out[y * stride + x] = value;
                }
                x += 1;
            }
            continue;
        }

        match value {
            // end of line
            0 => {
                x = 0;
                y += 1;
            }
            // end of bitmap
            1 => break,
            // delta
            2 => {
                let dx = *stream.get(i).ok_or_else(truncated)? as usize;
                let dy = *stream.get(i + 1).ok_or_else(truncated)? as usize;
                i += 2;
                x += dx;
                y += dy;
            }
            // absolute run, padded to an even byte count
            n => {
                let n = n as usize;
                let literal = stream.get(i..i + n).ok_or_else(truncated)?;
                for &v in literal {
                    if x < width && y < rows {
                        out[y * stride + x] = v;
                    }
                    x += 1;
                }
                i += n + (n & 1);
            }
        }

        if y >= rows {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod bitmap_tests {
    use super::*;

    fn legacy_bitmap(width: i32, height: i32, stream: &[u8]) -> Vec<u8> {
        let header_end = FILE_HEADER_SIZE + INFO_HEADER_SIZE + COLOR_TABLE_SIZE;
        let mut data = vec![0u8; header_end];
        data[0..2].copy_from_slice(&MARKER);
        data[OFF_FILE_SIZE..OFF_FILE_SIZE + 4]
            .copy_from_slice(&((header_end + stream.len()) as u32).to_le_bytes());
        data[OFF_DATA_OFFSET..OFF_DATA_OFFSET + 4].copy_from_slice(&(header_end as u32).to_le_bytes());
        data[14..18].copy_from_slice(&(INFO_HEADER_SIZE as u32).to_le_bytes());
        data[OFF_WIDTH..OFF_WIDTH + 4].copy_from_slice(&width.to_le_bytes());
        data[OFF_HEIGHT..OFF_HEIGHT + 4].copy_from_slice(&height.to_le_bytes());
        data[26..28].copy_from_slice(&1u16.to_le_bytes());
        data[OFF_BPP..OFF_BPP + 2].copy_from_slice(&8u16.to_le_bytes());
        data[OFF_COMPRESSION..OFF_COMPRESSION + 4].copy_from_slice(&BI_RLE8.to_le_bytes());
        for c in 0..256usize {
            let off = FILE_HEADER_SIZE + INFO_HEADER_SIZE + c * 4;
            data[off] = c as u8;
            data[off + 1] = c as u8;
            data[off + 2] = c as u8;
        }
        data.extend_from_slice(stream);
        data
    }

    #[test]
    fn test_passthrough_without_marker() {
        let data = b"\x89PNG not a bitmap".to_vec();
        let out = decompress(&data).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &data[..]);
    }

    #[test]
    fn test_passthrough_uncompressed_bitmap() {
        let mut data = legacy_bitmap(4, 1, &[1, 2, 3, 4]);
        data[OFF_COMPRESSION..OFF_COMPRESSION + 4].copy_from_slice(&BI_RGB.to_le_bytes());
        assert!(matches!(decompress(&data).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_expands_runs() {
        // 5x2 image: row0 = 3×7 + 2×9, EOL, row1 = 5×1, EOB
        let stream = [3, 7, 2, 9, 0, 0, 5, 1, 0, 1];
        let data = legacy_bitmap(5, 2, &stream);
        let out = decompress(&data).unwrap();
        let header_end = FILE_HEADER_SIZE + INFO_HEADER_SIZE + COLOR_TABLE_SIZE;
        let pixels = &out[header_end..];
        // stride of 5 pixels is 8
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[0..5], &[7, 7, 7, 9, 9]);
        assert_eq!(&pixels[8..13], &[1, 1, 1, 1, 1]);
        assert_eq!(u32_at(&out, OFF_COMPRESSION).unwrap(), BI_RGB);
        assert_eq!(u32_at(&out, OFF_FILE_SIZE).unwrap() as usize, out.len());
        assert!(!is_legacy(&out));
    }

    #[test]
    fn test_absolute_and_delta_escapes() {
        // absolute run of 3 (padded), delta (+1, +1), run of 2
        let stream = [0, 3, 4, 5, 6, 0, 0, 2, 1, 1, 2, 8, 0, 1];
        let data = legacy_bitmap(4, 2, &stream);
        let out = decompress(&data).unwrap();
        let header_end = FILE_HEADER_SIZE + INFO_HEADER_SIZE + COLOR_TABLE_SIZE;
        let pixels = &out[header_end..];
        assert_eq!(&pixels[0..4], &[4, 5, 6, 0]);
        assert_eq!(&pixels[4..8], &[0, 0, 0, 0]);
        // after delta: x = 3 + 1 = 4 (outside), so only clipped writes
        let with_eol = [0, 3, 4, 5, 6, 0, 0, 0, 0, 2, 1, 0, 2, 8, 0, 1];
        let input = legacy_bitmap(4, 2, &with_eol);
        let out = decompress(&input).unwrap();
        let pixels = &out[header_end..];
        assert_eq!(&pixels[4..8], &[0, 8, 8, 0]);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let data = legacy_bitmap(4, 1, &[0, 5, 1]);
        assert!(decompress(&data).is_err());
    }

    #[test]
    fn test_oversized_dimensions_are_rejected() {
        let huge = 0x4000_0000;
        for (width, height) in [(huge, huge), (huge, -huge), (i32::MAX, 2), (1 << 15, 1 << 14)] {
            let data = legacy_bitmap(width, height, &[0, 1]);
            let err = decompress(&data).unwrap_err();
            assert!(matches!(err, StoreError::InvalidFormat(_)), "{}x{}: {}", width, height, err);
        }
    }
}
