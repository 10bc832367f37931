//! Variable-length codecs: Binary, Object, Image.
//!
//! Every row is `[t: f64 LE][payload]`.

use std::io::Cursor;

use super::fixed::read_f64;

/// zstd level for image pixel streams.
const IMAGE_COMPRESSION_LEVEL: i32 = 3;

/// Image payload header after the time: width(4) + height(4).
const IMAGE_DIMS_SIZE: usize = 8;

/// A raster frame. `pixels` holds `width * height * channels` bytes,
/// row-major; the channel count is implied by the length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageFrame {
    /// Bytes per pixel, `None` when the buffer does not match the size.
    pub fn channels(&self) -> Option<usize> {
        let area = self.width as usize * self.height as usize;
        if area == 0 {
            return self.pixels.is_empty().then_some(0);
        }
        (self.pixels.len() % area == 0 && !self.pixels.is_empty()).then(|| self.pixels.len() / area)
    }
}

fn split_time(bytes: &[u8]) -> Option<(f64, &[u8])> {
    Some((read_f64(bytes, 0)?, bytes.get(8..)?))
}

pub fn encode_binary(t: f64, blob: &[u8]) -> Vec<u8> {
    let mut row = Vec::with_capacity(8 + blob.len());
    row.extend_from_slice(&t.to_le_bytes());
    row.extend_from_slice(blob);
    row
}

pub fn decode_binary(bytes: &[u8]) -> Option<(f64, Vec<u8>)> {
    let (t, blob) = split_time(bytes)?;
    Some((t, blob.to_vec()))
}

pub fn encode_object(t: f64, value: &serde_json::Value) -> Option<Vec<u8>> {
    let blob = serde_json::to_vec(value).ok()?;
    Some(encode_binary(t, &blob))
}

pub fn decode_object(bytes: &[u8]) -> Option<(f64, serde_json::Value)> {
    let (t, blob) = split_time(bytes)?;
    Some((t, serde_json::from_slice(blob).ok()?))
}

pub fn encode_image(t: f64, frame: &ImageFrame) -> Option<Vec<u8>> {
    frame.channels()?;
    let compressed = zstd::encode_all(Cursor::new(&frame.pixels), IMAGE_COMPRESSION_LEVEL).ok()?;
    let mut row = Vec::with_capacity(8 + IMAGE_DIMS_SIZE + compressed.len());
    row.extend_from_slice(&t.to_le_bytes());
    row.extend_from_slice(&frame.width.to_le_bytes());
    row.extend_from_slice(&frame.height.to_le_bytes());
    row.extend_from_slice(&compressed);
    Some(row)
}

pub fn decode_image(bytes: &[u8]) -> Option<(f64, ImageFrame)> {
    let (t, payload) = split_time(bytes)?;
    if payload.len() < IMAGE_DIMS_SIZE {
        return None;
    }
    let width = u32::from_le_bytes(payload[0..4].try_into().ok()?);
    let height = u32::from_le_bytes(payload[4..8].try_into().ok()?);
    let pixels = zstd::decode_all(Cursor::new(&payload[IMAGE_DIMS_SIZE..])).ok()?;
    let frame = ImageFrame { width, height, pixels };
    frame.channels()?;
    Some((t, frame))
}

#[cfg(test)]
mod blob_tests {
    use super::*;

    #[test]
    fn test_empty_blob_roundtrip() {
        let row = encode_binary(12.5, &[]);
        assert_eq!(row.len(), 8);
        assert_eq!(decode_binary(&row), Some((12.5, vec![])));
    }

    #[test]
    fn test_short_row_is_rejected() {
        assert!(decode_binary(&[1, 2, 3]).is_none());
        assert!(decode_image(&encode_binary(0.0, &[1, 2])).is_none());
    }

    #[test]
    fn test_image_compresses_flat_frames() {
        let frame = ImageFrame { width: 64, height: 64, pixels: vec![7u8; 64 * 64] };
        let row = encode_image(1.0, &frame).unwrap();
        assert!(row.len() < frame.pixels.len() / 4, "flat frame should compress well");
        assert_eq!(decode_image(&row), Some((1.0, frame)));
    }

    #[test]
    fn test_image_with_channels() {
        let frame = ImageFrame { width: 2, height: 1, pixels: vec![1, 2, 3, 4, 5, 6] };
        assert_eq!(frame.channels(), Some(3));
        let row = encode_image(2.0, &frame).unwrap();
        assert_eq!(decode_image(&row).unwrap().1.channels(), Some(3));
    }

    #[test]
    fn test_image_size_mismatch_is_malformed() {
        let frame = ImageFrame { width: 3, height: 3, pixels: vec![0u8; 10] };
        assert!(encode_image(0.0, &frame).is_none());
        let empty_area = ImageFrame { width: 0, height: 5, pixels: vec![1] };
        assert!(encode_image(0.0, &empty_area).is_none());
        let empty = ImageFrame { width: 0, height: 0, pixels: vec![] };
        assert_eq!(decode_image(&encode_image(0.0, &empty).unwrap()).unwrap().1, empty);
    }

    #[test]
    fn test_object_rejects_garbage() {
        let row = encode_binary(0.0, b"{not json");
        assert!(decode_object(&row).is_none());
    }
}
