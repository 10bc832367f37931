//! Fixed-width row codecs: Array, Boolean, Rect, Point, Meta, Log.
//!
//! Plain little-endian struct packing, no compression. Every row starts
//! with the sample time as `f64`.

use serde::{Deserialize, Serialize};

use super::MetaValue;

/// Width of the Log message field.
pub const LOG_MESSAGE_LEN: usize = 500;

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub priority: u8,
    pub message: String,
}

pub(crate) fn read_f64(bytes: &[u8], offset: usize) -> Option<f64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(raw))
}

fn read_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(i32::from_le_bytes(raw))
}

fn exact(bytes: &[u8], len: usize) -> Option<&[u8]> {
    (bytes.len() == len).then_some(bytes)
}

fn opt_to_f64(v: Option<f64>) -> f64 {
    v.unwrap_or(f64::NAN)
}

fn f64_to_opt(v: f64) -> Option<f64> {
    (!v.is_nan()).then_some(v)
}

// ── Array ──────────────────────────────────────────────────────────

pub fn encode_array(t: f64, v: f64) -> Vec<u8> {
    let mut row = Vec::with_capacity(16);
    row.extend_from_slice(&t.to_le_bytes());
    row.extend_from_slice(&v.to_le_bytes());
    row
}

pub fn decode_array(bytes: &[u8]) -> Option<(f64, f64)> {
    let bytes = exact(bytes, 16)?;
    Some((read_f64(bytes, 0)?, read_f64(bytes, 8)?))
}

// ── Boolean ────────────────────────────────────────────────────────

pub fn encode_boolean(t: f64, v: bool) -> Vec<u8> {
    let mut row = Vec::with_capacity(9);
    row.extend_from_slice(&t.to_le_bytes());
    row.push(v as u8);
    row
}

pub fn decode_boolean(bytes: &[u8]) -> Option<(f64, bool)> {
    let bytes = exact(bytes, 9)?;
    Some((read_f64(bytes, 0)?, bytes[8] != 0))
}

// ── Rect / Point ───────────────────────────────────────────────────

pub fn encode_rect(t: f64, r: &[i32; 4]) -> Vec<u8> {
    let mut row = Vec::with_capacity(24);
    row.extend_from_slice(&t.to_le_bytes());
    for v in r {
        row.extend_from_slice(&v.to_le_bytes());
    }
    row
}

pub fn decode_rect(bytes: &[u8]) -> Option<(f64, [i32; 4])> {
    let bytes = exact(bytes, 24)?;
    Some((
        read_f64(bytes, 0)?,
        [
            read_i32(bytes, 8)?,
            read_i32(bytes, 12)?,
            read_i32(bytes, 16)?,
            read_i32(bytes, 20)?,
        ],
    ))
}

pub fn encode_point(t: f64, p: &[i32; 2]) -> Vec<u8> {
    let mut row = Vec::with_capacity(16);
    row.extend_from_slice(&t.to_le_bytes());
    row.extend_from_slice(&p[0].to_le_bytes());
    row.extend_from_slice(&p[1].to_le_bytes());
    row
}

pub fn decode_point(bytes: &[u8]) -> Option<(f64, [i32; 2])> {
    let bytes = exact(bytes, 16)?;
    Some((read_f64(bytes, 0)?, [read_i32(bytes, 8)?, read_i32(bytes, 12)?]))
}

// ── Meta ───────────────────────────────────────────────────────────

pub fn encode_meta(t: f64, m: &MetaValue) -> Vec<u8> {
    let mut row = Vec::with_capacity(32);
    row.extend_from_slice(&t.to_le_bytes());
    row.extend_from_slice(&opt_to_f64(m.value).to_le_bytes());
    row.extend_from_slice(&opt_to_f64(m.time).to_le_bytes());
    row.extend_from_slice(&opt_to_f64(m.temp).to_le_bytes());
    row
}

pub fn decode_meta(bytes: &[u8]) -> Option<(f64, MetaValue)> {
    let bytes = exact(bytes, 32)?;
    Some((
        read_f64(bytes, 0)?,
        MetaValue {
            value: f64_to_opt(read_f64(bytes, 8)?),
            time: f64_to_opt(read_f64(bytes, 16)?),
            temp: f64_to_opt(read_f64(bytes, 24)?),
        },
    ))
}

// ── Log ────────────────────────────────────────────────────────────

/// Messages longer than the fixed field, or containing NUL (the padding
/// byte), cannot be stored.
pub fn encode_log(t: f64, entry: &LogEntry) -> Option<Vec<u8>> {
    let msg = entry.message.as_bytes();
    if msg.len() > LOG_MESSAGE_LEN || msg.contains(&0) {
        return None;
    }
    let mut row = Vec::with_capacity(9 + LOG_MESSAGE_LEN);
    row.extend_from_slice(&t.to_le_bytes());
    row.push(entry.priority);
    row.extend_from_slice(msg);
    row.resize(9 + LOG_MESSAGE_LEN, 0);
    Some(row)
}

pub fn decode_log(bytes: &[u8]) -> Option<(f64, LogEntry)> {
    let bytes = exact(bytes, 9 + LOG_MESSAGE_LEN)?;
    let field = &bytes[9..];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let message = std::str::from_utf8(&field[..end]).ok()?.to_string();
    Some((read_f64(bytes, 0)?, LogEntry { priority: bytes[8], message }))
}
