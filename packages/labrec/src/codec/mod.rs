//! Binary codec layer.
//!
//! Each reference class turns `(t, value)` samples into rows appended to a
//! container node and back. Encoding is best-effort: malformed input
//! returns `None` and the caller drops that sample from its batch.
//!
//! | class              | node    | row                                   |
//! |--------------------|---------|---------------------------------------|
//! | Array              | table   | t: f64, v: f64                        |
//! | Boolean            | table   | t: f64, v: u8                         |
//! | Rect               | table   | t: f64, x/y/w/h: i32                  |
//! | Point              | table   | t: f64, x/y: i32                      |
//! | Meta               | table   | t: f64, value/time/temp: f64 (NaN=∅)  |
//! | Log                | table   | t: f64, priority: u8, msg: [u8; 500]  |
//! | Binary, Object     | vlarray | t: f64, blob                          |
//! | Image              | vlarray | t: f64, w: u32, h: u32, zstd(pixels)  |
//! | Profile            | vlarray | 4×u16 time, (x, y): u16 pairs         |
//! | CumulativeProfile  | vlarray | 4×u16 time, origin, base-9 steps      |

pub mod blob;
pub mod fixed;
pub mod profile;
pub mod bitmap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::container::{ColumnKind, ColumnSpec};
use crate::error::{Result, StoreError};

pub use blob::ImageFrame;
pub use fixed::{LogEntry, LOG_MESSAGE_LEN};

/// Batches larger than this are encoded on the rayon pool.
const PARALLEL_ENCODE_THRESHOLD: usize = 256;

/// Attribute naming the codec of a reference node.
pub const REFERENCE_CLASS_ATTR: &str = "_reference_class";

// ── Values ─────────────────────────────────────────────────────────

/// Composite measurement: a value plus the time and temperature at which
/// it was observed. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaValue {
    pub value: Option<f64>,
    pub time: Option<f64>,
    pub temp: Option<f64>,
}

impl MetaValue {
    pub fn new(value: f64, time: f64, temp: f64) -> Self {
        Self {
            value: Some(value),
            time: Some(time),
            temp: Some(temp),
        }
    }
}

/// Logical value carried by one reference row.
#[derive(Debug, Clone, PartialEq)]
pub enum RefValue {
    Number(f64),
    Flag(bool),
    Rect([i32; 4]),
    Point([i32; 2]),
    Meta(MetaValue),
    Log(LogEntry),
    Binary(Vec<u8>),
    Object(serde_json::Value),
    Image(ImageFrame),
    Profile(Vec<[u16; 2]>),
}

impl RefValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RefValue::Number(v) => Some(*v),
            RefValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// A decoded row.
pub type Sample = (f64, RefValue);

// ── Reference classes ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReferenceClass {
    Array,
    Boolean,
    Rect,
    Point,
    Meta,
    Log,
    Binary,
    Image,
    Profile,
    CumulativeProfile,
    Object,
}

/// How rows of a class are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum RowLayout {
    Table(Vec<ColumnSpec>),
    Variable,
}

impl ReferenceClass {
    pub const ALL: [ReferenceClass; 11] = [
        ReferenceClass::Array,
        ReferenceClass::Boolean,
        ReferenceClass::Rect,
        ReferenceClass::Point,
        ReferenceClass::Meta,
        ReferenceClass::Log,
        ReferenceClass::Binary,
        ReferenceClass::Image,
        ReferenceClass::Profile,
        ReferenceClass::CumulativeProfile,
        ReferenceClass::Object,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReferenceClass::Array => "Array",
            ReferenceClass::Boolean => "Boolean",
            ReferenceClass::Rect => "Rect",
            ReferenceClass::Point => "Point",
            ReferenceClass::Meta => "Meta",
            ReferenceClass::Log => "Log",
            ReferenceClass::Binary => "Binary",
            ReferenceClass::Image => "Image",
            ReferenceClass::Profile => "Profile",
            ReferenceClass::CumulativeProfile => "CumulativeProfile",
            ReferenceClass::Object => "Object",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| StoreError::UnknownReferenceClass(name.to_string()))
    }

    pub fn layout(&self) -> RowLayout {
        let t = ColumnSpec::new("t", ColumnKind::F64);
        match self {
            ReferenceClass::Array => {
                RowLayout::Table(vec![t, ColumnSpec::new("v", ColumnKind::F64)])
            }
            ReferenceClass::Boolean => {
                RowLayout::Table(vec![t, ColumnSpec::new("v", ColumnKind::U8)])
            }
            ReferenceClass::Rect => RowLayout::Table(vec![
                t,
                ColumnSpec::new("x", ColumnKind::I32),
                ColumnSpec::new("y", ColumnKind::I32),
                ColumnSpec::new("w", ColumnKind::I32),
                ColumnSpec::new("h", ColumnKind::I32),
            ]),
            ReferenceClass::Point => RowLayout::Table(vec![
                t,
                ColumnSpec::new("x", ColumnKind::I32),
                ColumnSpec::new("y", ColumnKind::I32),
            ]),
            ReferenceClass::Meta => RowLayout::Table(vec![
                t,
                ColumnSpec::new("value", ColumnKind::F64),
                ColumnSpec::new("time", ColumnKind::F64),
                ColumnSpec::new("temp", ColumnKind::F64),
            ]),
            ReferenceClass::Log => RowLayout::Table(vec![
                t,
                ColumnSpec::new("priority", ColumnKind::U8),
                ColumnSpec::new("msg", ColumnKind::Bytes(LOG_MESSAGE_LEN)),
            ]),
            ReferenceClass::Binary
            | ReferenceClass::Image
            | ReferenceClass::Profile
            | ReferenceClass::CumulativeProfile
            | ReferenceClass::Object => RowLayout::Variable,
        }
    }

    /// Whether a summary mirror is kept for this class.
    pub fn has_summary(&self) -> bool {
        matches!(self, ReferenceClass::Array)
    }

    /// Encode one sample. `None` when the value does not fit the class.
    pub fn encode(&self, t: f64, value: &RefValue) -> Option<Vec<u8>> {
        if !t.is_finite() {
            return None;
        }
        match (self, value) {
            (ReferenceClass::Array, RefValue::Number(v)) => Some(fixed::encode_array(t, *v)),
            (ReferenceClass::Boolean, RefValue::Flag(b)) => Some(fixed::encode_boolean(t, *b)),
            (ReferenceClass::Rect, RefValue::Rect(r)) => Some(fixed::encode_rect(t, r)),
            (ReferenceClass::Point, RefValue::Point(p)) => Some(fixed::encode_point(t, p)),
            (ReferenceClass::Meta, RefValue::Meta(m)) => Some(fixed::encode_meta(t, m)),
            (ReferenceClass::Log, RefValue::Log(entry)) => fixed::encode_log(t, entry),
            (ReferenceClass::Binary, RefValue::Binary(b)) => Some(blob::encode_binary(t, b)),
            (ReferenceClass::Object, RefValue::Object(v)) => blob::encode_object(t, v),
            (ReferenceClass::Image, RefValue::Image(img)) => blob::encode_image(t, img),
            (ReferenceClass::Profile, RefValue::Profile(pts)) => profile::encode_profile(t, pts),
            (ReferenceClass::CumulativeProfile, RefValue::Profile(pts)) => {
                profile::encode_cumulative(t, pts)
            }
            _ => None,
        }
    }

    /// Decode one row. `None` when the bytes are not a valid row.
    pub fn decode(&self, bytes: &[u8]) -> Option<Sample> {
        match self {
            ReferenceClass::Array => fixed::decode_array(bytes).map(|(t, v)| (t, RefValue::Number(v))),
            ReferenceClass::Boolean => fixed::decode_boolean(bytes).map(|(t, v)| (t, RefValue::Flag(v))),
            ReferenceClass::Rect => fixed::decode_rect(bytes).map(|(t, v)| (t, RefValue::Rect(v))),
            ReferenceClass::Point => fixed::decode_point(bytes).map(|(t, v)| (t, RefValue::Point(v))),
            ReferenceClass::Meta => fixed::decode_meta(bytes).map(|(t, v)| (t, RefValue::Meta(v))),
            ReferenceClass::Log => fixed::decode_log(bytes).map(|(t, v)| (t, RefValue::Log(v))),
            ReferenceClass::Binary => blob::decode_binary(bytes).map(|(t, v)| (t, RefValue::Binary(v))),
            ReferenceClass::Object => blob::decode_object(bytes).map(|(t, v)| (t, RefValue::Object(v))),
            ReferenceClass::Image => blob::decode_image(bytes).map(|(t, v)| (t, RefValue::Image(v))),
            ReferenceClass::Profile => {
                profile::decode_profile(bytes).map(|(t, v)| (t, RefValue::Profile(v)))
            }
            ReferenceClass::CumulativeProfile => {
                profile::decode_cumulative(bytes).map(|(t, v)| (t, RefValue::Profile(v)))
            }
        }
    }

    /// Encode a batch, dropping samples that fail to encode.
    ///
    /// Row order follows sample order.
    pub fn encode_batch(&self, samples: &[Sample]) -> Vec<Vec<u8>> {
        if samples.len() >= PARALLEL_ENCODE_THRESHOLD {
            samples
                .par_iter()
                .filter_map(|(t, v)| self.encode(*t, v))
                .collect()
        } else {
            samples.iter().filter_map(|(t, v)| self.encode(*t, v)).collect()
        }
    }

    /// Timestamp of an encoded row, without decoding the payload.
    pub fn row_time(&self, bytes: &[u8]) -> Option<f64> {
        match self {
            ReferenceClass::Profile | ReferenceClass::CumulativeProfile => {
                profile::read_time_words(bytes)
            }
            _ => fixed::read_f64(bytes, 0),
        }
    }
}

impl std::fmt::Display for ReferenceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod codec_tests {
    use super::*;

    fn roundtrip(class: ReferenceClass, t: f64, value: RefValue) {
        let bytes = class
            .encode(t, &value)
            .unwrap_or_else(|| panic!("{} failed to encode {:?}", class, value));
        if let RowLayout::Table(cols) = class.layout() {
            assert_eq!(bytes.len(), crate::container::types::row_size(&cols), "{} row width", class);
        }
        let (t2, v2) = class.decode(&bytes).expect("decode");
        assert_eq!(t2, t);
        assert_eq!(v2, value, "{} value mismatch", class);
        assert_eq!(class.row_time(&bytes), Some(t));
    }

    #[test]
    fn test_every_class_roundtrips() {
        roundtrip(ReferenceClass::Array, 1.5, RefValue::Number(-273.15));
        roundtrip(ReferenceClass::Boolean, 2.0, RefValue::Flag(true));
        roundtrip(ReferenceClass::Rect, 3.0, RefValue::Rect([1, -2, 640, 480]));
        roundtrip(ReferenceClass::Point, 4.0, RefValue::Point([10, 20]));
        roundtrip(ReferenceClass::Meta, 5.0, RefValue::Meta(MetaValue::new(1.0, 2.0, 3.0)));
        roundtrip(ReferenceClass::Meta, 5.5, RefValue::Meta(MetaValue::default()));
        roundtrip(
            ReferenceClass::Log,
            6.0,
            RefValue::Log(LogEntry { priority: 30, message: "furnace ready".into() }),
        );
        roundtrip(ReferenceClass::Binary, 7.0, RefValue::Binary(vec![]));
        roundtrip(ReferenceClass::Binary, 7.5, RefValue::Binary(vec![0, 1, 2, 255]));
        roundtrip(
            ReferenceClass::Object,
            8.0,
            RefValue::Object(serde_json::json!({"a": [1, 2], "b": null})),
        );
        roundtrip(
            ReferenceClass::Image,
            9.0,
            RefValue::Image(ImageFrame { width: 2, height: 2, pixels: vec![0, 64, 128, 255] }),
        );
        roundtrip(ReferenceClass::Profile, 10.0, RefValue::Profile(vec![]));
        roundtrip(ReferenceClass::Profile, 10.5, RefValue::Profile(vec![[1, 2], [3, 4]]));
        roundtrip(ReferenceClass::CumulativeProfile, 11.0, RefValue::Profile(vec![]));
        roundtrip(
            ReferenceClass::CumulativeProfile,
            11.5,
            RefValue::Profile(vec![[5, 5], [6, 5], [6, 4]]),
        );
    }

    #[test]
    fn test_mismatched_value_is_dropped() {
        assert!(ReferenceClass::Array.encode(0.0, &RefValue::Flag(true)).is_none());
        assert!(ReferenceClass::Array.encode(f64::NAN, &RefValue::Number(1.0)).is_none());
    }

    #[test]
    fn test_encode_batch_skips_malformed_and_keeps_order() {
        let samples: Vec<Sample> = (0..600)
            .map(|i| {
                let t = i as f64;
                if i % 100 == 7 {
                    (t, RefValue::Flag(false))
                } else {
                    (t, RefValue::Number(t * 2.0))
                }
            })
            .collect();
        let rows = ReferenceClass::Array.encode_batch(&samples);
        assert_eq!(rows.len(), 594);
        let times: Vec<f64> = rows.iter().map(|r| ReferenceClass::Array.row_time(r).unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_class_names_roundtrip() {
        for class in ReferenceClass::ALL {
            assert_eq!(ReferenceClass::from_name(class.name()).unwrap(), class);
        }
        assert!(matches!(
            ReferenceClass::from_name("Table"),
            Err(StoreError::UnknownReferenceClass(_))
        ));
    }
}
