//! Container node model and on-disk header.
//!
//! The container is a flat map of absolute node paths to `Node`s. Groups
//! only carry attributes; tables hold fixed-width rows described by a
//! column schema; vlarrays hold rows of arbitrary length; links point at
//! another node path (hard-link semantics: reads and appends go through
//! to the target).

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ── Constants ──────────────────────────────────────────────────────

/// Magic bytes for container files.
pub const MAGIC: [u8; 4] = *b"LRC1";

/// Format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
///
/// ```text
/// Offset  Size  Field
/// 0       4     magic: b"LRC1"
/// 4       2     version: u16
/// 6       2     reserved: 0x0000
/// 8       8     payload_len: u64
/// ```
pub const HEADER_SIZE: usize = 16;

/// Upper bound on link chains followed during resolution.
pub const MAX_LINK_DEPTH: usize = 8;

// ── Attribute values ───────────────────────────────────────────────

/// Value stored in a node attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            AttrValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        AttrValue::Bytes(v)
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

// ── Table schema ───────────────────────────────────────────────────

/// Scalar type of one table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    F64,
    I32,
    U16,
    U8,
    /// Fixed-length byte field.
    Bytes(usize),
}

impl ColumnKind {
    pub fn width(&self) -> usize {
        match self {
            ColumnKind::F64 => 8,
            ColumnKind::I32 => 4,
            ColumnKind::U16 => 2,
            ColumnKind::U8 => 1,
            ColumnKind::Bytes(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self { name: name.to_string(), kind }
    }
}

/// Total row width of a column schema.
pub fn row_size(columns: &[ColumnSpec]) -> usize {
    columns.iter().map(|c| c.kind.width()).sum()
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Group,
    Table { columns: Vec<ColumnSpec>, row_size: usize },
    VlArray,
    Link { target: String },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Group => "group",
            NodeKind::Table { .. } => "table",
            NodeKind::VlArray => "vlarray",
            NodeKind::Link { .. } => "link",
        }
    }

    pub fn holds_rows(&self) -> bool {
        matches!(self, NodeKind::Table { .. } | NodeKind::VlArray)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub attrs: Attributes,
    pub rows: Vec<Vec<u8>>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: Attributes::new(),
            rows: Vec::new(),
        }
    }

    pub fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    /// Number of rows, 0 for groups and links.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Serialized body of a container file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerImage {
    pub nodes: BTreeMap<String, Node>,
}

// ── Header ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ContainerHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub payload_len: u64,
}

impl ContainerHeader {
    pub fn new(payload_len: u64) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            payload_len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::InvalidFormat(
                "File too small for container header".into(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "Not a record container: expected LRC1, got {:?}",
                magic
            )));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported container version: {}",
                version
            )));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            magic,
            version,
            payload_len: u64::from_le_bytes(len),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?; // reserved
        writer.write_all(&self.payload_len.to_le_bytes())?;
        Ok(())
    }
}

// ── Paths ──────────────────────────────────────────────────────────

/// Normalize a node path: leading slash, no empty segments, no trailing
/// slash (except for the root).
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len() + 1);
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}

/// Parent of a normalized path. The root has no parent.
pub fn parent(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(i) => Some(path[..i].to_string()),
        None => None,
    }
}

/// Join a folder and a child name into a normalized path.
pub fn join(folder: &str, name: &str) -> String {
    normalize(&format!("{}/{}", folder, name))
}

/// Last segment of a normalized path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}
