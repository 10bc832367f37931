//! Typed configuration tree.
//!
//! A record's configuration is a tree of objects; each object holds typed
//! leaf options and named child objects. The tree is stored per version
//! branch as JSON and walked with an explicit visitor when indexing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::MetaValue;
use crate::error::{Result, StoreError};

/// Declared option type. Several declared types share one storage type
/// (see [`OptionType::index_kind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Float,
    Progress,
    Time,
    Integer,
    Boolean,
    String,
    TextArea,
    Chooser,
    Script,
    Date,
    Meta,
    Rect,
    Point,
    Table,
    Image,
    Profile,
    Log,
    Section,
    #[serde(other)]
    Unknown,
}

/// Storage kinds mirrored by the option index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Float,
    Integer,
    Boolean,
    String,
    Meta,
}

impl OptionType {
    /// Index table an option of this type is routed to, or `None` when the
    /// type is not indexed.
    pub fn index_kind(&self) -> Option<IndexKind> {
        match self {
            OptionType::Float | OptionType::Progress | OptionType::Time | OptionType::Date => {
                Some(IndexKind::Float)
            }
            OptionType::Integer => Some(IndexKind::Integer),
            OptionType::Boolean => Some(IndexKind::Boolean),
            OptionType::String
            | OptionType::TextArea
            | OptionType::Chooser
            | OptionType::Script => Some(IndexKind::String),
            OptionType::Meta => Some(IndexKind::Meta),
            _ => None,
        }
    }
}

/// Current value of an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Meta(MetaValue),
    Other(serde_json::Value),
}

impl OptionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(v) => Some(*v),
            OptionValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            OptionValue::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            OptionValue::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_meta(&self) -> Option<MetaValue> {
        match self {
            OptionValue::Meta(m) => Some(*m),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Integer(v)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Boolean(v)
    }
}

/// One leaf option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfOption {
    pub handle: String,
    #[serde(rename = "type")]
    pub kind: OptionType,
    #[serde(default)]
    pub name: String,
    pub current: OptionValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ConfOption {
    pub fn new(handle: &str, kind: OptionType, current: impl Into<OptionValue>) -> Self {
        Self {
            handle: handle.to_string(),
            kind,
            name: handle.to_string(),
            current: current.into(),
            unit: None,
        }
    }
}

/// One object of the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfNode {
    #[serde(default)]
    pub options: BTreeMap<String, ConfOption>,
    #[serde(default)]
    pub children: BTreeMap<String, ConfNode>,
}

/// Receives every option of a tree, with the absolute path of the object
/// that owns it (`/`, `/kiln/`, `/hsm/sample0/`).
pub trait ConfVisitor {
    fn visit(&mut self, fullpath: &str, option: &ConfOption);
}

impl<F: FnMut(&str, &ConfOption)> ConfVisitor for F {
    fn visit(&mut self, fullpath: &str, option: &ConfOption) {
        self(fullpath, option)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl ConfNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an option, returning `self` for chaining.
    pub fn with_option(mut self, option: ConfOption) -> Self {
        self.options.insert(option.handle.clone(), option);
        self
    }

    pub fn with_child(mut self, name: &str, child: ConfNode) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    /// Object at `path` (`"/"` or `"/a/b"`).
    pub fn child(&self, path: &str) -> Option<&ConfNode> {
        split_path(path).try_fold(self, |node, seg| node.children.get(seg))
    }

    pub fn child_mut(&mut self, path: &str) -> Option<&mut ConfNode> {
        split_path(path).try_fold(self, |node, seg| node.children.get_mut(seg))
    }

    pub fn option(&self, path: &str, handle: &str) -> Option<&ConfOption> {
        self.child(path)?.options.get(handle)
    }

    pub fn get(&self, path: &str, handle: &str) -> Option<&OptionValue> {
        self.option(path, handle).map(|o| &o.current)
    }

    /// Replace the current value of an existing option.
    pub fn set(&mut self, path: &str, handle: &str, value: impl Into<OptionValue>) -> Result<()> {
        let option = self
            .child_mut(path)
            .and_then(|node| node.options.get_mut(handle))
            .ok_or_else(|| StoreError::OptionNotFound(format!("{}/{}", path.trim_end_matches('/'), handle)))?;
        option.current = value.into();
        Ok(())
    }

    /// Visit every option depth-first, options before children, both in
    /// key order.
    pub fn walk(&self, visitor: &mut dyn ConfVisitor) {
        self.walk_from("/", visitor);
    }

    fn walk_from(&self, fullpath: &str, visitor: &mut dyn ConfVisitor) {
        for option in self.options.values() {
            visitor.visit(fullpath, option);
        }
        for (name, child) in &self.children {
            child.walk_from(&format!("{}{}/", fullpath, name), visitor);
        }
    }

    pub fn option_count(&self) -> usize {
        self.options.len() + self.children.values().map(|c| c.option_count()).sum::<usize>()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod conf_tests {
    use super::*;

    fn sample_tree() -> ConfNode {
        ConfNode::new()
            .with_option(ConfOption::new("eq_sn", OptionType::String, "SN-001"))
            .with_child(
                "kiln",
                ConfNode::new()
                    .with_option(ConfOption::new("T", OptionType::Float, 25.0))
                    .with_option(ConfOption::new("motor", OptionType::Rect, OptionValue::Other(serde_json::json!([0, 0, 1, 1])))),
            )
            .with_child(
                "hsm",
                ConfNode::new().with_child(
                    "sample0",
                    ConfNode::new().with_option(ConfOption::new(
                        "Sintering",
                        OptionType::Meta,
                        OptionValue::Meta(MetaValue::new(1.0, 2.0, 3.0)),
                    )),
                ),
            )
    }

    #[test]
    fn test_walk_reports_object_paths() {
        let tree = sample_tree();
        let mut seen = Vec::new();
        tree.walk(&mut |path: &str, opt: &ConfOption| seen.push(format!("{}{}", path, opt.handle)));
        assert_eq!(seen, vec!["/eq_sn", "/hsm/sample0/Sintering", "/kiln/T", "/kiln/motor"]);
        assert_eq!(tree.option_count(), 4);
    }

    #[test]
    fn test_get_and_set() {
        let mut tree = sample_tree();
        assert_eq!(tree.get("/kiln", "T").and_then(|v| v.as_f64()), Some(25.0));
        tree.set("/kiln/", "T", 1200.0).unwrap();
        assert_eq!(tree.get("kiln", "T"), Some(&OptionValue::Float(1200.0)));
        assert!(matches!(tree.set("/kiln", "nope", 1.0), Err(StoreError::OptionNotFound(_))));
        assert!(tree.child("/missing").is_none());
    }

    #[test]
    fn test_json_roundtrip_keeps_value_kinds() {
        let tree = sample_tree();
        let back = ConfNode::from_json(&tree.to_json().unwrap()).unwrap();
        assert_eq!(back, tree);
        assert!(matches!(back.get("/hsm/sample0", "Sintering"), Some(OptionValue::Meta(_))));
    }

    #[test]
    fn test_unknown_type_deserializes() {
        let json = br#"{"options":{"x":{"handle":"x","type":"Button","current":{"Other":null}}}}"#;
        let tree = ConfNode::from_json(json).unwrap();
        let opt = tree.option("/", "x").unwrap();
        assert_eq!(opt.kind, OptionType::Unknown);
        assert_eq!(opt.kind.index_kind(), None);
    }

    #[test]
    fn test_type_aliases() {
        assert_eq!(OptionType::Chooser.index_kind(), Some(IndexKind::String));
        assert_eq!(OptionType::Time.index_kind(), Some(IndexKind::Float));
        assert_eq!(OptionType::Table.index_kind(), None);
    }
}
