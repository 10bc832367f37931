//! Single-file hierarchical container.
//!
//! Provides the logical contract the record store is written against:
//! groups, named attributes on any node, appendable fixed-width tables,
//! appendable variable-length arrays and hard links. The whole tree is
//! held in memory while open and written back atomically
//! (`<file>.tmp` + rename) on `flush()`/`close()`. Read-only opens decode
//! straight from a memory mapping.

pub mod types;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Result, StoreError};

pub use types::{
    basename, join, normalize, parent, AttrValue, Attributes, ColumnKind, ColumnSpec,
    ContainerHeader, ContainerImage, Node, NodeKind, HEADER_SIZE,
};

/// Access mode of an open container or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access - write operations will be rejected
    ReadOnly,
    /// Read-write access
    ReadWrite,
}

impl AccessMode {
    /// Parse access mode from string
    pub fn from_str(s: &str) -> Self {
        match s {
            "r" | "ro" | "readonly" | "read-only" => AccessMode::ReadOnly,
            _ => AccessMode::ReadWrite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "ro",
            AccessMode::ReadWrite => "rw",
        }
    }

    /// Check if write operations are allowed
    pub fn is_write(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

/// An open container file.
#[derive(Debug)]
pub struct ContainerFile {
    path: PathBuf,
    mode: AccessMode,
    nodes: BTreeMap<String, Node>,
    open: bool,
    dirty: bool,
}

impl ContainerFile {
    /// Create a new, empty container at `path`, replacing any existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::group());
        let mut container = Self {
            path: path.to_path_buf(),
            mode: AccessMode::ReadWrite,
            nodes,
            open: true,
            dirty: true,
        };
        container.flush()?;
        Ok(container)
    }

    /// Open an existing container.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let image = match mode {
            AccessMode::ReadOnly => {
                let file = File::open(path)?;
                let mmap = unsafe { Mmap::map(&file) }?;
                Self::decode(&mmap)?
            }
            AccessMode::ReadWrite => Self::decode(&fs::read(path)?)?,
        };
        let mut nodes = image.nodes;
        nodes.entry("/".to_string()).or_insert_with(Node::group);
        Ok(Self {
            path: path.to_path_buf(),
            mode,
            nodes,
            open: true,
            dirty: false,
        })
    }

    fn decode(bytes: &[u8]) -> Result<ContainerImage> {
        let header = ContainerHeader::from_bytes(bytes)?;
        let end = usize::try_from(header.payload_len)
            .ok()
            .and_then(|len| HEADER_SIZE.checked_add(len))
            .ok_or_else(|| {
                StoreError::InvalidFormat(format!(
                    "Container payload length out of range: {}",
                    header.payload_len
                ))
            })?;
        if bytes.len() < end {
            return Err(StoreError::InvalidFormat(format!(
                "Container payload truncated: expected {} bytes, got {}",
                header.payload_len,
                bytes.len() - HEADER_SIZE
            )));
        }
        Ok(bincode::deserialize(&bytes[HEADER_SIZE..end])?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Write pending changes to disk. No-op for read-only or clean files.
    pub fn flush(&mut self) -> Result<()> {
        if !self.open || !self.mode.is_write() || !self.dirty {
            return Ok(());
        }
        let image = ContainerImage { nodes: self.nodes.clone() };
        let payload = bincode::serialize(&image)?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            ContainerHeader::new(payload.len() as u64).write_to(&mut file)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and mark closed. Every later call fails with `StoreClosed`.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.flush()?;
        self.open = false;
        self.nodes.clear();
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if !self.open {
            return Err(StoreError::StoreClosed(self.path.clone()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_write() {
            return Err(StoreError::ReadOnlyMode);
        }
        Ok(())
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Resolve a path through hard links to the node that holds the data.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let mut current = normalize(path);
        for _ in 0..types::MAX_LINK_DEPTH {
            match &self.nodes.get(&current)?.kind {
                NodeKind::Link { target } => current = target.clone(),
                _ => return Some(current),
            }
        }
        None
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        let resolved = self.resolve(path)?;
        self.nodes.get(&resolved)
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let resolved = self
            .resolve(path)
            .ok_or_else(|| StoreError::NodeNotFound(normalize(path)))?;
        self.nodes
            .get_mut(&resolved)
            .ok_or(StoreError::NodeNotFound(resolved))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.open && self.node(path).is_some()
    }

    /// Whether the node at `path` is itself a link (not its target).
    pub fn is_link(&self, path: &str) -> bool {
        matches!(
            self.nodes.get(&normalize(path)).map(|n| &n.kind),
            Some(NodeKind::Link { .. })
        )
    }

    /// Direct children of a group, as full paths.
    pub fn children(&self, path: &str) -> Vec<String> {
        let folder = normalize(path);
        let prefix = if folder == "/" { "/".to_string() } else { format!("{}/", folder) };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// All nodes at or below `path`, in path order.
    pub fn walk<'a>(&'a self, path: &str) -> impl Iterator<Item = (&'a String, &'a Node)> + 'a {
        let root = normalize(path);
        let prefix = if root == "/" { "/".to_string() } else { format!("{}/", root) };
        self.nodes
            .iter()
            .filter(move |(k, _)| **k == root || k.starts_with(&prefix))
    }

    // ── Structure ──────────────────────────────────────────────────

    fn insert_node(&mut self, path: &str, node: Node) -> Result<()> {
        self.check_write()?;
        let path = normalize(path);
        if self.nodes.contains_key(&path) {
            return Err(StoreError::NodeExists(path));
        }
        if let Some(parent) = parent(&path) {
            self.create_group(&parent)?;
        }
        self.nodes.insert(path, node);
        self.dirty = true;
        Ok(())
    }

    /// Create a group and any missing parents. Existing groups are kept.
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.check_write()?;
        let path = normalize(path);
        match self.nodes.get(&path).map(|n| &n.kind) {
            Some(NodeKind::Group) => return Ok(()),
            Some(_) => return Err(StoreError::NodeExists(path)),
            None => {}
        }
        if let Some(parent) = parent(&path) {
            self.create_group(&parent)?;
        }
        self.nodes.insert(path, Node::group());
        self.dirty = true;
        Ok(())
    }

    pub fn create_table(&mut self, path: &str, columns: Vec<ColumnSpec>) -> Result<()> {
        if columns.is_empty() {
            return Err(StoreError::InvalidFormat(format!("Table {} has no columns", path)));
        }
        let row_size = types::row_size(&columns);
        self.insert_node(path, Node::new(NodeKind::Table { columns, row_size }))
    }

    pub fn create_vlarray(&mut self, path: &str) -> Result<()> {
        self.insert_node(path, Node::new(NodeKind::VlArray))
    }

    /// Create a hard link at `dst` pointing at the existing node `src`.
    pub fn link(&mut self, src: &str, dst: &str) -> Result<()> {
        let target = self
            .resolve(src)
            .ok_or_else(|| StoreError::NodeNotFound(normalize(src)))?;
        self.insert_node(dst, Node::new(NodeKind::Link { target }))
    }

    /// Remove a node and everything below it. Links into the removed
    /// subtree become dangling.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.check_write()?;
        let path = normalize(path);
        if path == "/" {
            return Err(StoreError::InvalidFormat("Cannot remove the root group".into()));
        }
        if !self.nodes.contains_key(&path) {
            return Err(StoreError::NodeNotFound(path));
        }
        let prefix = format!("{}/", path);
        self.nodes.retain(|k, _| *k != path && !k.starts_with(&prefix));
        self.dirty = true;
        Ok(())
    }

    // ── Rows ───────────────────────────────────────────────────────

    /// Append rows, returning the new row count.
    pub fn append(&mut self, path: &str, rows: Vec<Vec<u8>>) -> Result<usize> {
        self.check_write()?;
        let node = self.node_mut(path)?;
        match &node.kind {
            NodeKind::Table { row_size, .. } => {
                if let Some(bad) = rows.iter().find(|r| r.len() != *row_size) {
                    return Err(StoreError::InvalidFormat(format!(
                        "Row of {} bytes does not fit table {} ({} bytes per row)",
                        bad.len(),
                        path,
                        row_size
                    )));
                }
            }
            NodeKind::VlArray => {}
            other => {
                return Err(StoreError::InvalidFormat(format!(
                    "Cannot append rows to a {} node: {}",
                    other.name(),
                    path
                )))
            }
        }
        node.rows.extend(rows);
        let len = node.rows.len();
        self.dirty = true;
        Ok(len)
    }

    /// Drop rows beyond `len`.
    pub fn truncate(&mut self, path: &str, len: usize) -> Result<()> {
        self.check_write()?;
        let node = self.node_mut(path)?;
        node.rows.truncate(len);
        self.dirty = true;
        Ok(())
    }

    pub fn rows(&self, path: &str) -> Result<&[Vec<u8>]> {
        self.check_open()?;
        let node = self
            .node(path)
            .ok_or_else(|| StoreError::NodeNotFound(normalize(path)))?;
        Ok(&node.rows)
    }

    pub fn row_count(&self, path: &str) -> Option<usize> {
        self.node(path).map(|n| n.rows.len())
    }

    // ── Attributes ─────────────────────────────────────────────────

    pub fn attrs(&self, path: &str) -> Result<&Attributes> {
        self.check_open()?;
        self.node(path)
            .map(|n| &n.attrs)
            .ok_or_else(|| StoreError::NodeNotFound(normalize(path)))
    }

    pub fn attr(&self, path: &str, key: &str) -> Option<&AttrValue> {
        self.node(path)?.attrs.get(key)
    }

    pub fn set_attr(&mut self, path: &str, key: &str, value: AttrValue) -> Result<()> {
        self.check_write()?;
        let node = self.node_mut(path)?;
        node.attrs.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_attr(&mut self, path: &str, key: &str) -> Result<Option<AttrValue>> {
        self.check_write()?;
        let node = self.node_mut(path)?;
        let old = node.attrs.remove(key);
        if old.is_some() {
            self.dirty = true;
        }
        Ok(old)
    }
}

impl Drop for ContainerFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), "container flush on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod container_tests {
    use super::*;
    use tempfile::tempdir;

    fn f64_row(t: f64, v: f64) -> Vec<u8> {
        let mut row = t.to_le_bytes().to_vec();
        row.extend_from_slice(&v.to_le_bytes());
        row
    }

    fn two_col() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("t", ColumnKind::F64),
            ColumnSpec::new("v", ColumnKind::F64),
        ]
    }

    #[test]
    fn test_create_and_reopen_persists_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.rec");
        {
            let mut c = ContainerFile::create(&path).unwrap();
            c.create_group("/kiln").unwrap();
            c.create_table("/kiln/T", two_col()).unwrap();
            c.append("/kiln/T", vec![f64_row(0.0, 20.0), f64_row(1.0, 21.0)]).unwrap();
            c.set_attr("/kiln", "unit", "celsius".into()).unwrap();
            c.close().unwrap();
        }
        let c = ContainerFile::open(&path, AccessMode::ReadOnly).unwrap();
        assert_eq!(c.row_count("/kiln/T"), Some(2));
        assert_eq!(c.attr("/kiln", "unit").and_then(|v| v.as_str()), Some("celsius"));
        assert_eq!(c.children("/"), vec!["/kiln".to_string()]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = ContainerFile::open(&dir.path().join("nope.rec"), AccessMode::ReadOnly).unwrap_err();
        assert!(matches!(err, StoreError::FileNotFound(_)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.rec");
        ContainerFile::create(&path).unwrap().close().unwrap();
        let mut c = ContainerFile::open(&path, AccessMode::ReadOnly).unwrap();
        assert!(matches!(c.create_group("/x"), Err(StoreError::ReadOnlyMode)));
    }

    #[test]
    fn test_table_rejects_wrong_row_width() {
        let dir = tempdir().unwrap();
        let mut c = ContainerFile::create(&dir.path().join("a.rec")).unwrap();
        c.create_table("/t", two_col()).unwrap();
        let err = c.append("/t", vec![vec![0u8; 3]]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidFormat(_)));
        assert_eq!(c.row_count("/t"), Some(0));
    }

    #[test]
    fn test_link_reads_and_appends_through_target() {
        let dir = tempdir().unwrap();
        let mut c = ContainerFile::create(&dir.path().join("a.rec")).unwrap();
        c.create_vlarray("/data/blob").unwrap();
        c.link("/data/blob", "/alias/blob").unwrap();
        c.append("/alias/blob", vec![b"abc".to_vec()]).unwrap();
        assert!(c.is_link("/alias/blob"));
        assert_eq!(c.rows("/data/blob").unwrap().len(), 1);
        assert_eq!(c.resolve("/alias/blob").as_deref(), Some("/data/blob"));

        c.remove("/data").unwrap();
        assert!(!c.contains("/alias/blob"), "dangling link must not resolve");
    }

    #[test]
    fn test_remove_is_recursive_and_children_are_direct() {
        let dir = tempdir().unwrap();
        let mut c = ContainerFile::create(&dir.path().join("a.rec")).unwrap();
        c.create_group("/a/b/c").unwrap();
        c.create_group("/a/d").unwrap();
        c.create_group("/ab").unwrap();
        assert_eq!(c.children("/a"), vec!["/a/b".to_string(), "/a/d".to_string()]);
        c.remove("/a").unwrap();
        assert!(!c.contains("/a/b/c"));
        assert!(c.contains("/ab"));
    }

    #[test]
    fn test_closed_container_reports_absent() {
        let dir = tempdir().unwrap();
        let mut c = ContainerFile::create(&dir.path().join("a.rec")).unwrap();
        c.create_group("/x").unwrap();
        c.close().unwrap();
        assert!(!c.contains("/x"));
        assert!(matches!(c.rows("/x"), Err(StoreError::StoreClosed(_))));
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.rec");
        let mut c = ContainerFile::create(&path).unwrap();
        c.create_group("/some/group").unwrap();
        c.close().unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        let err = ContainerFile::open(&path, AccessMode::ReadWrite).unwrap_err();
        assert!(err.to_string().contains("truncated"), "unexpected error: {}", err);
    }

    #[test]
    fn test_oversized_payload_length_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.rec");
        for len in [u64::MAX, u64::MAX - HEADER_SIZE as u64 + 1, 1 << 40] {
            let mut file = File::create(&path).unwrap();
            ContainerHeader::new(len).write_to(&mut file).unwrap();
            file.write_all(&[0u8; 8]).unwrap();
            drop(file);
            for mode in [AccessMode::ReadOnly, AccessMode::ReadWrite] {
                let err = ContainerFile::open(&path, mode).unwrap_err();
                assert!(matches!(err, StoreError::InvalidFormat(_)), "len {}: {}", len, err);
            }
        }
    }
}
