//! Versioned record store.
//!
//! A `RecordStore` wraps one container file behind a mandatory mutex. Every
//! operation takes the mutex with a bounded wait; running out of time is a
//! `LockTimeout` for that call and is never retried here. Read-write opens
//! also hold the file's `WriteLock`, so a second writer, in this process or
//! another, fails with `LockTimeout` instead of silently losing changes.
//!
//! Reserved layout inside the container:
//! ```text
//! /                    uid, date
//! /userdata            active_version, header_cache, signature
//! /conf                configuration of the original branch (JSON row)
//! /plot/<name>         plots of the original branch
//! /summary/<path>      summary mirror of an Array reference
//! /ver_N               version branch (name, date)
//! /ver_N/conf          branch configuration, once written
//! /ver_N/<path>        overrides; everything else falls back to original
//! ```

pub mod header;
pub mod plot;
pub mod reference;
pub mod version;

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};

use crate::codec::{ReferenceClass, RowLayout, REFERENCE_CLASS_ATTR};
use crate::config::StoreConfig;
use crate::container::{normalize, AccessMode, AttrValue, Attributes, ContainerFile, NodeKind};
use crate::error::{Result, StoreError};
use crate::lock::WriteLock;

pub use header::Header;
pub use plot::Plot;
pub use reference::{Reference, ReferenceMeta};
pub use version::VersionInfo;

/// Reserved metadata group.
pub const USERDATA: &str = "/userdata";
pub const ACTIVE_VERSION_ATTR: &str = "active_version";
pub const UID_ATTR: &str = "uid";
pub const DATE_ATTR: &str = "date";

/// Path segment of the original branch.
pub const ORIGINAL: &str = "";

/// Resolves a record UID to the file holding it.
pub trait UidResolver {
    fn resolve_uid(&self, uid: &str) -> Result<Option<PathBuf>>;
}

/// Result of a node lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// Path as requested.
    pub path: String,
    /// Container path holding the data, after version and link resolution.
    pub resolved: String,
    pub kind: NodeKind,
    pub reference_class: Option<ReferenceClass>,
    pub len: usize,
}

#[derive(Debug, Clone)]
struct CachedNode {
    resolved: String,
    generation: u64,
}

/// State guarded by the store mutex.
pub(crate) struct StoreInner {
    path: PathBuf,
    mode: AccessMode,
    container: Option<ContainerFile>,
    /// Held while the container is open read-write. Declared after
    /// `container` so a final flush happens before release.
    writer: Option<WriteLock>,
    /// `""` or `/ver_N`.
    active: String,
    /// Bumped on every structural change; older cache entries are misses.
    generation: u64,
    cache: HashMap<String, CachedNode>,
    header: Option<Header>,
}

/// Number of a `ver_N` path segment, `None` for anything else.
pub(crate) fn version_number(segment: &str) -> Option<u32> {
    segment
        .strip_prefix("ver_")?
        .parse()
        .ok()
        .filter(|n| *n >= 1)
}

/// Whether a normalized path lies inside a version branch.
pub(crate) fn is_version_path(path: &str) -> bool {
    path.split('/')
        .find(|s| !s.is_empty())
        .and_then(version_number)
        .is_some()
}

/// Paths to try, in order, for `path` under the `active` version.
fn candidates(active: &str, path: &str) -> Vec<String> {
    let path = normalize(path);
    let unversioned = active.is_empty()
        || path == "/"
        || is_version_path(&path)
        || path == USERDATA
        || path.starts_with("/userdata/");
    if unversioned {
        vec![path]
    } else {
        vec![format!("{}{}", active, path), path]
    }
}

impl StoreInner {
    pub(crate) fn container(&self) -> Result<&ContainerFile> {
        self.container
            .as_ref()
            .filter(|c| c.is_open())
            .ok_or_else(|| StoreError::StoreClosed(self.path.clone()))
    }

    fn container_mut(&mut self) -> Result<&mut ContainerFile> {
        match self.container.as_mut() {
            Some(c) if c.is_open() => Ok(c),
            _ => Err(StoreError::StoreClosed(self.path.clone())),
        }
    }

    fn writable(&mut self) -> Result<&mut ContainerFile> {
        let container = self.container_mut()?;
        if !container.mode().is_write() {
            return Err(StoreError::ReadOnlyMode);
        }
        Ok(container)
    }

    /// Structural change: invalidate cached lookups.
    fn bump(&mut self) {
        self.generation += 1;
    }

    /// Resolve a logical path through the active version and links.
    /// Closed stores resolve nothing.
    fn lookup(&mut self, path: &str) -> Option<String> {
        let key = normalize(path);
        let container = self.container.as_ref().filter(|c| c.is_open())?;

        if let Some(hit) = self.cache.get(&key) {
            if hit.generation == self.generation && container.contains(&hit.resolved) {
                return Some(hit.resolved.clone());
            }
        }

        for logical in candidates(&self.active, &key) {
            let Some(resolved) = container.resolve(&logical) else {
                continue;
            };
            if container.is_link(&logical) {
                self.cache.remove(&key);
            } else {
                self.cache.insert(
                    key,
                    CachedNode {
                        resolved: resolved.clone(),
                        generation: self.generation,
                    },
                );
            }
            return Some(resolved);
        }
        self.cache.remove(&key);
        None
    }

    fn require(&mut self, path: &str) -> Result<String> {
        self.container()?;
        self.lookup(path)
            .ok_or_else(|| StoreError::NodeNotFound(normalize(path)))
    }

    /// Drop the header cache, in memory and persisted.
    fn invalidate_header(&mut self) -> Result<()> {
        self.header = None;
        if let Some(c) = self.container.as_mut().filter(|c| c.is_open() && c.mode().is_write()) {
            if c.contains(USERDATA) {
                c.remove_attr(USERDATA, header::HEADER_CACHE_ATTR)?;
            }
        }
        Ok(())
    }

    /// Read the active version marker, creating it when writable.
    fn load_active(&mut self) -> Result<()> {
        let path = self.path.clone();
        let container = self.container_mut()?;
        let stored = container
            .attr(USERDATA, ACTIVE_VERSION_ATTR)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let active = match stored {
            Some(v) if v.is_empty() || container.contains(&v) => v,
            Some(v) => {
                tracing::warn!(
                    path = %path.display(),
                    version = %v,
                    "active version is missing, falling back to original"
                );
                String::new()
            }
            None => {
                if container.mode().is_write() {
                    container.create_group(USERDATA)?;
                    container.set_attr(USERDATA, ACTIVE_VERSION_ATTR, ORIGINAL.into())?;
                }
                String::new()
            }
        };
        self.active = active;
        self.bump();
        Ok(())
    }

    fn node_info(&mut self, path: &str) -> Option<NodeInfo> {
        let resolved = self.lookup(path)?;
        let node = self.container.as_ref()?.node(&resolved)?;
        let reference_class = node
            .attrs
            .get(REFERENCE_CLASS_ATTR)
            .and_then(|v| v.as_str())
            .and_then(|name| ReferenceClass::from_name(name).ok());
        Some(NodeInfo {
            path: normalize(path),
            resolved,
            kind: node.kind.clone(),
            reference_class,
            len: node.len(),
        })
    }

    fn create_typed(&mut self, path: &str, class: ReferenceClass) -> Result<()> {
        let container = self.writable()?;
        match class.layout() {
            RowLayout::Table(columns) => container.create_table(path, columns)?,
            RowLayout::Variable => container.create_vlarray(path)?,
        }
        container.set_attr(path, REFERENCE_CLASS_ATTR, class.name().into())?;
        self.bump();
        self.invalidate_header()
    }
}

fn clamp(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}

// ── Store ──────────────────────────────────────────────────────────

pub struct RecordStore {
    path: PathBuf,
    config: StoreConfig,
    inner: Mutex<StoreInner>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").field("path", &self.path).finish()
    }
}

impl RecordStore {
    fn from_container(
        path: &Path,
        container: ContainerFile,
        writer: Option<WriteLock>,
        config: StoreConfig,
    ) -> Result<Self> {
        let mut inner = StoreInner {
            path: path.to_path_buf(),
            mode: container.mode(),
            container: Some(container),
            writer,
            active: String::new(),
            generation: 0,
            cache: HashMap::new(),
            header: None,
        };
        inner.load_active()?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Create a new record file holding only the original branch. A fresh
    /// UID is generated when none is given.
    pub fn create(path: &Path, uid: Option<&str>, config: StoreConfig) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let writer = Self::write_lock(path, &config)?;
        let mut container = ContainerFile::create(path)?;
        let uid = uid
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        container.set_attr("/", UID_ATTR, uid.as_str().into())?;
        container.set_attr("/", DATE_ATTR, chrono::Utc::now().to_rfc3339().into())?;
        container.create_group(USERDATA)?;
        container.set_attr(USERDATA, ACTIVE_VERSION_ATTR, ORIGINAL.into())?;
        container.flush()?;
        tracing::debug!(path = %path.display(), uid = %uid, "record created");
        Self::from_container(path, container, Some(writer), config)
    }

    /// Open an existing record file. Missing files are `FileNotFound`; a
    /// read-write open of a file another writer holds is `LockTimeout`.
    pub fn open(path: &Path, mode: AccessMode, config: StoreConfig) -> Result<Self> {
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let writer = match mode {
            AccessMode::ReadWrite => Some(Self::write_lock(path, &config)?),
            AccessMode::ReadOnly => None,
        };
        let container = ContainerFile::open(path, mode)?;
        Self::from_container(path, container, writer, config)
    }

    fn write_lock(path: &Path, config: &StoreConfig) -> Result<WriteLock> {
        WriteLock::acquire(path, config.lock_timeout(), config.lock_poll())
    }

    /// Open the record registered under `uid`.
    pub fn open_uid(
        resolver: &dyn UidResolver,
        uid: &str,
        mode: AccessMode,
        config: StoreConfig,
    ) -> Result<Self> {
        let path = resolver
            .resolve_uid(uid)?
            .ok_or_else(|| StoreError::UidNotFound(uid.to_string()))?;
        Self::open(&path, mode, config)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        let timeout = self.config.lock_timeout();
        self.inner.try_lock_for(timeout).ok_or_else(|| {
            tracing::warn!(
                path = %self.path.display(),
                timeout_ms = timeout.as_millis() as u64,
                "store lock timed out"
            );
            StoreError::LockTimeout {
                what: self.path.display().to_string(),
                timeout_ms: timeout.as_millis(),
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn mode(&self) -> Result<AccessMode> {
        Ok(self.lock()?.mode)
    }

    pub fn is_open(&self) -> bool {
        self.lock()
            .map(|inner| inner.container().is_ok())
            .unwrap_or(false)
    }

    /// UID stamped on the root group.
    pub fn uid(&self) -> Result<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .container()?
            .attr("/", UID_ATTR)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.container_mut()?.flush()
    }

    /// Flush and release the container. Later lookups report not-found.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(mut container) = inner.container.take() {
            container.close()?;
        }
        inner.writer = None;
        inner.cache.clear();
        inner.header = None;
        inner.bump();
        tracing::debug!(path = %self.path.display(), "record closed");
        Ok(())
    }

    /// Reopen the container in `mode`. No-op when already open that way.
    pub fn reopen(&self, mode: AccessMode) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.mode == mode && inner.container().is_ok() {
            return Ok(());
        }
        // Take the write lock before giving up the current container.
        if mode.is_write() && inner.writer.is_none() {
            inner.writer = Some(Self::write_lock(&self.path, &self.config)?);
        }
        if let Some(mut container) = inner.container.take() {
            container.close()?;
        }
        if !mode.is_write() {
            inner.writer = None;
        }
        inner.cache.clear();
        inner.header = None;
        inner.container = Some(ContainerFile::open(&self.path, mode)?);
        inner.mode = mode;
        inner.load_active()?;
        tracing::debug!(path = %self.path.display(), mode = mode.as_str(), "record reopened");
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Look up a node under the active version. Closed stores and missing
    /// nodes both give `Ok(None)`.
    pub fn get_node(&self, path: &str) -> Result<Option<NodeInfo>> {
        let mut inner = self.lock()?;
        Ok(inner.node_info(path))
    }

    /// Cheap existence probe. Never fails: a store that is closed or busy
    /// past the lock timeout reports `false`.
    pub fn has_node(&self, path: &str) -> bool {
        match self.lock() {
            Ok(mut inner) => inner.lookup(path).is_some(),
            Err(_) => false,
        }
    }

    /// Logical path resolved to the container path holding its data.
    pub fn resolve(&self, path: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        inner.container()?;
        Ok(inner.lookup(path))
    }

    /// Whether a container path exists, without version fallback.
    pub(crate) fn exists_at(&self, path: &str) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner.container()?.contains(path))
    }

    pub fn create_group(&self, path: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.writable()?.create_group(path)?;
        inner.bump();
        Ok(())
    }

    /// Create a reference node at the exact container `path`.
    pub fn create_typed_node(&self, path: &str, class: ReferenceClass) -> Result<()> {
        let mut inner = self.lock()?;
        inner.create_typed(path, class)
    }

    /// Remove the node at the exact container `path` and its subtree.
    pub fn remove_node(&self, path: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.writable()?.remove(path)?;
        inner.bump();
        inner.invalidate_header()
    }

    /// Append encoded rows to the node `path` resolves to. Returns the new
    /// row count.
    pub fn append_to_node(&self, path: &str, rows: Vec<Vec<u8>>) -> Result<usize> {
        let mut inner = self.lock()?;
        let resolved = inner.require(path)?;
        inner.writable()?.append(&resolved, rows)
    }

    pub(crate) fn append_at(&self, path: &str, rows: Vec<Vec<u8>>) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.writable()?.append(path, rows)
    }

    pub fn read_rows(&self, path: &str, range: Range<usize>) -> Result<Vec<Vec<u8>>> {
        let mut inner = self.lock()?;
        let resolved = inner.require(path)?;
        let rows = inner.container()?.rows(&resolved)?;
        Ok(rows[clamp(range, rows.len())].to_vec())
    }

    pub(crate) fn rows_at(&self, path: &str, range: Range<usize>) -> Result<Vec<Vec<u8>>> {
        let inner = self.lock()?;
        let rows = inner.container()?.rows(path)?;
        Ok(rows[clamp(range, rows.len())].to_vec())
    }

    /// Row count of the node at the exact container `path`.
    pub(crate) fn row_count_at(&self, path: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.container()?.rows(path)?.len())
    }

    /// Index of the first row at the exact container `path` for which
    /// `before` is false. Rows must be partitioned by `before`.
    pub(crate) fn partition_at<F>(&self, path: &str, before: F) -> Result<usize>
    where
        F: FnMut(&Vec<u8>) -> bool,
    {
        let inner = self.lock()?;
        Ok(inner.container()?.rows(path)?.partition_point(before))
    }

    pub fn row_count(&self, path: &str) -> Result<Option<usize>> {
        let mut inner = self.lock()?;
        Ok(inner.node_info(path).map(|n| n.len))
    }

    /// Children of `path`, merged across the active version and the
    /// original branch, as logical paths.
    pub fn list_nodes(&self, path: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let container = inner.container()?;
        let folder = normalize(path);
        let mut names = std::collections::BTreeSet::new();
        for candidate in candidates(&inner.active, &folder) {
            for child in container.children(&candidate) {
                names.insert(crate::container::basename(&child).to_string());
            }
        }
        Ok(names
            .into_iter()
            .map(|name| crate::container::join(&folder, &name))
            .collect())
    }

    /// Hard-link `dst` to the node `src` resolves to.
    pub fn link(&self, src: &str, dst: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let target = inner.require(src)?;
        inner.writable()?.link(&target, dst)?;
        inner.bump();
        Ok(())
    }

    // ── Attributes ─────────────────────────────────────────────────

    pub fn get_attributes(&self, path: &str) -> Result<Attributes> {
        let mut inner = self.lock()?;
        let resolved = inner.require(path)?;
        Ok(inner.container()?.attrs(&resolved)?.clone())
    }

    pub fn get_attribute(&self, path: &str, key: &str) -> Result<Option<AttrValue>> {
        Ok(self.get_attributes(path)?.remove(key))
    }

    /// Merge `attrs` into the attributes of the node `path` resolves to.
    pub fn set_attributes(&self, path: &str, attrs: &Attributes) -> Result<()> {
        let mut inner = self.lock()?;
        let resolved = inner.require(path)?;
        let container = inner.writable()?;
        for (key, value) in attrs {
            container.set_attr(&resolved, key, value.clone())?;
        }
        Ok(())
    }

    pub fn set_attribute(&self, path: &str, key: &str, value: impl Into<AttrValue>) -> Result<()> {
        let mut attrs = Attributes::new();
        attrs.insert(key.to_string(), value.into());
        self.set_attributes(path, &attrs)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(mut container) = inner.container.take() {
            if let Err(e) = container.close() {
                tracing::warn!(path = %self.path.display(), "record close on drop failed: {}", e);
            }
        }
        inner.writer = None;
    }
}
