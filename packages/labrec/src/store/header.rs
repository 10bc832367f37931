//! Reference header: class name → node paths.
//!
//! Built by a full scan of the container and persisted as JSON in the
//! `header_cache` attribute of `/userdata`, so later opens skip the scan.
//! Any structural change to references drops both copies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{RecordStore, USERDATA};
use crate::codec::{ReferenceClass, REFERENCE_CLASS_ATTR};
use crate::container::ContainerFile;
use crate::error::Result;

pub const HEADER_CACHE_ATTR: &str = "header_cache";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Keyed by class name; paths are sorted.
    pub classes: BTreeMap<String, Vec<String>>,
}

impl Header {
    pub fn scan(container: &ContainerFile) -> Self {
        let mut classes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, node) in container.walk("/") {
            let Some(name) = node.attrs.get(REFERENCE_CLASS_ATTR).and_then(|v| v.as_str()) else {
                continue;
            };
            if ReferenceClass::from_name(name).is_err() {
                tracing::warn!(path = %path, class = %name, "skipping node with unknown reference class");
                continue;
            }
            classes.entry(name.to_string()).or_default().push(path.clone());
        }
        for paths in classes.values_mut() {
            paths.sort();
        }
        Self { classes }
    }

    /// Paths of the given classes, or of every class when `types` is empty.
    pub fn paths(&self, types: &[ReferenceClass]) -> Vec<String> {
        let mut out: Vec<String> = if types.is_empty() {
            self.classes.values().flatten().cloned().collect()
        } else {
            types
                .iter()
                .filter_map(|t| self.classes.get(t.name()))
                .flatten()
                .cloned()
                .collect()
        };
        out.sort();
        out.dedup();
        out
    }

    pub fn len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore {
    /// Reference paths of the given classes (all classes when empty).
    ///
    /// `refresh` forces a rescan; otherwise the in-memory header, then the
    /// persisted one, is used before scanning.
    pub fn header(&self, types: &[ReferenceClass], refresh: bool) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        if refresh {
            inner.header = None;
        }
        if inner.header.is_none() {
            let container = inner.container()?;
            let persisted = if refresh {
                None
            } else {
                container
                    .attr(USERDATA, HEADER_CACHE_ATTR)
                    .and_then(|v| v.as_str())
                    .and_then(|json| serde_json::from_str::<Header>(json).ok())
            };
            let header = match persisted {
                Some(header) => header,
                None => {
                    let header = Header::scan(container);
                    tracing::debug!(path = %self.path().display(), references = header.len(), "header rebuilt");
                    let writable = container.mode().is_write() && container.contains(USERDATA);
                    if writable {
                        let json = serde_json::to_string(&header)?;
                        inner
                            .container_mut()?
                            .set_attr(USERDATA, HEADER_CACHE_ATTR, json.into())?;
                    }
                    header
                }
            };
            inner.header = Some(header);
        }
        Ok(inner
            .header
            .as_ref()
            .map(|h| h.paths(types))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::container::AccessMode;
    use tempfile::tempdir;

    #[test]
    fn test_header_lists_references_by_class() {
        let dir = tempdir().unwrap();
        let store = RecordStore::create(&dir.path().join("a.rec"), None, StoreConfig::default()).unwrap();
        store.create_typed_node("/kiln/T", ReferenceClass::Array).unwrap();
        store.create_typed_node("/kiln/log", ReferenceClass::Log).unwrap();
        store.create_typed_node("/hsm/frame", ReferenceClass::Image).unwrap();
        store.create_group("/plain").unwrap();

        assert_eq!(store.header(&[ReferenceClass::Array], false).unwrap(), vec!["/kiln/T"]);
        assert_eq!(store.header(&[], false).unwrap().len(), 3);
        assert_eq!(
            store.header(&[ReferenceClass::Log, ReferenceClass::Image], false).unwrap(),
            vec!["/hsm/frame", "/kiln/log"]
        );
    }

    #[test]
    fn test_header_is_invalidated_by_new_references() {
        let dir = tempdir().unwrap();
        let store = RecordStore::create(&dir.path().join("a.rec"), None, StoreConfig::default()).unwrap();
        store.create_typed_node("/a", ReferenceClass::Array).unwrap();
        assert_eq!(store.header(&[], false).unwrap().len(), 1);
        store.create_typed_node("/b", ReferenceClass::Array).unwrap();
        assert_eq!(store.header(&[], false).unwrap().len(), 2);
        store.remove_node("/a").unwrap();
        assert_eq!(store.header(&[], false).unwrap(), vec!["/b"]);
    }

    #[test]
    fn test_header_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.rec");
        {
            let store = RecordStore::create(&path, None, StoreConfig::default()).unwrap();
            store.create_typed_node("/a", ReferenceClass::Meta).unwrap();
            store.header(&[], false).unwrap();
            store.close().unwrap();
        }
        let store = RecordStore::open(&path, AccessMode::ReadOnly, StoreConfig::default()).unwrap();
        let cached = store.get_attribute(USERDATA, HEADER_CACHE_ATTR).unwrap();
        assert!(cached.is_some());
        assert_eq!(store.header(&[ReferenceClass::Meta], false).unwrap(), vec!["/a"]);
        assert_eq!(store.header(&[ReferenceClass::Meta], true).unwrap(), vec!["/a"]);
    }
}
