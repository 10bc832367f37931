//! Version branches and branch-local configuration.
//!
//! The original branch (`""`) is immutable once it holds a configuration;
//! edits go to a `/ver_N` branch. Reads fall back to the original for any
//! path the branch has not overridden.

use serde::Serialize;

use super::{version_number, RecordStore, StoreInner, ACTIVE_VERSION_ATTR, DATE_ATTR, ORIGINAL, USERDATA};
use crate::conf::{ConfNode, OptionValue};
use crate::container::{basename, normalize};
use crate::error::{Result, StoreError};

/// Name of the configuration node inside each branch.
pub const CONF_NODE: &str = "conf";
pub const NAME_ATTR: &str = "name";

/// Display name of the original branch.
pub const ORIGINAL_NAME: &str = "Original";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    /// `""` or `/ver_N`.
    pub path: String,
    pub name: String,
    pub date: String,
    pub active: bool,
}

fn conf_path(version: &str) -> String {
    format!("{}/{}", version, CONF_NODE)
}

fn text_attr(inner: &StoreInner, path: &str, key: &str) -> Result<String> {
    Ok(inner
        .container()?
        .attr(path, key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string())
}

impl StoreInner {
    /// Version groups, ordered by number.
    fn version_paths(&self) -> Result<Vec<(u32, String)>> {
        let mut out: Vec<(u32, String)> = self
            .container()?
            .children("/")
            .into_iter()
            .filter_map(|p| version_number(basename(&p)).map(|n| (n, p)))
            .collect();
        out.sort();
        Ok(out)
    }

    fn check_version(&self, version: &str) -> Result<()> {
        if version.is_empty() || self.version_paths()?.iter().any(|(_, p)| p == version) {
            return Ok(());
        }
        Err(StoreError::VersionNotFound(version.to_string()))
    }

    fn set_active(&mut self, version: &str) -> Result<()> {
        self.writable()?
            .set_attr(USERDATA, ACTIVE_VERSION_ATTR, version.into())?;
        self.active = version.to_string();
        self.bump();
        Ok(())
    }

    pub(crate) fn load_conf(&self, version: &str) -> Result<ConfNode> {
        let container = self.container()?;
        let path = [conf_path(version), conf_path(ORIGINAL)]
            .into_iter()
            .find(|p| container.contains(p))
            .ok_or_else(|| StoreError::NodeNotFound(conf_path(version)))?;
        let row = container
            .rows(&path)?
            .last()
            .ok_or_else(|| StoreError::InvalidFormat(format!("Empty configuration node {}", path)))?;
        ConfNode::from_json(row)
    }

    pub(crate) fn save_conf(&mut self, conf: &ConfNode) -> Result<()> {
        let target = conf_path(&self.active);
        let exists = self.container()?.contains(&target);
        if self.active.is_empty() && exists {
            return Err(StoreError::ReadOnlyVersion(ORIGINAL_NAME.to_string()));
        }
        let json = conf.to_json()?;
        let container = self.writable()?;
        if exists {
            container.truncate(&target, 0)?;
        } else {
            container.create_vlarray(&target)?;
        }
        container.append(&target, vec![json])?;
        self.bump();
        Ok(())
    }
}

impl RecordStore {
    /// Original branch first, then `/ver_N` in numeric order.
    pub fn list_versions(&self) -> Result<Vec<VersionInfo>> {
        let inner = self.lock()?;
        let mut out = vec![VersionInfo {
            path: ORIGINAL.to_string(),
            name: ORIGINAL_NAME.to_string(),
            date: text_attr(&inner, "/", DATE_ATTR)?,
            active: inner.active.is_empty(),
        }];
        for (_, path) in inner.version_paths()? {
            out.push(VersionInfo {
                name: text_attr(&inner, &path, NAME_ATTR)?,
                date: text_attr(&inner, &path, DATE_ATTR)?,
                active: inner.active == path,
                path,
            });
        }
        Ok(out)
    }

    pub fn active_version(&self) -> Result<String> {
        let inner = self.lock()?;
        inner.container()?;
        Ok(inner.active.clone())
    }

    pub fn set_active_version(&self, version: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let version = if version.is_empty() { String::new() } else { normalize(version) };
        inner.check_version(&version)?;
        inner.set_active(&version)
    }

    /// Create a version branch and make it active. A branch already carrying
    /// `name` is emptied and reused; otherwise the next free number is taken.
    pub fn create_version(&self, name: &str) -> Result<String> {
        let mut inner = self.lock()?;
        let versions = inner.version_paths()?;

        let mut existing = None;
        for (_, path) in &versions {
            if text_attr(&inner, path, NAME_ATTR)? == name {
                existing = Some(path.clone());
                break;
            }
        }
        let path = match existing {
            Some(path) => {
                inner.writable()?.remove(&path)?;
                path
            }
            None => {
                let next = versions.last().map(|(n, _)| n + 1).unwrap_or(1);
                format!("/ver_{}", next)
            }
        };

        let date = chrono::Utc::now().to_rfc3339();
        let container = inner.writable()?;
        container.create_group(&path)?;
        container.set_attr(&path, NAME_ATTR, name.into())?;
        container.set_attr(&path, DATE_ATTR, date.into())?;
        inner.set_active(&path)?;
        inner.invalidate_header()?;
        tracing::info!(path = %self.path().display(), version = %path, name = %name, "version created");
        Ok(path)
    }

    /// Remove a version branch. The original cannot be removed.
    pub fn remove_version(&self, version: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if version.is_empty() {
            return Err(StoreError::ReadOnlyVersion(ORIGINAL_NAME.to_string()));
        }
        let version = normalize(version);
        inner.check_version(&version)?;
        inner.writable()?.remove(&version)?;
        if inner.active == version {
            inner.set_active(ORIGINAL)?;
        }
        inner.bump();
        inner.invalidate_header()?;
        tracing::info!(path = %self.path().display(), version = %version, "version removed");
        Ok(())
    }

    // ── Configuration ──────────────────────────────────────────────

    /// Configuration of `version` (active version when `None`), falling
    /// back to the original branch.
    pub fn load_conf(&self, version: Option<&str>) -> Result<ConfNode> {
        let inner = self.lock()?;
        let version = version.map(str::to_string).unwrap_or_else(|| inner.active.clone());
        inner.load_conf(&version)
    }

    /// Write the configuration of the active version.
    pub fn save_conf(&self, conf: &ConfNode) -> Result<()> {
        self.lock()?.save_conf(conf)
    }

    /// Change one option of the active version's configuration.
    pub fn set_option(&self, path: &str, handle: &str, value: impl Into<OptionValue>) -> Result<()> {
        let mut inner = self.lock()?;
        let active = inner.active.clone();
        let mut conf = inner.load_conf(&active)?;
        conf.set(path, handle, value)?;
        inner.save_conf(&conf)
    }
}
