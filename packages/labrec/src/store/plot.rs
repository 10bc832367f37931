//! Saved plots, stored per branch under `<version>/plot/<name>`.

use super::{RecordStore, DATE_ATTR};
use crate::container::{basename, join, normalize};
use crate::error::Result;

const PLOT_FOLDER: &str = "plot";
const RENDER_NODE: &str = "render";

#[derive(Debug, Clone, PartialEq)]
pub struct Plot {
    /// Container path of the plot group.
    pub node: String,
    pub name: String,
    pub title: String,
    pub date: String,
    pub script: String,
    /// Rendered image, empty when none was saved.
    pub render: Vec<u8>,
    pub format: String,
}

fn plot_folder(version: &str) -> String {
    normalize(&format!("{}/{}", version, PLOT_FOLDER))
}

impl RecordStore {
    /// Save a plot into the active version, replacing one with the same name.
    pub fn save_plot(&self, name: &str, title: &str, script: &str, render: &[u8], format: &str) -> Result<String> {
        let mut inner = self.lock()?;
        let node = join(&plot_folder(&inner.active), name);
        let date = chrono::Utc::now().to_rfc3339();
        let container = inner.writable()?;
        if container.contains(&node) {
            container.remove(&node)?;
        }
        container.create_group(&node)?;
        container.set_attr(&node, "title", title.into())?;
        container.set_attr(&node, "script", script.into())?;
        container.set_attr(&node, "format", format.into())?;
        container.set_attr(&node, DATE_ATTR, date.into())?;
        let render_path = join(&node, RENDER_NODE);
        container.create_vlarray(&render_path)?;
        container.append(&render_path, vec![render.to_vec()])?;
        inner.bump();
        Ok(node)
    }

    /// Plots saved in exactly `version` (no fallback to the original).
    pub fn list_plots(&self, version: &str) -> Result<Vec<Plot>> {
        let inner = self.lock()?;
        let container = inner.container()?;
        let text = |path: &str, key: &str| {
            container
                .attr(path, key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let mut plots = Vec::new();
        for node in container.children(&plot_folder(version)) {
            let render = container
                .rows(&join(&node, RENDER_NODE))
                .ok()
                .and_then(|rows| rows.last().cloned())
                .unwrap_or_default();
            plots.push(Plot {
                name: basename(&node).to_string(),
                title: text(&node, "title"),
                date: text(&node, DATE_ATTR),
                script: text(&node, "script"),
                format: text(&node, "format"),
                render,
                node,
            });
        }
        Ok(plots)
    }
}

#[cfg(test)]
mod plot_tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    #[test]
    fn test_plots_are_scoped_to_versions() {
        let dir = tempdir().unwrap();
        let store = RecordStore::create(&dir.path().join("a.rec"), None, StoreConfig::default()).unwrap();
        store.save_plot("overview", "Overview", "plot(T)", b"PNG", "png").unwrap();
        let v = store.create_version("edit").unwrap();
        store.save_plot("detail", "Detail", "plot(h)", &[], "png").unwrap();
        store.save_plot("detail", "Detail 2", "plot(h, w)", b"X", "svg").unwrap();

        let original = store.list_plots("").unwrap();
        assert_eq!(original.len(), 1);
        assert_eq!(original[0].node, "/plot/overview");
        assert_eq!(original[0].render, b"PNG".to_vec());

        let branch = store.list_plots(&v).unwrap();
        assert_eq!(branch.len(), 1);
        assert_eq!(branch[0].title, "Detail 2");
        assert_eq!(branch[0].format, "svg");
        assert_eq!(branch[0].node, "/ver_1/plot/detail");
    }
}
