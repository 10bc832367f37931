//! Integration test: version branches of a record file.
//!
//! Validates that:
//! - Reads under a version fall back to the original branch
//! - Rewrites land in the active version and leave the original intact
//! - The active version and its name survive close + reopen

use labrec::{
    AccessMode, ConfNode, ConfOption, OptionType, RecordStore, RefValue, Reference, ReferenceClass,
    StoreConfig, StoreError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn samples(values: &[(f64, f64)]) -> Vec<(f64, RefValue)> {
    values.iter().map(|&(t, v)| (t, RefValue::Number(v))).collect()
}

fn record_with_reference(dir: &TempDir) -> RecordStore {
    let store = RecordStore::create(&dir.path().join("run.rec"), Some("uid-run"), StoreConfig::default()).unwrap();
    let conf = ConfNode::new().with_option(ConfOption::new("name", OptionType::String, "original"));
    store.save_conf(&conf).unwrap();
    let temp = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, None).unwrap();
    temp.append(&samples(&[(0.0, 20.0), (1.0, 25.0), (2.0, 30.0)])).unwrap();
    store
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn version_reads_fall_back_to_original() {
    let dir = TempDir::new().unwrap();
    let store = record_with_reference(&dir);
    store.create_version("edit").unwrap();

    let info = store.get_node("/kiln/T").unwrap().expect("falls back");
    assert_eq!(info.resolved, "/kiln/T");
    let temp = Reference::open(&store, "/kiln/T").unwrap();
    assert_eq!(temp.len().unwrap(), 3);
    assert_eq!(
        store.load_conf(None).unwrap().get("/", "name").and_then(|v| v.as_str()),
        Some("original")
    );
}

#[test]
fn rewrite_shadows_original_only_in_version() {
    let dir = TempDir::new().unwrap();
    let store = record_with_reference(&dir);
    let temp = Reference::open(&store, "/kiln/T").unwrap();
    assert!(matches!(temp.rewrite(&samples(&[(0.0, 1.0)])), Err(StoreError::ReadOnlyVersion(_))));

    let version = store.create_version("smoothed").unwrap();
    temp.rewrite(&samples(&[(0.0, 21.0), (2.0, 29.0)])).unwrap();
    assert_eq!(store.resolve("/kiln/T").unwrap().as_deref(), Some(format!("{}/kiln/T", version).as_str()));
    assert_eq!(temp.len().unwrap(), 2);

    store.set_active_version("").unwrap();
    assert_eq!(temp.len().unwrap(), 3);
}

#[test]
fn active_version_and_name_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.rec");
    {
        let store = record_with_reference(&dir);
        let version = store.create_version("v1").unwrap();
        assert_eq!(version, "/ver_1");
        store.set_option("/", "name", "x").unwrap();
        store.close().unwrap();
    }

    let store = RecordStore::open(&path, AccessMode::ReadOnly, StoreConfig::default()).unwrap();
    assert_eq!(store.active_version().unwrap(), "/ver_1");
    let versions = store.list_versions().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].name, "v1");
    assert!(versions[1].active);
    assert_eq!(store.load_conf(None).unwrap().get("/", "name").and_then(|v| v.as_str()), Some("x"));
    assert_eq!(
        store.load_conf(Some("")).unwrap().get("/", "name").and_then(|v| v.as_str()),
        Some("original")
    );
}

#[test]
fn removing_active_version_returns_to_original() {
    let dir = TempDir::new().unwrap();
    let store = record_with_reference(&dir);
    let version = store.create_version("scratch").unwrap();
    store.remove_version(&version).unwrap();
    assert_eq!(store.active_version().unwrap(), "");
    assert!(matches!(store.remove_version(""), Err(StoreError::ReadOnlyVersion(_))));
    assert!(matches!(store.set_active_version("/ver_9"), Err(StoreError::VersionNotFound(_))));
}
