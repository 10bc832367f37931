//! Typed references.
//!
//! A `Reference` is a handle on one appendable stream of a store: a logical
//! path plus the codec named by the node's `_reference_class` attribute.
//! Array references keep a summary mirror at `/summary<path>` (inside the
//! branch when the data node was rewritten in a version), resampled by
//! linear interpolation at a fixed time step.

use std::ops::Range;

use super::RecordStore;
use crate::codec::{bitmap, RefValue, ReferenceClass, Sample};
use crate::container::{join, normalize, AttrValue, Attributes};
use crate::error::{Result, StoreError};

const SUMMARY_ROOT: &str = "/summary";

/// Option metadata cached on the reference node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMeta {
    pub name: String,
    pub unit: Option<String>,
    pub kind: Option<String>,
}

impl ReferenceMeta {
    fn to_attrs(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), AttrValue::from(self.name.as_str()));
        if let Some(unit) = &self.unit {
            attrs.insert("unit".into(), AttrValue::from(unit.as_str()));
        }
        if let Some(kind) = &self.kind {
            attrs.insert("type".into(), AttrValue::from(kind.as_str()));
        }
        attrs
    }
}

/// Container path of the summary mirror for a data node.
pub fn summary_path(data_path: &str) -> String {
    let path = normalize(data_path);
    let mut segments = path.splitn(3, '/').skip(1);
    match (segments.next(), segments.next()) {
        (Some(first), Some(rest)) if super::version_number(first).is_some() => {
            format!("/{}{}/{}", first, SUMMARY_ROOT, rest)
        }
        _ => format!("{}{}", SUMMARY_ROOT, path),
    }
}

fn is_summary(path: &str) -> bool {
    path == SUMMARY_ROOT || path.starts_with("/summary/")
}

#[derive(Debug, Clone)]
pub struct Reference<'a> {
    store: &'a RecordStore,
    path: String,
    class: ReferenceClass,
}

impl<'a> Reference<'a> {
    /// Create a reference node at `folder/handle` in the original branch.
    pub fn create(
        store: &'a RecordStore,
        folder: &str,
        handle: &str,
        class: ReferenceClass,
        meta: Option<&ReferenceMeta>,
    ) -> Result<Self> {
        let path = join(folder, handle);
        store.create_typed_node(&path, class)?;
        let mut attrs = meta.map(ReferenceMeta::to_attrs).unwrap_or_default();
        attrs.insert("handle".into(), AttrValue::from(handle));
        store.set_attributes(&path, &attrs)?;
        Ok(Self { store, path, class })
    }

    /// Open an existing reference, resolved under the active version.
    pub fn open(store: &'a RecordStore, path: &str) -> Result<Self> {
        let info = store
            .get_node(path)?
            .ok_or_else(|| StoreError::NodeNotFound(normalize(path)))?;
        let class = info.reference_class.ok_or_else(|| {
            StoreError::InvalidFormat(format!("{} is not a reference node", info.path))
        })?;
        Ok(Self { store, path: info.path, class })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn class(&self) -> ReferenceClass {
        self.class
    }

    fn resolved(&self) -> Result<String> {
        self.store
            .resolve(&self.path)?
            .ok_or_else(|| StoreError::NodeNotFound(self.path.clone()))
    }

    /// Append samples. Samples the codec rejects are dropped; the number
    /// actually written is returned.
    pub fn append(&self, samples: &[Sample]) -> Result<usize> {
        let rows = self.class.encode_batch(samples);
        let written = rows.len();
        if written < samples.len() {
            tracing::debug!(
                path = %self.path,
                dropped = samples.len() - written,
                "dropped samples the codec rejected"
            );
        }
        if written == 0 {
            return Ok(0);
        }
        let resolved = self.resolved()?;
        self.store.append_at(&resolved, rows)?;
        if self.class.has_summary() && !is_summary(&self.path) {
            self.interpolate(self.store.config().summary_step)?;
        }
        Ok(written)
    }

    pub fn len(&self) -> Result<usize> {
        self.store
            .row_count(&self.path)?
            .ok_or_else(|| StoreError::NodeNotFound(self.path.clone()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Decoded rows in `range`. Rows that fail to decode are skipped.
    pub fn rows(&self, range: Range<usize>) -> Result<Vec<Sample>> {
        Ok(self
            .store
            .read_rows(&self.path, range)?
            .iter()
            .filter_map(|row| self.class.decode(row))
            .collect())
    }

    pub fn get(&self, index: usize) -> Result<Option<Sample>> {
        Ok(self.rows(index..index + 1)?.pop())
    }

    pub fn last(&self) -> Result<Option<Sample>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        self.get(len - 1)
    }

    /// Times of the first and last rows.
    pub fn time_range(&self) -> Result<Option<(f64, f64)>> {
        let len = self.len()?;
        if len == 0 {
            return Ok(None);
        }
        let first = self.store.read_rows(&self.path, 0..1)?;
        let last = self.store.read_rows(&self.path, len - 1..len)?;
        let time = |rows: &[Vec<u8>]| rows.first().and_then(|r| self.class.row_time(r));
        Ok(time(&first).zip(time(&last)))
    }

    /// Summary mirror of this reference, if one exists.
    pub fn summary(&self) -> Result<Option<Reference<'a>>> {
        if !self.class.has_summary() || is_summary(&self.path) {
            return Ok(None);
        }
        let path = summary_path(&self.resolved()?);
        if !self.store.exists_at(&path)? {
            return Ok(None);
        }
        Ok(Some(Reference {
            store: self.store,
            path,
            class: ReferenceClass::Array,
        }))
    }

    /// Extend the summary mirror up to the last full-resolution row, one
    /// interpolated row every `step` seconds. No-op for classes without a
    /// summary. Returns the number of summary rows added.
    pub fn interpolate(&self, step: f64) -> Result<usize> {
        if !self.class.has_summary() || is_summary(&self.path) {
            return Ok(0);
        }
        if !(step > 0.0 && step.is_finite()) {
            return Err(StoreError::InvalidFormat(format!("Invalid summary step {}", step)));
        }
        let resolved = self.resolved()?;
        let target = summary_path(&resolved);
        if !self.store.exists_at(&target)? {
            self.store.create_typed_node(&target, ReferenceClass::Array)?;
        }

        let data_len = self.store.row_count_at(&resolved)?;
        if data_len == 0 {
            return Ok(0);
        }
        let summary_len = self.store.row_count_at(&target)?;
        let covered = match summary_len {
            0 => None,
            n => self
                .store
                .rows_at(&target, n - 1..n)?
                .first()
                .and_then(|row| ReferenceClass::Array.row_time(row)),
        };

        // Only rows from the one bracketing the next summary time onward.
        let class = self.class;
        let from = match covered {
            Some(t) => {
                let next = t + step;
                self.store
                    .partition_at(&resolved, |row| class.row_time(row).map_or(true, |rt| rt < next))?
                    .saturating_sub(1)
            }
            None => 0,
        };
        let points: Vec<(f64, f64)> = self
            .store
            .rows_at(&resolved, from..data_len)?
            .iter()
            .filter_map(|row| class.decode(row))
            .filter_map(|(t, v)| v.as_f64().map(|v| (t, v)))
            .collect();
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Ok(0);
        };
        let start = covered.map_or(first.0, |t| t + step);

        let samples = resample(&points, start, last.0, step);
        if samples.is_empty() {
            return Ok(0);
        }
        let rows = ReferenceClass::Array.encode_batch(&samples);
        let added = rows.len();
        self.store.append_at(&target, rows)?;
        Ok(added)
    }

    /// Replace the whole stream inside the active version. The original
    /// branch keeps its rows.
    pub fn rewrite(&self, samples: &[Sample]) -> Result<usize> {
        let active = self.store.active_version()?;
        if active.is_empty() {
            return Err(StoreError::ReadOnlyVersion(super::version::ORIGINAL_NAME.to_string()));
        }
        let attrs = self.store.get_attributes(&self.path)?;
        let target = format!("{}{}", active, self.path);
        if self.store.exists_at(&target)? {
            self.store.remove_node(&target)?;
        }
        let summary = summary_path(&target);
        if self.store.exists_at(&summary)? {
            self.store.remove_node(&summary)?;
        }
        self.store.create_typed_node(&target, self.class)?;
        self.store.set_attributes(&target, &attrs)?;

        let rows = self.class.encode_batch(samples);
        let written = rows.len();
        if written > 0 {
            self.store.append_at(&target, rows)?;
        }
        if self.class.has_summary() {
            self.interpolate(self.store.config().summary_step)?;
        }
        tracing::debug!(path = %self.path, version = %active, rows = written, "reference rewritten");
        Ok(written)
    }

    /// Row `index` of a Binary reference, with legacy bitmaps expanded.
    pub fn bitmap(&self, index: usize) -> Result<Option<Vec<u8>>> {
        match self.get(index)? {
            Some((_, RefValue::Binary(blob))) => Ok(Some(bitmap::decompress(&blob)?.into_owned())),
            Some(_) => Err(StoreError::InvalidFormat(format!(
                "{} is a {} reference, not Binary",
                self.path, self.class
            ))),
            None => Ok(None),
        }
    }
}

/// Linear resampling of time-ordered `points` at `start + k * step` for
/// every target not past `end`.
fn resample(points: &[(f64, f64)], start: f64, end: f64, step: f64) -> Vec<Sample> {
    let mut out = Vec::new();
    let mut j = 0usize;
    let mut k = 0u64;
    loop {
        let t = start + k as f64 * step;
        if t > end {
            break;
        }
        k += 1;
        while j + 1 < points.len() && points[j + 1].0 < t {
            j += 1;
        }
        let (t0, v0) = points[j];
        let v = match points.get(j + 1) {
            Some(&(t1, v1)) if t1 > t0 && t >= t0 => v0 + (v1 - v0) * (t - t0) / (t1 - t0),
            _ => v0,
        };
        out.push((t, RefValue::Number(v)));
    }
    out
}

#[cfg(test)]
mod reference_tests {
    use super::*;
    use crate::codec::LogEntry;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    fn new_store(dir: &std::path::Path) -> RecordStore {
        RecordStore::create(&dir.join("a.rec"), Some("u"), StoreConfig::default()).unwrap()
    }

    fn series(values: &[(f64, f64)]) -> Vec<Sample> {
        values.iter().map(|&(t, v)| (t, RefValue::Number(v))).collect()
    }

    #[test]
    fn test_summary_path_mapping() {
        assert_eq!(summary_path("/kiln/T"), "/summary/kiln/T");
        assert_eq!(summary_path("/ver_2/kiln/T"), "/ver_2/summary/kiln/T");
    }

    #[test]
    fn test_append_reads_back_and_drops_malformed() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let meta = ReferenceMeta { name: "Temperature".into(), unit: Some("celsius".into()), kind: None };
        let r = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, Some(&meta)).unwrap();
        let mut samples = series(&[(0.0, 20.0), (1.0, 30.0)]);
        samples.push((2.0, RefValue::Flag(true)));
        assert_eq!(r.append(&samples).unwrap(), 2);
        assert_eq!(r.len().unwrap(), 2);
        assert_eq!(r.last().unwrap(), Some((1.0, RefValue::Number(30.0))));
        assert_eq!(r.time_range().unwrap(), Some((0.0, 1.0)));
        let attrs = store.get_attributes("/kiln/T").unwrap();
        assert_eq!(attrs.get("unit").and_then(|v| v.as_str()), Some("celsius"));
        assert_eq!(attrs.get("handle").and_then(|v| v.as_str()), Some("T"));
    }

    #[test]
    fn test_summary_is_interpolated_incrementally() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let r = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, None).unwrap();
        r.append(&series(&[(0.0, 0.0), (2.5, 25.0)])).unwrap();
        let summary = r.summary().unwrap().expect("summary created on append");
        let rows = summary.rows(0..100).unwrap();
        assert_eq!(
            rows,
            series(&[(0.0, 0.0), (1.0, 10.0), (2.0, 20.0)])
        );

        r.append(&series(&[(4.5, 45.0)])).unwrap();
        let rows = summary.rows(0..100).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3], (3.0, RefValue::Number(30.0)));
        assert_eq!(rows[4], (4.0, RefValue::Number(40.0)));
    }

    #[test]
    fn test_single_sample_appends_match_bulk_summary() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let points: Vec<(f64, f64)> = (0..400).map(|i| (i as f64 * 0.3, (i as f64 * 0.1).sin())).collect();

        let bulk = Reference::create(&store, "/kiln", "bulk", ReferenceClass::Array, None).unwrap();
        bulk.append(&series(&points)).unwrap();
        let stepwise = Reference::create(&store, "/kiln", "stepwise", ReferenceClass::Array, None).unwrap();
        for point in &points {
            stepwise.append(&series(&[*point])).unwrap();
        }

        let expected = bulk.summary().unwrap().unwrap().rows(0..usize::MAX).unwrap();
        let actual = stepwise.summary().unwrap().unwrap().rows(0..usize::MAX).unwrap();
        // 0.0 ..= 119.7 at 1 s
        assert_eq!(expected.len(), 120);
        assert_eq!(actual.len(), expected.len());
        for ((ta, va), (te, ve)) in actual.iter().zip(&expected) {
            assert_eq!(ta, te);
            let (va, ve) = (va.as_f64().unwrap(), ve.as_f64().unwrap());
            assert!((va - ve).abs() < 1e-9, "t = {}: {} vs {}", ta, va, ve);
        }
        assert_eq!(stepwise.interpolate(1.0).unwrap(), 0);
    }

    #[test]
    fn test_log_has_no_summary() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let r = Reference::create(&store, "/", "log", ReferenceClass::Log, None).unwrap();
        let entry = LogEntry { priority: 20, message: "start".into() };
        r.append(&[(0.0, RefValue::Log(entry))]).unwrap();
        assert_eq!(r.interpolate(1.0).unwrap(), 0);
        assert!(r.summary().unwrap().is_none());
        assert!(!store.has_node("/summary/log"));
    }

    #[test]
    fn test_rewrite_needs_a_version() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let r = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, None).unwrap();
        r.append(&series(&[(0.0, 1.0)])).unwrap();
        assert!(matches!(r.rewrite(&series(&[(0.0, 2.0)])), Err(StoreError::ReadOnlyVersion(_))));
    }

    #[test]
    fn test_rewrite_overrides_in_branch_only() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let r = Reference::create(&store, "/kiln", "T", ReferenceClass::Array, None).unwrap();
        r.append(&series(&[(0.0, 1.0), (1.0, 1.0)])).unwrap();
        store.create_version("fix").unwrap();
        assert_eq!(r.rewrite(&series(&[(0.0, 5.0), (1.0, 7.0)])).unwrap(), 2);
        assert_eq!(r.get(1).unwrap(), Some((1.0, RefValue::Number(7.0))));
        let summary = r.summary().unwrap().unwrap();
        assert_eq!(summary.path(), "/ver_1/summary/kiln/T");
        assert_eq!(summary.len().unwrap(), 2);

        store.set_active_version("").unwrap();
        assert_eq!(r.get(1).unwrap(), Some((1.0, RefValue::Number(1.0))));
    }

    #[test]
    fn test_bitmap_passthrough_for_plain_blobs() {
        let dir = tempdir().unwrap();
        let store = new_store(dir.path());
        let r = Reference::create(&store, "/cam", "raw", ReferenceClass::Binary, None).unwrap();
        r.append(&[(0.0, RefValue::Binary(b"not a bitmap".to_vec()))]).unwrap();
        assert_eq!(r.bitmap(0).unwrap(), Some(b"not a bitmap".to_vec()));
        assert_eq!(r.bitmap(5).unwrap(), None);
    }

    #[test]
    fn test_resample_clamps_and_interpolates() {
        let pts = [(0.0, 0.0), (10.0, 100.0)];
        let out = resample(&pts, 0.0, 10.0, 5.0);
        assert_eq!(out, series(&[(0.0, 0.0), (5.0, 50.0), (10.0, 100.0)]));
        let single = resample(&[(3.0, 7.0)], 3.0, 3.0, 1.0);
        assert_eq!(single, series(&[(3.0, 7.0)]));
    }
}
