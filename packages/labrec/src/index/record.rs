//! Denormalized `test` row.
//!
//! Where the metadata lives in a record's configuration:
//! ```text
//! /                      instrument (String), eq_sn (String)
//! /<instrument>/         sample0, sample1, ... child objects
//! /<instrument>/measure/ name, comment, elapsed, zerotime, flavour,
//!                        nSamples (optional), uid (fallback)
//! ```

use rusqlite::Row;
use serde::Serialize;

use crate::conf::{ConfNode, OptionValue};
use crate::error::{Result, StoreError};
use crate::signature::Signer;
use crate::store::RecordStore;

pub const INSTRUMENT_OPTION: &str = "instrument";
pub const SERIAL_OPTION: &str = "eq_sn";
const MEASURE_OBJECT: &str = "measure";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestRecord {
    /// Relative to the index database directory when possible.
    pub file: String,
    pub serial: String,
    pub uid: String,
    /// Display id, stable across re-indexing of the same UID.
    pub id: i64,
    pub zerotime: f64,
    pub instrument: String,
    pub flavour: String,
    pub name: String,
    pub elapsed: f64,
    pub n_samples: i64,
    pub comment: String,
    pub verify: bool,
}

/// Object holding the measure options, e.g. `/hsm/measure`.
pub fn measure_path(conf: &ConfNode) -> Option<String> {
    let instrument = conf.get("/", INSTRUMENT_OPTION)?.as_str()?;
    if instrument.is_empty() {
        return None;
    }
    Some(format!("/{}/{}", instrument, MEASURE_OBJECT))
}

fn is_sample_name(name: &str) -> bool {
    name.strip_prefix("sample")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl TestRecord {
    /// Build the row for `store` from its active configuration.
    pub fn extract(
        store: &RecordStore,
        conf: &ConfNode,
        file: String,
        verifier: Option<&dyn Signer>,
    ) -> Result<Self> {
        let text = |path: &str, handle: &str| {
            conf.get(path, handle)
                .and_then(OptionValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let number = |path: &str, handle: &str| conf.get(path, handle).and_then(OptionValue::as_f64);

        let instrument = text("/", INSTRUMENT_OPTION);
        let measure = measure_path(conf).unwrap_or_else(|| format!("/{}", MEASURE_OBJECT));

        let uid = match store.uid()? {
            Some(uid) if !uid.is_empty() => uid,
            _ => text(&measure, "uid"),
        };
        if uid.is_empty() {
            return Err(StoreError::InvalidFormat(format!("{} has no uid", file)));
        }

        let n_samples = match conf.get(&measure, "nSamples").and_then(OptionValue::as_i64) {
            Some(n) => n,
            None => conf
                .child(&format!("/{}", instrument))
                .map(|node| node.children.keys().filter(|k| is_sample_name(k)).count() as i64)
                .unwrap_or(0),
        };

        let verify = match verifier {
            Some(signer) if store.is_signed()? => store.verify(signer)?,
            _ => false,
        };

        Ok(Self {
            file,
            serial: text("/", SERIAL_OPTION),
            uid,
            id: 0,
            zerotime: number(&measure, "zerotime").unwrap_or(0.0),
            flavour: text(&measure, "flavour"),
            name: text(&measure, "name"),
            elapsed: number(&measure, "elapsed").unwrap_or(0.0),
            n_samples,
            comment: text(&measure, "comment"),
            verify,
            instrument,
        })
    }

    /// Row in [`super::query::select_columns`] order.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            file: row.get(0)?,
            serial: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            uid: row.get(2)?,
            id: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
            zerotime: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
            instrument: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            flavour: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            elapsed: row.get::<_, Option<f64>>(8)?.unwrap_or_default(),
            n_samples: row.get::<_, Option<i64>>(9)?.unwrap_or_default(),
            comment: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            verify: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod record_tests {
    use super::*;
    use crate::conf::{ConfOption, OptionType};
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    fn conf() -> ConfNode {
        ConfNode::new()
            .with_option(ConfOption::new(INSTRUMENT_OPTION, OptionType::String, "hsm"))
            .with_option(ConfOption::new(SERIAL_OPTION, OptionType::String, "SN42"))
            .with_child(
                "hsm",
                ConfNode::new()
                    .with_child("sample0", ConfNode::new())
                    .with_child("sample1", ConfNode::new())
                    .with_child("samples", ConfNode::new())
                    .with_child(
                        "measure",
                        ConfNode::new()
                            .with_option(ConfOption::new("name", OptionType::String, "glass"))
                            .with_option(ConfOption::new("elapsed", OptionType::Float, 360.0))
                            .with_option(ConfOption::new("zerotime", OptionType::Time, 1.7e9)),
                    ),
            )
    }

    #[test]
    fn test_extract_reads_measure_options() {
        let dir = tempdir().unwrap();
        let store = RecordStore::create(&dir.path().join("a.rec"), Some("U1"), StoreConfig::default()).unwrap();
        let rec = TestRecord::extract(&store, &conf(), "a.rec".into(), None).unwrap();
        assert_eq!(rec.uid, "U1");
        assert_eq!(rec.instrument, "hsm");
        assert_eq!(rec.serial, "SN42");
        assert_eq!(rec.name, "glass");
        assert_eq!(rec.elapsed, 360.0);
        assert_eq!(rec.n_samples, 2);
        assert!(!rec.verify);
        assert_eq!(measure_path(&conf()).as_deref(), Some("/hsm/measure"));
    }

    #[test]
    fn test_sample_names() {
        assert!(is_sample_name("sample12"));
        assert!(!is_sample_name("sample"));
        assert!(!is_sample_name("samples"));
    }
}
