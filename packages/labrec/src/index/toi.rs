//! Table of options: every option of every version, routed by storage kind
//! into its fixed `option_<Kind>` table.

use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use super::schema::{option_table, UID_TABLES};
use crate::conf::{ConfNode, ConfOption, IndexKind, OptionValue};
use crate::error::{Result, StoreError};
use crate::store::RecordStore;

/// A value ready for binding, already checked against its table's type.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Float(f64),
    Integer(i64),
    Text(String),
    Meta(Option<f64>, Option<f64>, Option<f64>),
}

fn cell(kind: IndexKind, value: &OptionValue) -> Option<Cell> {
    match kind {
        IndexKind::Float => value.as_f64().map(Cell::Float),
        IndexKind::Integer => value.as_i64().map(Cell::Integer),
        IndexKind::Boolean => value.as_bool().map(|b| Cell::Integer(b as i64)),
        IndexKind::String => value.as_str().map(|s| Cell::Text(s.to_string())),
        IndexKind::Meta => value.as_meta().map(|m| Cell::Meta(m.value, m.time, m.temp)),
    }
}

/// `(kind, fullpath, handle, cell)` for each indexable option.
fn collect(conf: &ConfNode) -> Vec<(IndexKind, String, String, Cell)> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    conf.walk(&mut |fullpath: &str, option: &ConfOption| {
        let routed = option
            .kind
            .index_kind()
            .and_then(|kind| cell(kind, &option.current).map(|c| (kind, c)));
        match routed {
            Some((kind, c)) => out.push((kind, fullpath.to_string(), option.handle.clone(), c)),
            None => skipped += 1,
        }
    });
    if skipped > 0 {
        debug!(skipped, "options without an index table");
    }
    out
}

fn write_cell(conn: &Connection, uid: &str, version: &str, kind: IndexKind, fullpath: &str, handle: &str, c: &Cell) -> Result<()> {
    let table = option_table(kind);
    match c {
        Cell::Meta(value, time, temp) => {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (uid, version, fullpath, handle, meta_value, meta_time, meta_temp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    table
                ),
                params![uid, version, fullpath, handle, value, time, temp],
            )?;
        }
        Cell::Float(_) | Cell::Integer(_) | Cell::Text(_) => {
            let current = match c {
                Cell::Float(v) => Value::Real(*v),
                Cell::Integer(v) => Value::Integer(*v),
                Cell::Text(v) => Value::Text(v.clone()),
                Cell::Meta(..) => Value::Null,
            };
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (uid, version, fullpath, handle, current) VALUES (?1, ?2, ?3, ?4, ?5)",
                    table
                ),
                params![uid, version, fullpath, handle, current],
            )?;
        }
    }
    Ok(())
}

/// Index every version of `store` under `uid`. Returns the number of option
/// rows written.
pub fn index_store(conn: &Connection, store: &RecordStore, uid: &str) -> Result<usize> {
    let mut written = 0;
    for version in store.list_versions()? {
        let conf = match store.load_conf(Some(&version.path)) {
            Ok(conf) => Some(conf),
            Err(StoreError::NodeNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(conf) = conf {
            for (kind, fullpath, handle, c) in collect(&conf) {
                write_cell(conn, uid, &version.path, kind, &fullpath, &handle, &c)?;
                written += 1;
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO versions (uid, version, name, date, active) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![uid, version.path, version.name, version.date, version.active],
        )?;

        for plot in store.list_plots(&version.path)? {
            let hash = blake3::hash(plot.script.as_bytes()).to_hex().to_string();
            conn.execute(
                "INSERT OR REPLACE INTO plots (hash, uid, version, node, name, date, script, render, format)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![hash, uid, version.path, plot.node, plot.title, plot.date, plot.script, plot.render, plot.format],
            )?;
        }
    }
    debug!(uid, rows = written, "options indexed");
    Ok(written)
}

/// Drop the option, version and plot rows of `uid`, keeping its `test` row.
pub fn purge_options(conn: &Connection, uid: &str) -> Result<usize> {
    let mut removed = 0;
    for table in UID_TABLES.iter().filter(|t| **t != "test") {
        removed += conn.execute(&format!("DELETE FROM {} WHERE uid = ?1", table), [uid])?;
    }
    Ok(removed)
}

/// Drop every row of `uid`. Its display id in `incremental_ids` survives.
pub fn purge_uid(conn: &Connection, uid: &str) -> Result<usize> {
    let removed = purge_options(conn, uid)?;
    Ok(removed + conn.execute("DELETE FROM test WHERE uid = ?1", [uid])?)
}
