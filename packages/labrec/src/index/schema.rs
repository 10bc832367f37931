//! Static index schema.
//!
//! Every option storage kind has its own fixed table; nothing is added at
//! runtime. All option tables are unique on `(uid, version, fullpath,
//! handle)` so re-indexing replaces rows instead of duplicating them.

use rusqlite::Connection;

use crate::conf::IndexKind;
use crate::error::Result;

/// Tables holding rows keyed by a record UID.
pub const UID_TABLES: [&str; 8] = [
    "test",
    "option_Float",
    "option_Integer",
    "option_Boolean",
    "option_String",
    "option_Meta",
    "versions",
    "plots",
];

const VIEWS: [&str; 2] = ["test_view", "sample_shapes"];

pub fn option_table(kind: IndexKind) -> &'static str {
    match kind {
        IndexKind::Float => "option_Float",
        IndexKind::Integer => "option_Integer",
        IndexKind::Boolean => "option_Boolean",
        IndexKind::String => "option_String",
        IndexKind::Meta => "option_Meta",
    }
}

const TABLES_SQL: &str = "
CREATE TABLE IF NOT EXISTS test (
    file TEXT NOT NULL,
    serial TEXT,
    uid TEXT PRIMARY KEY,
    id INTEGER,
    zerotime REAL,
    instrument TEXT,
    flavour TEXT,
    name TEXT,
    elapsed REAL,
    nSamples INTEGER,
    comment TEXT,
    verify INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_test_file ON test(file);

CREATE TABLE IF NOT EXISTS errors (
    file TEXT UNIQUE,
    error TEXT,
    time REAL
);

CREATE TABLE IF NOT EXISTS incremental_ids (
    incremental_id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS modify_dates (
    modify_date REAL,
    file TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS option_Float (
    uid TEXT NOT NULL, version TEXT NOT NULL, fullpath TEXT NOT NULL, handle TEXT NOT NULL,
    current REAL,
    UNIQUE(uid, version, fullpath, handle)
);
CREATE TABLE IF NOT EXISTS option_Integer (
    uid TEXT NOT NULL, version TEXT NOT NULL, fullpath TEXT NOT NULL, handle TEXT NOT NULL,
    current INTEGER,
    UNIQUE(uid, version, fullpath, handle)
);
CREATE TABLE IF NOT EXISTS option_Boolean (
    uid TEXT NOT NULL, version TEXT NOT NULL, fullpath TEXT NOT NULL, handle TEXT NOT NULL,
    current INTEGER,
    UNIQUE(uid, version, fullpath, handle)
);
CREATE TABLE IF NOT EXISTS option_String (
    uid TEXT NOT NULL, version TEXT NOT NULL, fullpath TEXT NOT NULL, handle TEXT NOT NULL,
    current TEXT,
    UNIQUE(uid, version, fullpath, handle)
);
CREATE TABLE IF NOT EXISTS option_Meta (
    uid TEXT NOT NULL, version TEXT NOT NULL, fullpath TEXT NOT NULL, handle TEXT NOT NULL,
    meta_value REAL, meta_time REAL, meta_temp REAL,
    UNIQUE(uid, version, fullpath, handle)
);

CREATE TABLE IF NOT EXISTS versions (
    uid TEXT NOT NULL,
    version TEXT NOT NULL,
    name TEXT,
    date TEXT,
    active INTEGER NOT NULL DEFAULT 0,
    UNIQUE(uid, version)
);

CREATE TABLE IF NOT EXISTS plots (
    hash TEXT,
    uid TEXT NOT NULL,
    version TEXT NOT NULL,
    node TEXT NOT NULL,
    name TEXT,
    date TEXT,
    script TEXT,
    render BLOB,
    format TEXT,
    UNIQUE(uid, version, node)
);
";

// Tests with the metadata of their active version, and the characteristic
// shapes (Meta options of `sampleN` objects) of each active version.
const VIEWS_SQL: &str = "
CREATE VIEW test_view AS
    SELECT test.*, versions.version AS active_version, versions.name AS version_name,
           versions.date AS version_date
    FROM test
    LEFT JOIN versions ON versions.uid = test.uid AND versions.active = 1;

CREATE VIEW sample_shapes AS
    SELECT m.uid AS uid, m.version AS version, m.fullpath AS sample, m.handle AS shape,
           m.meta_value AS value, m.meta_time AS time, m.meta_temp AS temperature
    FROM option_Meta m
    JOIN versions v ON v.uid = m.uid AND v.version = m.version AND v.active = 1
    WHERE m.fullpath GLOB '*/sample[0-9]*/';
";

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLES_SQL)?;
    Ok(())
}

/// Drop and recreate both views.
pub fn create_views(conn: &Connection) -> Result<()> {
    for view in VIEWS {
        conn.execute_batch(&format!("DROP VIEW IF EXISTS {};", view))?;
    }
    conn.execute_batch(VIEWS_SQL)?;
    Ok(())
}

/// Drop every view and table.
pub fn drop_all(conn: &Connection) -> Result<()> {
    for view in VIEWS {
        conn.execute_batch(&format!("DROP VIEW IF EXISTS {};", view))?;
    }
    for table in UID_TABLES.iter().chain(["errors", "incremental_ids", "modify_dates"].iter()) {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
    }
    Ok(())
}

/// Copy stable display ids from `incremental_ids` into `test`.
pub fn renumber(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE test SET id = (SELECT incremental_id FROM incremental_ids
                               WHERE incremental_ids.uid = test.uid)",
        [],
    )?;
    Ok(())
}
