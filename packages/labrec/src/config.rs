//! Store and indexer configuration.
//!
//! Both structs are plain serde records with defaults, readable from and
//! writable to JSON files next to the data they configure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ── Store Config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Bounded wait for the per-store mutex and for the write lock of a
    /// read-write open.
    pub lock_timeout_ms: u64,
    /// Poll interval while another writer holds the record.
    pub lock_poll_ms: u64,
    /// Time step of summary mirrors, in seconds.
    pub summary_step: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            lock_poll_ms: 20,
            summary_step: 1.0,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}

// ── Indexer Config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexerConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Directories scanned for record files.
    pub paths: Vec<PathBuf>,
    /// Extension of record files, without the dot.
    pub extension: String,
    /// Bounded wait for the cross-process lock.
    pub lock_timeout_ms: u64,
    /// A lock sentinel older than this is considered orphaned.
    pub stale_lock_ms: u64,
    /// Poll interval while waiting for the lock sentinel.
    pub lock_poll_ms: u64,
    /// Snapshot the database to `<database>.backup` on every lock release.
    pub copy_on_lock: bool,
    /// Operations longer than this run `PRAGMA optimize` before closing.
    pub optimize_after_ms: u64,
    /// Store settings used when the indexer opens record files.
    pub store: StoreConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("labrec.sqlite"),
            paths: Vec::new(),
            extension: "rec".to_string(),
            lock_timeout_ms: 30_000,
            stale_lock_ms: 120_000,
            lock_poll_ms: 50,
            copy_on_lock: false,
            optimize_after_ms: 2_000,
            store: StoreConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Config for a database, scanning the database directory itself.
    pub fn for_database(database: &Path) -> Self {
        let root = database
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            database: database.to_path_buf(),
            paths: vec![root],
            ..Self::default()
        }
    }

    /// Directory relative file paths are stored against.
    pub fn database_dir(&self) -> PathBuf {
        self.database
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_lock(&self) -> Duration {
        Duration::from_millis(self.stale_lock_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }

    /// Read config from a JSON file. Returns None if the file doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
