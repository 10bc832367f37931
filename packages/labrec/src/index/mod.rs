//! SQLite index over a directory tree of record files.
//!
//! Every externally visible call opens its own connection under the
//! cross-process [`DirLock`] and drops both before returning, so the index
//! can be shared by threads and processes without a long-lived handle.
//!
//! ```text
//! rebuild:  drop tables ─► scan files ─► index each (errors recorded)
//!           ─► renumber ids ─► views ─► PRAGMA optimize
//! refresh:  purge missing ─► purge modified ─► add new ─► views ─► optimize
//! ```

pub mod progress;
pub mod query;
pub mod record;
pub mod schema;
pub mod toi;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::conf::OptionValue;
use crate::config::IndexerConfig;
use crate::container::AccessMode;
use crate::error::{Result, StoreError};
use crate::lock::{DirLock, DirLockGuard, LockOptions};
use crate::signature::Signer;
use crate::store::{RecordStore, UidResolver};

pub use progress::{AbortFlag, NoProgress, Progress, ScanReport};
pub use query::{Column, Combine, QueryParams};
pub use record::{measure_path, TestRecord};

const REBUILD: &str = "Rebuilding index";
const PURGE_MISSING: &str = "Removing deleted files";
const PURGE_MODIFIED: &str = "Removing modified files";
const ADD_NEW: &str = "Adding new files";

/// One row of the `errors` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexError {
    pub file: String,
    pub error: String,
    pub time: f64,
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn modify_date(path: &Path) -> Result<f64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64())
}

/// Drop every row belonging to `file`. Returns the number of tests removed.
fn purge_file(conn: &Connection, file: &str) -> Result<usize> {
    let uids: Vec<String> = conn
        .prepare("SELECT uid FROM test WHERE file = ?1")?
        .query_map([file], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    for uid in &uids {
        toi::purge_uid(conn, uid)?;
    }
    conn.execute("DELETE FROM modify_dates WHERE file = ?1", [file])?;
    conn.execute("DELETE FROM errors WHERE file = ?1", [file])?;
    Ok(uids.len())
}

fn relative_to(base: &Path, path: &Path) -> String {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    path.strip_prefix(base)
        .unwrap_or(&path)
        .to_string_lossy()
        .into_owned()
}

fn strings(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let out = conn
        .prepare(sql)?
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(out)
}

// ── Session ────────────────────────────────────────────────────────

/// Connection plus lock for the span of one call. The connection closes
/// before the lock is released.
struct IndexSession<'a> {
    conn: Connection,
    started: Instant,
    optimize_after: Duration,
    _guard: DirLockGuard<'a>,
}

impl Drop for IndexSession<'_> {
    fn drop(&mut self) {
        if self.started.elapsed() >= self.optimize_after {
            if let Err(e) = self.conn.execute_batch("PRAGMA optimize;") {
                warn!(error = %e, "PRAGMA optimize failed");
            }
        }
    }
}

// ── Indexer ────────────────────────────────────────────────────────

pub struct Indexer {
    config: IndexerConfig,
    lock: DirLock,
    abort: AbortFlag,
    verifier: Option<Box<dyn Signer>>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("database", &self.config.database)
            .field("paths", &self.config.paths)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        let lock = DirLock::new(&config.database, LockOptions::from(&config));
        Self {
            config,
            lock,
            abort: AbortFlag::new(),
            verifier: None,
        }
    }

    /// Index `database`, scanning the directory it lives in.
    pub fn open(database: &Path) -> Self {
        Self::new(IndexerConfig::for_database(database))
    }

    /// Check signatures of indexed files with `verifier`.
    pub fn with_verifier(mut self, verifier: Box<dyn Signer>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Flag polled between files by scans. Aborting makes the running scan
    /// return early with `ScanReport::aborted` set.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    fn session(&self) -> Result<IndexSession<'_>> {
        let guard = self.lock.acquire()?;
        let conn = Connection::open(&self.config.database)?;
        conn.busy_timeout(self.config.lock_timeout())?;
        schema::create_tables(&conn)?;
        Ok(IndexSession {
            conn,
            started: Instant::now(),
            optimize_after: Duration::from_millis(self.config.optimize_after_ms),
            _guard: guard,
        })
    }

    // ── Paths ──────────────────────────────────────────────────────

    fn base_dir(&self) -> PathBuf {
        let dir = self.config.database_dir();
        let dir = if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir };
        dir.canonicalize().unwrap_or(dir)
    }

    /// Form stored in the index: relative to the database directory when the
    /// file lives below it, absolute otherwise.
    fn relative(&self, path: &Path) -> String {
        relative_to(&self.base_dir(), path)
    }

    fn absolute(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Record files under the search roots, oldest first.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for root in &self.config.paths {
            for entry in WalkDir::new(root).follow_links(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "skipping unreadable entry");
                        continue;
                    }
                };
                let is_record = entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case(&self.config.extension));
                if !is_record {
                    continue;
                }
                let stamp = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.created().or_else(|_| m.modified()).ok())
                    .unwrap_or(UNIX_EPOCH);
                found.push((stamp, entry.into_path()));
            }
        }
        found.sort();
        found.dedup_by(|a, b| a.1 == b.1);
        found.into_iter().map(|(_, path)| path).collect()
    }

    // ── Indexing ───────────────────────────────────────────────────

    /// Index one file: its `test` row, its options and its bookkeeping rows,
    /// all in one transaction.
    fn index_one(&self, conn: &mut Connection, path: &Path) -> Result<TestRecord> {
        if !path.is_file() {
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        let file = self.relative(path);
        let mtime = modify_date(path)?;
        let store = RecordStore::open(path, AccessMode::ReadOnly, self.config.store.clone())?;
        let conf = store.load_conf(None)?;
        let mut record = TestRecord::extract(&store, &conf, file.clone(), self.verifier.as_deref())?;

        let tx = conn.transaction()?;
        purge_file(&tx, &file)?;
        toi::purge_uid(&tx, &record.uid)?;
        tx.execute("INSERT OR IGNORE INTO incremental_ids (uid) VALUES (?1)", [&record.uid])?;
        record.id = tx.query_row(
            "SELECT incremental_id FROM incremental_ids WHERE uid = ?1",
            [&record.uid],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO test
                 (file, serial, uid, id, zerotime, instrument, flavour, name, elapsed, nSamples, comment, verify)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.file,
                record.serial,
                record.uid,
                record.id,
                record.zerotime,
                record.instrument,
                record.flavour,
                record.name,
                record.elapsed,
                record.n_samples,
                record.comment,
                record.verify,
            ],
        )?;
        toi::index_store(&tx, &store, &record.uid)?;
        tx.execute(
            "INSERT OR REPLACE INTO modify_dates (modify_date, file) VALUES (?1, ?2)",
            params![mtime, file],
        )?;
        tx.commit()?;
        debug!(file = %record.file, uid = %record.uid, id = record.id, "file indexed");
        Ok(record)
    }

    /// Remember a failed file so the next refresh skips it until it changes.
    fn record_error(&self, conn: &Connection, path: &Path, error: &StoreError) -> Result<()> {
        let file = self.relative(path);
        warn!(file = %file, code = error.code(), error = %error, "indexing failed");
        conn.execute(
            "INSERT OR REPLACE INTO errors (file, error, time) VALUES (?1, ?2, ?3)",
            params![file, format!("{}: {}", error.code(), error), now_seconds()],
        )?;
        if let Ok(mtime) = modify_date(path) {
            conn.execute(
                "INSERT OR REPLACE INTO modify_dates (modify_date, file) VALUES (?1, ?2)",
                params![mtime, file],
            )?;
        }
        Ok(())
    }

    fn add_files(
        &self,
        conn: &mut Connection,
        files: &[PathBuf],
        progress: &mut dyn Progress,
        label: &str,
        report: &mut ScanReport,
    ) -> Result<()> {
        progress.jobs(files.len(), label, &self.abort);
        for (i, path) in files.iter().enumerate() {
            if self.abort.is_aborted() {
                info!(done = i, total = files.len(), "scan aborted");
                report.aborted = true;
                break;
            }
            progress.job(i, label, &path.display().to_string());
            match self.index_one(conn, path) {
                Ok(_) => report.processed += 1,
                Err(StoreError::FileNotFound(_)) => {
                    debug!(file = %path.display(), "file vanished during scan");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.record_error(conn, path, &e)?;
                    report.failed += 1;
                }
            }
        }
        progress.done(label);
        Ok(())
    }

    fn finish(conn: &Connection) -> Result<()> {
        schema::renumber(conn)?;
        schema::create_views(conn)?;
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    /// Drop the index and rebuild it from every record file under the
    /// search roots. An abort requested before the scan starts, even while
    /// it waits for the lock, stops it before the first file; the flag is
    /// cleared once the scan ends.
    pub fn rebuild(&self, progress: &mut dyn Progress) -> Result<ScanReport> {
        let result = self.rebuild_locked(progress);
        self.abort.reset();
        result
    }

    fn rebuild_locked(&self, progress: &mut dyn Progress) -> Result<ScanReport> {
        let mut session = self.session()?;
        schema::drop_all(&session.conn)?;
        schema::create_tables(&session.conn)?;

        let files = self.candidates();
        let mut report = ScanReport::default();
        self.add_files(&mut session.conn, &files, progress, REBUILD, &mut report)?;
        Self::finish(&session.conn)?;
        info!(
            database = %self.config.database.display(),
            processed = report.processed,
            failed = report.failed,
            aborted = report.aborted,
            "index rebuilt"
        );
        Ok(report)
    }

    /// Bring the index up to date with the filesystem: forget deleted files,
    /// re-index modified ones and add new ones.
    pub fn refresh(&self, progress: &mut dyn Progress) -> Result<ScanReport> {
        let result = self.refresh_locked(progress);
        self.abort.reset();
        result
    }

    fn refresh_locked(&self, progress: &mut dyn Progress) -> Result<ScanReport> {
        let mut session = self.session()?;
        let mut report = ScanReport::default();

        let known = strings(&session.conn, "SELECT file FROM modify_dates UNION SELECT file FROM test")?;
        progress.jobs(known.len(), PURGE_MISSING, &self.abort);
        for (i, file) in known.iter().enumerate() {
            if self.abort.is_aborted() {
                report.aborted = true;
                break;
            }
            progress.job(i, PURGE_MISSING, file);
            if !self.absolute(file).exists() {
                debug!(file = %file, "file vanished");
                report.purged += purge_file(&session.conn, file)?;
            }
        }
        progress.done(PURGE_MISSING);

        if !report.aborted {
            let dated: Vec<(String, f64)> = session
                .conn
                .prepare("SELECT file, modify_date FROM modify_dates")?
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?;
            progress.jobs(dated.len(), PURGE_MODIFIED, &self.abort);
            for (i, (file, stored)) in dated.iter().enumerate() {
                if self.abort.is_aborted() {
                    report.aborted = true;
                    break;
                }
                progress.job(i, PURGE_MODIFIED, file);
                match modify_date(&self.absolute(file)) {
                    Ok(current) if current == *stored => {}
                    _ => {
                        debug!(file = %file, "file modified");
                        report.purged += purge_file(&session.conn, file)?;
                    }
                }
            }
            progress.done(PURGE_MODIFIED);
        }

        if !report.aborted {
            let indexed: HashSet<String> = strings(&session.conn, "SELECT file FROM modify_dates")?
                .into_iter()
                .collect();
            let base = self.base_dir();
            let fresh: Vec<PathBuf> = self
                .candidates()
                .into_iter()
                .filter(|p| !indexed.contains(&relative_to(&base, p)))
                .collect();
            self.add_files(&mut session.conn, &fresh, progress, ADD_NEW, &mut report)?;
        }

        Self::finish(&session.conn)?;
        info!(
            database = %self.config.database.display(),
            processed = report.processed,
            failed = report.failed,
            purged = report.purged,
            aborted = report.aborted,
            "index refreshed"
        );
        Ok(report)
    }

    /// Index one new or changed file. A failure is recorded in the `errors`
    /// table and returned.
    pub fn append_file(&self, path: &Path) -> Result<TestRecord> {
        let mut session = self.session()?;
        match self.index_one(&mut session.conn, path) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.record_error(&session.conn, path, &e)?;
                Err(e)
            }
        }
    }

    /// Rewrite only the option, version and plot rows of one file. Returns
    /// the number of option rows written.
    pub fn index_file(&self, path: &Path) -> Result<usize> {
        let mut session = self.session()?;
        let store = RecordStore::open(path, AccessMode::ReadOnly, self.config.store.clone())?;
        let conf = store.load_conf(None)?;
        let record = TestRecord::extract(&store, &conf, self.relative(path), None)?;
        let tx = session.conn.transaction()?;
        toi::purge_options(&tx, &record.uid)?;
        let written = toi::index_store(&tx, &store, &record.uid)?;
        tx.commit()?;
        Ok(written)
    }

    /// Forget `path`. Returns false when it was not indexed.
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        let session = self.session()?;
        let file = self.relative(path);
        let known: Option<String> = session
            .conn
            .query_row("SELECT file FROM modify_dates WHERE file = ?1", [&file], |r| r.get(0))
            .optional()?;
        let removed = purge_file(&session.conn, &file)?;
        Ok(removed > 0 || known.is_some())
    }

    /// Empty the index without scanning.
    pub fn clear(&self) -> Result<()> {
        let session = self.session()?;
        schema::drop_all(&session.conn)?;
        schema::create_tables(&session.conn)?;
        schema::create_views(&session.conn)?;
        info!(database = %self.config.database.display(), "index cleared");
        Ok(())
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Indexed file of `uid`, as stored. A row whose file no longer exists
    /// is purged and reported as not found.
    pub fn search_uid(&self, uid: &str) -> Result<Option<String>> {
        let session = self.session()?;
        let file: Option<String> = session
            .conn
            .query_row("SELECT file FROM test WHERE uid = ?1", [uid], |r| r.get(0))
            .optional()?;
        match file {
            Some(file) if self.absolute(&file).exists() => Ok(Some(file)),
            Some(file) => {
                warn!(uid = %uid, file = %file, "indexed file vanished, purging");
                purge_file(&session.conn, &file)?;
                toi::purge_uid(&session.conn, uid)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn query(&self, params: &QueryParams) -> Result<Vec<TestRecord>> {
        let (sql, values) = query::build(params)?;
        let session = self.session()?;
        let mut stmt = session.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), TestRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of indexed tests.
    pub fn get_len(&self) -> Result<usize> {
        let session = self.session()?;
        let n: i64 = session.conn.query_row("SELECT COUNT(*) FROM test", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Newest tests first.
    pub fn list_tests(&self, limit: i64, offset: i64) -> Result<Vec<TestRecord>> {
        self.query(&QueryParams::new().page(limit, offset))
    }

    pub fn errors(&self) -> Result<Vec<IndexError>> {
        let session = self.session()?;
        let mut stmt = session.conn.prepare("SELECT file, error, time FROM errors ORDER BY time, file")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(IndexError {
                    file: r.get(0)?,
                    error: r.get(1)?,
                    time: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Edits ──────────────────────────────────────────────────────

    /// Apply `edit` to the record of `uid`, branching off a new version when
    /// the original is active, then re-index the file.
    fn edit_record<F>(&self, uid: &str, edit: F) -> Result<TestRecord>
    where
        F: Fn(&RecordStore) -> Result<()>,
    {
        let path = self
            .resolve_uid(uid)?
            .ok_or_else(|| StoreError::UidNotFound(uid.to_string()))?;
        {
            let store = RecordStore::open(&path, AccessMode::ReadWrite, self.config.store.clone())?;
            match edit(&store) {
                Err(StoreError::ReadOnlyVersion(_)) => {
                    let name = format!("Modified {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
                    store.create_version(&name)?;
                    edit(&store)?;
                }
                other => other?,
            }
            store.close()?;
        }
        self.append_file(&path)
    }

    pub fn change_option(
        &self,
        uid: &str,
        fullpath: &str,
        handle: &str,
        value: impl Into<OptionValue>,
    ) -> Result<TestRecord> {
        let value = value.into();
        self.edit_record(uid, |store| store.set_option(fullpath, handle, value.clone()))
    }

    fn change_measure(&self, uid: &str, handle: &str, value: &str) -> Result<TestRecord> {
        self.edit_record(uid, |store| {
            let conf = store.load_conf(None)?;
            let measure = measure_path(&conf)
                .ok_or_else(|| StoreError::OptionNotFound(format!("{}/{}", uid, handle)))?;
            store.set_option(&measure, handle, value)
        })
    }

    pub fn change_name(&self, uid: &str, name: &str) -> Result<TestRecord> {
        self.change_measure(uid, "name", name)
    }

    pub fn change_comment(&self, uid: &str, comment: &str) -> Result<TestRecord> {
        self.change_measure(uid, "comment", comment)
    }
}

impl UidResolver for Indexer {
    fn resolve_uid(&self, uid: &str) -> Result<Option<PathBuf>> {
        Ok(self.search_uid(uid)?.map(|file| self.absolute(&file)))
    }
}
