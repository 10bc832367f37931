//! Progress reporting and cooperative abort for long scans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort request. Scans poll it between files.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Receives scan progress. `jobs` announces a step with `total` units and
/// hands over the abort flag; `job` reports unit `index`; `done` closes the
/// step.
pub trait Progress {
    fn jobs(&mut self, total: usize, label: &str, abort: &AbortFlag);
    fn job(&mut self, index: usize, label: &str, detail: &str);
    fn done(&mut self, label: &str);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn jobs(&mut self, _total: usize, _label: &str, _abort: &AbortFlag) {}
    fn job(&mut self, _index: usize, _label: &str, _detail: &str) {}
    fn done(&mut self, _label: &str) {}
}

/// Outcome of a rebuild or refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files indexed successfully.
    pub processed: usize,
    /// Files that failed and were recorded in the `errors` table.
    pub failed: usize,
    /// Index rows dropped because their file vanished or changed.
    pub purged: usize,
    /// The scan stopped early on request.
    pub aborted: bool,
}

#[cfg(test)]
mod progress_tests {
    use super::*;

    #[test]
    fn test_abort_flag_is_shared() {
        let flag = AbortFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_aborted());
        clone.abort();
        assert!(flag.is_aborted());
        flag.reset();
        assert!(!clone.is_aborted());
    }
}
