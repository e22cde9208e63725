//! Change bookkeeping for the file tracker.
//!
//! [`PendingChanges`] collects paths reported asynchronously (watcher callbacks
//! may fire mid-run). [`WatchedFileSet`] is the poll strategy's view of the
//! world: a `{path, mtime}` table diffed against its predecessor.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Deduplicated list of changed paths, guarded by its own lock.
///
/// Independent of the execution lock: producers never wait for a run.
#[derive(Debug, Default)]
pub struct PendingChanges {
    paths: Mutex<Vec<PathBuf>>,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append paths in arrival order. Duplicates are tolerated here and
    /// removed on [`PendingChanges::drain`].
    pub fn extend<I: IntoIterator<Item = PathBuf>>(&self, paths: I) {
        self.paths.lock().extend(paths);
    }

    /// Take every pending path, first occurrence wins, leaving the set empty.
    pub fn drain(&self) -> Vec<PathBuf> {
        let taken = std::mem::take(&mut *self.paths.lock());
        dedup_preserving_order(taken)
    }

    /// Put paths back ahead of anything that arrived since they were drained.
    pub fn requeue(&self, paths: Vec<PathBuf>) {
        let mut pending = self.paths.lock();
        let newer = std::mem::replace(&mut *pending, paths);
        pending.extend(newer);
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }
}

/// Remove repeated paths while keeping detection order.
pub fn dedup_preserving_order(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

/// Snapshot of tracked files and their last-modified timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchedFileSet {
    entries: BTreeMap<PathBuf, SystemTime>,
}

impl WatchedFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf, modified: SystemTime) {
        self.entries.insert(path, modified);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths added or modified in `next` relative to `self`, in path order.
    ///
    /// Removals are not reported: there is nothing to reload for them.
    pub fn changed_in(&self, next: &WatchedFileSet) -> Vec<PathBuf> {
        next.entries
            .iter()
            .filter(|(path, modified)| self.entries.get(*path) != Some(*modified))
            .map(|(path, _)| path.clone())
            .collect()
    }
}
