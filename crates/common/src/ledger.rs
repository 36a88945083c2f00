//! Change ledger: last observed modification time per relative path
//!
//! Shared by the remote watcher, the local poller and manual downloads. All
//! access goes through one async mutex; a caller that needs a filesystem
//! operation and its ledger update to look atomic to the others holds the
//! [`LedgerGuard`] across both.
//!
//! Critical sections in this crate:
//! - watcher put: write file, record its mtime
//! - watcher delete: remove file, drop its record
//! - poller: stat one file, compare with its record, record the new mtime
//! - manual download inside the root: write file, record its mtime
//!
//! Besides the mtime, the ledger remembers which paths are known to have a
//! key in the store. Only those are pruned when a reload after compaction
//! finds their key gone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, MutexGuard};

use crate::keyspace::RelativePath;

/// Cloneable handle to the shared ledger.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    records: Arc<Mutex<Records>>,
}

#[derive(Debug, Default)]
struct Records {
    modified: HashMap<RelativePath, SystemTime>,
    remote: HashSet<RelativePath>,
}

/// Exclusive access to the ledger for the duration of a critical section.
pub struct LedgerGuard<'a> {
    records: MutexGuard<'a, Records>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> LedgerGuard<'_> {
        LedgerGuard {
            records: self.records.lock().await,
        }
    }

    pub async fn get(&self, path: &RelativePath) -> Option<SystemTime> {
        self.lock().await.get(path)
    }

    pub async fn set(&self, path: RelativePath, modified: SystemTime) {
        self.lock().await.set(path, modified);
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl LedgerGuard<'_> {
    pub fn get(&self, path: &RelativePath) -> Option<SystemTime> {
        self.records.modified.get(path).copied()
    }

    pub fn set(&mut self, path: RelativePath, modified: SystemTime) {
        self.records.modified.insert(path, modified);
    }

    /// Drop the record and the remote mark.
    pub fn remove(&mut self, path: &RelativePath) -> Option<SystemTime> {
        self.records.remote.remove(path);
        self.records.modified.remove(path)
    }

    /// Note that `path` has a key in the store.
    pub fn mark_remote(&mut self, path: RelativePath) {
        self.records.remote.insert(path);
    }

    pub fn is_remote(&self, path: &RelativePath) -> bool {
        self.records.remote.contains(path)
    }

    pub fn remote_paths(&self) -> Vec<RelativePath> {
        let mut paths: Vec<_> = self.records.remote.iter().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.records.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.modified.is_empty()
    }
}

/// A file counts as changed only when a previous observation exists and the
/// current modification time is strictly after it.
pub fn has_advanced(previous: Option<SystemTime>, current: SystemTime) -> bool {
    matches!(previous, Some(previous) if current > previous)
}
