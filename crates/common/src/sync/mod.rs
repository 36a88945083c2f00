//! Reconciliation engine
//!
//! - [`bootstrap`]: one-shot load of every key under the root key
//! - [`watcher`]: remote-to-local, driven by the store's change stream
//! - [`poller`]: local-to-remote, driven by a fixed interval
//! - [`manual`]: operator-triggered single uploads and downloads
//!
//! Per-item failures never abort a loop. They are returned as
//! [`ItemFailure`] values inside the report of the operation that hit them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::keyspace::{key_to_path, KeyspaceError, RelativePath};
use crate::ledger::{ChangeLedger, LedgerGuard};
use crate::mirror::{FsMirror, MirrorError};
use crate::retry::RetryPolicy;
use crate::store::{KvStore, PrefixSnapshot, StoreError};

pub mod bootstrap;
pub mod manual;
pub mod poller;
pub mod watcher;

pub use bootstrap::{bootstrap, reload, BootstrapReport};
pub use manual::{manual_download, manual_upload, DownloadReport};
pub use poller::{CycleReport, LocalPoller, PollerConfig, DEFAULT_POLL_INTERVAL};
pub use watcher::{
    EventOutcome, RemoteWatcher, WatchExhausted, WatchFault, WatchStats, WatchSupervisor,
    WatcherState,
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

/// One item (key or path) that could not be processed.
#[derive(Debug)]
pub struct ItemFailure {
    pub item: String,
    pub error: SyncError,
}

impl ItemFailure {
    pub fn new(item: impl fmt::Display, error: impl Into<SyncError>) -> Self {
        Self {
            item: item.to_string(),
            error: error.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.error)
    }
}

/// Everything the engine's activities share.
#[derive(Debug, Clone)]
pub struct SyncContext {
    store: Arc<dyn KvStore>,
    mirror: FsMirror,
    ledger: ChangeLedger,
    root_key: String,
    retry: RetryPolicy,
}

impl SyncContext {
    pub fn new(store: Arc<dyn KvStore>, mirror: FsMirror, root_key: impl Into<String>) -> Self {
        Self {
            store,
            mirror,
            ledger: ChangeLedger::new(),
            root_key: root_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn mirror(&self) -> &FsMirror {
        &self.mirror
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn root_key(&self) -> &str {
        &self.root_key
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError> {
        self.retry
            .run("get_prefix", || self.store.get_prefix(prefix))
            .await
    }

    pub(crate) async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), StoreError> {
        self.retry
            .run("put", || self.store.put(key, content.clone()))
            .await
    }

    /// Materialize a remote entry and record its modification time.
    ///
    /// The ledger stays locked across the write so the poller can never see
    /// the new mtime without the matching record.
    pub(crate) async fn write_entry(
        &self,
        key: &str,
        value: &[u8],
    ) -> Result<RelativePath, SyncError> {
        let path = key_to_path(key, &self.root_key)?;
        let mut ledger = self.ledger.lock().await;
        match self.mirror.write(&path, value).await {
            Ok(modified) => {
                ledger.set(path.clone(), modified);
                ledger.mark_remote(path.clone());
                Ok(path)
            }
            Err(err) => {
                let absolute = path.under(self.mirror.root());
                self.settle_failed_write(&mut ledger, &err, path.clone(), &absolute)
                    .await;
                if ledger.get(&path).is_some() {
                    ledger.mark_remote(path);
                }
                Err(err.into())
            }
        }
    }

    /// A write that failed midway may already have truncated the file.
    /// Record whatever is on disk now, so the poller never uploads the
    /// partial content as a local change.
    pub(crate) async fn settle_failed_write(
        &self,
        ledger: &mut LedgerGuard<'_>,
        err: &MirrorError,
        path: RelativePath,
        absolute: &Path,
    ) {
        if !matches!(err, MirrorError::Write { .. }) {
            return;
        }
        match self.mirror.stat_mod_time(absolute).await {
            Ok(modified) => {
                tracing::warn!(path = %path, "write failed, recorded partial file");
                ledger.set(path, modified);
            }
            Err(_) => {
                ledger.remove(&path);
            }
        }
    }

    /// Remove the file backing a deleted key and drop its record. A file
    /// that is already gone is not an error.
    pub(crate) async fn remove_entry(&self, key: &str) -> Result<EventOutcome, SyncError> {
        let path = key_to_path(key, &self.root_key)?;
        self.remove_path(path).await
    }

    pub(crate) async fn remove_path(&self, path: RelativePath) -> Result<EventOutcome, SyncError> {
        let mut ledger = self.ledger.lock().await;
        match self.mirror.remove(&path).await {
            Ok(()) => {
                ledger.remove(&path);
                Ok(EventOutcome::Removed(path))
            }
            Err(e) if e.is_not_found() => {
                ledger.remove(&path);
                Ok(EventOutcome::AlreadyAbsent(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}
