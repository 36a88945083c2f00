//! Initial load of the root key into the local directory

use std::collections::HashSet;

use crate::keyspace::{key_to_path, RelativePath};
use crate::store::StoreError;

use super::{EventOutcome, ItemFailure, SyncContext};

#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Revision the snapshot was read at, when the fetch succeeded
    pub revision: Option<i64>,
    pub written: Vec<RelativePath>,
    /// Files dropped by [`reload`] because their key is gone
    pub removed: Vec<RelativePath>,
    pub failures: Vec<ItemFailure>,
    /// Set when the prefix read itself failed; the mirror then starts empty
    pub fetch_error: Option<StoreError>,
}

impl BootstrapReport {
    /// Revision the watcher should subscribe from so nothing written after
    /// the snapshot is missed.
    pub fn watch_from(&self) -> Option<i64> {
        self.revision.map(|revision| revision + 1)
    }

    pub fn log(&self) {
        if let Some(err) = &self.fetch_error {
            tracing::error!(error = %err, "bootstrap fetch failed, starting with an empty mirror");
            return;
        }
        tracing::info!(
            revision = self.revision,
            written = self.written.len(),
            removed = self.removed.len(),
            failed = self.failures.len(),
            "bootstrap complete"
        );
        for failure in &self.failures {
            tracing::warn!(key = %failure.item, error = %failure.error, "bootstrap skipped key");
        }
    }
}

/// Fetch every key under the root key and write it to disk.
///
/// A failed fetch is reported, never returned: startup continues with an
/// empty mirror and the watcher picks up later changes.
pub async fn bootstrap(ctx: &SyncContext) -> BootstrapReport {
    load(ctx).await.0
}

/// Bootstrap again after the watch history was compacted.
///
/// Deletes that happened inside the compacted range were never delivered,
/// so files whose key was known to the store but is missing from the fresh
/// snapshot are removed. Files that never had a key are left alone. Nothing
/// is removed when the fetch fails.
pub async fn reload(ctx: &SyncContext) -> BootstrapReport {
    let (mut report, present) = load(ctx).await;
    if report.fetch_error.is_some() {
        return report;
    }

    let stale: Vec<RelativePath> = ctx
        .ledger()
        .lock()
        .await
        .remote_paths()
        .into_iter()
        .filter(|path| !present.contains(path))
        .collect();

    for path in stale {
        match ctx.remove_path(path.clone()).await {
            Ok(EventOutcome::Removed(path)) | Ok(EventOutcome::AlreadyAbsent(path)) => {
                tracing::info!(path = %path, "key deleted during compacted range");
                report.removed.push(path);
            }
            Ok(EventOutcome::Written(_)) => {}
            Err(error) => report.failures.push(ItemFailure::new(&path, error)),
        }
    }

    report
}

async fn load(ctx: &SyncContext) -> (BootstrapReport, HashSet<RelativePath>) {
    let mut present = HashSet::new();
    let snapshot = match ctx.get_prefix(ctx.root_key()).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let report = BootstrapReport {
                fetch_error: Some(err),
                ..Default::default()
            };
            return (report, present);
        }
    };

    let mut report = BootstrapReport {
        revision: Some(snapshot.revision),
        ..Default::default()
    };

    for entry in snapshot.entries {
        tracing::debug!(key = %entry.key, "read key");
        if let Ok(path) = key_to_path(&entry.key, ctx.root_key()) {
            present.insert(path);
        }
        match ctx.write_entry(&entry.key, &entry.value).await {
            Ok(path) => report.written.push(path),
            Err(error) => report.failures.push(ItemFailure::new(&entry.key, error)),
        }
    }

    (report, present)
}
