//! Operator-triggered transfers
//!
//! These bypass the ledger comparison entirely: an upload always sends the
//! file, a download always overwrites. A download that lands inside the
//! synchronized root is still recorded so the poller does not echo it back.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::keyspace::{relative_to, RelativePath};
use crate::mirror::{FsMirror, MirrorError};

use super::{ItemFailure, SyncContext, SyncError};

/// Read `file` and store its full content under `key`.
pub async fn manual_upload(ctx: &SyncContext, key: &str, file: &Path) -> Result<(), SyncError> {
    let content = ctx.mirror().read(file).await?;
    let size = content.len();
    ctx.put(key, content).await?;
    tracing::info!(key, path = %file.display(), size, "manual upload");
    Ok(())
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
}

/// Fetch every key starting with `key` and write each one beneath
/// `destination`, using the full key as the relative path.
///
/// Only the prefix read and creating `destination` can fail the whole call;
/// per-entry failures are collected in the report.
pub async fn manual_download(
    ctx: &SyncContext,
    key: &str,
    destination: &Path,
) -> Result<DownloadReport, SyncError> {
    let snapshot = ctx.get_prefix(key).await?;
    let mut report = DownloadReport::default();
    if snapshot.entries.is_empty() {
        return Ok(report);
    }

    fs::create_dir_all(destination)
        .await
        .map_err(|source| MirrorError::Write {
            path: destination.to_path_buf(),
            source,
        })?;
    let target = FsMirror::new(resolve(destination).await);
    let sync_root = resolve(ctx.mirror().root()).await;

    for entry in snapshot.entries {
        match write_one(ctx, &target, &sync_root, &entry.key, &entry.value).await {
            Ok(written) => report.written.push(written),
            Err(err) => report.failures.push(ItemFailure::new(&entry.key, err)),
        }
    }

    tracing::info!(
        key,
        destination = %destination.display(),
        written = report.written.len(),
        failed = report.failures.len(),
        "manual download"
    );
    Ok(report)
}

/// Canonical form of `path`, so relative or `..` spellings of a directory
/// inside the sync root are still recognized as such.
async fn resolve(path: &Path) -> PathBuf {
    match fs::canonicalize(path).await {
        Ok(canonical) => canonical,
        Err(_) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

async fn write_one(
    ctx: &SyncContext,
    target: &FsMirror,
    sync_root: &Path,
    key: &str,
    value: &[u8],
) -> Result<PathBuf, SyncError> {
    let path = RelativePath::parse(key)?;
    let absolute = path.under(target.root());

    match relative_to(&absolute, sync_root) {
        Ok(inside_root) => {
            let mut ledger = ctx.ledger().lock().await;
            match target.write(&path, value).await {
                Ok(modified) => ledger.set(inside_root, modified),
                Err(err) => {
                    ctx.settle_failed_write(&mut ledger, &err, inside_root, &absolute)
                        .await;
                    return Err(err.into());
                }
            }
        }
        Err(_) => {
            target.write(&path, value).await?;
        }
    }
    Ok(absolute)
}
