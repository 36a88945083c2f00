//! Local-to-remote propagation
//!
//! Each cycle walks the synchronized root, compares every file's mtime with
//! the ledger and uploads the files that moved forward. The comparison and the
//! ledger update for one file happen under a single lock, so a concurrent
//! remote write is either fully recorded before the stat or not visible yet.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use walkdir::WalkDir;

use crate::keyspace::{path_to_key, KeyspaceError, RelativePath};
use crate::ledger::has_advanced;

use super::{ItemFailure, SyncContext, SyncError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Upload files that appear after the first (baseline) cycle
    pub upload_created_files: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            upload_created_files: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub scanned: usize,
    /// Files recorded for the first time and not uploaded
    pub first_seen: usize,
    pub created: Vec<RelativePath>,
    pub changed: Vec<RelativePath>,
    pub uploaded: Vec<RelativePath>,
    pub out_of_scope: usize,
    pub failures: Vec<ItemFailure>,
}

impl CycleReport {
    pub fn log(&self) {
        if self.uploaded.is_empty() && self.failures.is_empty() {
            tracing::debug!(scanned = self.scanned, "poll cycle found no changes");
        } else {
            tracing::info!(
                scanned = self.scanned,
                changed = self.changed.len(),
                created = self.created.len(),
                uploaded = self.uploaded.len(),
                failed = self.failures.len(),
                "poll cycle complete"
            );
        }
        for failure in &self.failures {
            tracing::warn!(path = %failure.item, error = %failure.error, "upload skipped");
        }
    }
}

pub struct LocalPoller {
    ctx: SyncContext,
    config: PollerConfig,
    baseline_done: bool,
}

struct Walked {
    files: Vec<PathBuf>,
    errors: Vec<ItemFailure>,
}

impl LocalPoller {
    pub fn new(ctx: SyncContext, config: PollerConfig) -> Self {
        Self {
            ctx,
            config,
            baseline_done: false,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run one scan-and-upload cycle.
    pub async fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let walked = match self.walk().await {
            Ok(walked) => walked,
            Err(failure) => {
                report.failures.push(failure);
                return report;
            }
        };
        report.failures.extend(walked.errors);

        let detect_created = self.baseline_done && self.config.upload_created_files;
        let mut pending = Vec::new();

        for absolute in walked.files {
            let relative = match self.ctx.mirror().relative_of(&absolute) {
                Ok(relative) => relative,
                Err(err) => {
                    report
                        .failures
                        .push(ItemFailure::new(absolute.display(), err));
                    continue;
                }
            };
            match path_to_key(&relative.to_path_buf(), self.ctx.root_key()) {
                Ok(_) => {}
                Err(KeyspaceError::OutOfScope { key, .. }) => {
                    tracing::trace!(key = %key, "file outside root key, not synchronized");
                    report.out_of_scope += 1;
                    continue;
                }
                Err(err) => {
                    report.failures.push(ItemFailure::new(&relative, err));
                    continue;
                }
            }

            let mut ledger = self.ctx.ledger().lock().await;
            let modified = match self.ctx.mirror().stat_mod_time(&absolute).await {
                Ok(modified) => modified,
                // removed between the walk and the stat
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    report.failures.push(ItemFailure::new(&relative, err));
                    continue;
                }
            };
            let previous = ledger.get(&relative);
            ledger.set(relative.clone(), modified);
            drop(ledger);

            report.scanned += 1;
            match previous {
                Some(_) if has_advanced(previous, modified) => {
                    report.changed.push(relative.clone());
                    pending.push((relative, absolute));
                }
                Some(_) => {}
                None if detect_created => {
                    report.created.push(relative.clone());
                    pending.push((relative, absolute));
                }
                None => report.first_seen += 1,
            }
        }

        for (relative, absolute) in pending {
            match self.upload(&relative, &absolute).await {
                Ok(()) => {
                    tracing::info!(key = %relative, "uploaded local change");
                    self.ctx.ledger().lock().await.mark_remote(relative.clone());
                    report.uploaded.push(relative);
                }
                Err(err) => report.failures.push(ItemFailure::new(&relative, err)),
            }
        }

        self.baseline_done = true;
        report
    }

    /// Poll on a fixed interval until shutdown. The first cycle runs
    /// immediately and serves as the baseline.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs_f64(), "local poller started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    report.log();
                }
            }
        }
        tracing::info!("local poller stopped");
    }

    async fn upload(&self, relative: &RelativePath, absolute: &Path) -> Result<(), SyncError> {
        let content = self.ctx.mirror().read(absolute).await?;
        self.ctx.put(relative.as_str(), content).await?;
        Ok(())
    }

    async fn walk(&self) -> Result<Walked, ItemFailure> {
        let root = self.ctx.mirror().root().to_path_buf();
        let root_for_error = root.clone();
        tokio::task::spawn_blocking(move || {
            let mut walked = Walked {
                files: Vec::new(),
                errors: Vec::new(),
            };
            for entry in WalkDir::new(&root).follow_links(false) {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        walked.files.push(entry.into_path())
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let path = err.path().unwrap_or(&root).to_path_buf();
                        let item = path.display().to_string();
                        walked.errors.push(ItemFailure::new(
                            item,
                            SyncError::Walk {
                                path,
                                message: err.to_string(),
                            },
                        ));
                    }
                }
            }
            walked
        })
        .await
        .map_err(|err| {
            ItemFailure::new(
                root_for_error.display(),
                SyncError::Walk {
                    path: root_for_error.clone(),
                    message: err.to_string(),
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::sync::Arc;
    use std::time::SystemTime;

    use tempfile::TempDir;

    use super::*;
    use crate::mirror::FsMirror;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;

    fn setup(root_key: &str) -> (TempDir, MemoryStore, SyncContext) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let ctx = SyncContext::new(Arc::new(store.clone()), FsMirror::new(dir.path()), root_key)
            .with_retry(RetryPolicy::none());
        (dir, store, ctx)
    }

    fn touch_later(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        let modified = file.metadata().unwrap().modified().unwrap();
        file.set_modified(modified + Duration::from_secs(secs)).unwrap();
    }

    #[tokio::test]
    async fn test_first_cycle_only_records() {
        let (dir, store, ctx) = setup("");
        std::fs::write(dir.path().join("existing.txt"), "local").unwrap();
        let mut poller = LocalPoller::new(ctx.clone(), PollerConfig::default());

        let report = poller.poll_once().await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.first_seen, 1);
        assert!(report.uploaded.is_empty());
        assert!(store.accepted_puts().is_empty());
        let path = RelativePath::parse("existing.txt").unwrap();
        assert!(ctx.ledger().get(&path).await.is_some());
    }

    #[tokio::test]
    async fn test_advanced_mtime_is_uploaded() {
        let (dir, store, ctx) = setup("");
        let file = dir.path().join("notes/today.md");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "v1").unwrap();
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());
        poller.poll_once().await;

        std::fs::write(&file, "v2").unwrap();
        touch_later(&file, 5);
        let report = poller.poll_once().await;

        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.uploaded[0].as_str(), "notes/today.md");
        assert_eq!(store.get("notes/today.md").unwrap(), b"v2");

        let report = poller.poll_once().await;
        assert!(report.changed.is_empty());
    }

    #[tokio::test]
    async fn test_created_after_baseline_is_uploaded() {
        let (dir, store, ctx) = setup("");
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());
        poller.poll_once().await;

        std::fs::write(dir.path().join("c.txt"), "world").unwrap();
        let report = poller.poll_once().await;

        assert_eq!(report.created.len(), 1);
        assert_eq!(store.get("c.txt").unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_created_files_ignored_when_disabled() {
        let (dir, store, ctx) = setup("");
        let mut poller = LocalPoller::new(
            ctx,
            PollerConfig {
                upload_created_files: false,
                ..Default::default()
            },
        );
        poller.poll_once().await;

        std::fs::write(dir.path().join("c.txt"), "world").unwrap();
        let report = poller.poll_once().await;

        assert_eq!(report.first_seen, 1);
        assert!(store.get("c.txt").is_none());
    }

    #[tokio::test]
    async fn test_engine_writes_are_not_echoed() {
        let (dir, store, ctx) = setup("");
        let mut poller = LocalPoller::new(ctx.clone(), PollerConfig::default());
        poller.poll_once().await;

        ctx.write_entry("remote.txt", b"from etcd").await.unwrap();
        let report = poller.poll_once().await;

        assert!(dir.path().join("remote.txt").exists());
        assert!(report.uploaded.is_empty());
        assert!(store.accepted_puts().is_empty());
    }

    #[tokio::test]
    async fn test_files_outside_root_key_are_skipped() {
        let (dir, store, ctx) = setup("config/");
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());
        poller.poll_once().await;

        std::fs::write(dir.path().join("config/app.toml"), "a = 1").unwrap();
        std::fs::write(dir.path().join("stray.txt"), "nope").unwrap();
        let report = poller.poll_once().await;

        assert_eq!(report.out_of_scope, 1);
        assert_eq!(store.accepted_puts(), vec!["config/app.toml".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_upload_is_reported_and_not_retried() {
        let (dir, store, ctx) = setup("");
        let file = dir.path().join("big.bin");
        std::fs::write(&file, "0").unwrap();
        store.reject_key("big.bin");
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());
        poller.poll_once().await;

        touch_later(&file, 5);
        let report = poller.poll_once().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "big.bin");

        let report = poller.poll_once().await;
        assert!(report.failures.is_empty());
        assert!(report.changed.is_empty());
    }

    #[tokio::test]
    async fn test_ledger_holds_latest_mtime() {
        let (dir, _store, ctx) = setup("");
        let file = dir.path().join("a");
        std::fs::write(&file, "x").unwrap();
        let mut poller = LocalPoller::new(ctx.clone(), PollerConfig::default());

        poller.poll_once().await;
        touch_later(&file, 30);
        poller.poll_once().await;

        let expected: SystemTime = std::fs::metadata(&file).unwrap().modified().unwrap();
        let path = RelativePath::parse("a").unwrap();
        assert_eq!(ctx.ledger().get(&path).await, Some(expected));
    }

    #[tokio::test]
    async fn test_unreadable_root_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-created");
        let ctx = SyncContext::new(
            Arc::new(MemoryStore::new()),
            FsMirror::new(&missing),
            "",
        )
        .with_retry(RetryPolicy::none());
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());

        let report = poller.poll_once().await;

        assert_eq!(report.scanned, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, missing.display().to_string());
        assert!(matches!(report.failures[0].error, SyncError::Walk { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_files_are_not_followed() {
        let (dir, store, ctx) = setup("");
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        std::fs::write(&target, "outside").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();
        let mut poller = LocalPoller::new(ctx, PollerConfig::default());
        poller.poll_once().await;

        let report = poller.poll_once().await;

        assert_eq!(report.scanned, 0);
        assert!(store.get("link.txt").is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_dir, _store, ctx) = setup("");
        let poller = LocalPoller::new(
            ctx,
            PollerConfig {
                interval: Duration::from_millis(10),
                upload_created_files: true,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
