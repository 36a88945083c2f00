//! End-to-end reconciliation against the in-memory store

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::prelude::*;
use common::store::MemoryStore;
use common::sync::{
    bootstrap, manual_download, manual_upload, LocalPoller, PollerConfig, WatchSupervisor,
    WatcherState,
};
use tempfile::TempDir;
use tokio::sync::watch;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn context(dir: &Path, store: &MemoryStore, root_key: &str) -> SyncContext {
    SyncContext::new(Arc::new(store.clone()), FsMirror::new(dir), root_key)
        .with_retry(RetryPolicy::none())
}

fn fast_reconnect() -> RetryPolicy {
    RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn bump_mtime(path: &Path) {
    let file = File::options().write(true).open(path).unwrap();
    let modified = file.metadata().unwrap().modified().unwrap();
    file.set_modified(modified + Duration::from_secs(10)).unwrap();
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_scenario_bootstrap_delete_create() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("a/b.txt", "hello");
    let ctx = context(dir.path(), &store, "");

    let report = bootstrap(&ctx).await;
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a/b.txt")).unwrap(),
        "hello"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let supervisor = WatchSupervisor::new(ctx.clone()).reconnect_policy(fast_reconnect());
    let mut state = supervisor.state();
    let watcher = tokio::spawn(supervisor.run(report.watch_from(), shutdown_rx.clone()));
    state
        .wait_for(|state| *state == WatcherState::Consuming)
        .await
        .unwrap();

    let poller = LocalPoller::new(
        ctx.clone(),
        PollerConfig {
            interval: Duration::from_millis(20),
            upload_created_files: true,
        },
    );
    let poller = tokio::spawn(poller.run(shutdown_rx));

    store.delete("a/b.txt");
    eventually("remote delete", || !dir.path().join("a/b.txt").exists()).await;

    // let the baseline cycle finish before creating the file
    tokio::time::sleep(Duration::from_millis(60)).await;
    std::fs::write(dir.path().join("c.txt"), "world").unwrap();
    eventually("local create", || store.get("c.txt").is_some()).await;
    assert_eq!(store.get("c.txt").unwrap(), b"world");

    shutdown_tx.send(()).unwrap();
    watcher.await.unwrap().unwrap();
    poller.await.unwrap();
    assert_eq!(*state.borrow(), WatcherState::Terminated);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("gone.txt", "x");
    let ctx = context(dir.path(), &store, "");
    // file was never materialized locally
    let from = store.revision() + 1;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let supervisor = WatchSupervisor::new(ctx.clone()).reconnect_policy(fast_reconnect());
    let handle = tokio::spawn(supervisor.run(Some(from), shutdown_rx));

    store.delete("gone.txt");
    store.insert("after.txt", "still running");
    eventually("watcher to continue", || dir.path().join("after.txt").exists()).await;

    shutdown_tx.send(()).unwrap();
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.already_absent, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_no_feedback_loop() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("one", "1");
    store.insert("nested/two", "2");
    let ctx = context(dir.path(), &store, "");
    let mut poller = LocalPoller::new(ctx.clone(), PollerConfig::default());

    bootstrap(&ctx).await;
    let report = poller.poll_once().await;
    assert!(report.uploaded.is_empty());

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let handle = tokio::spawn(
        WatchSupervisor::new(ctx.clone())
            .reconnect_policy(fast_reconnect())
            .run(Some(store.revision() + 1), shutdown_rx),
    );
    store.insert("one", "updated remotely");
    eventually("remote update", || {
        std::fs::read_to_string(dir.path().join("one")).ok().as_deref() == Some("updated remotely")
    })
    .await;

    let report = poller.poll_once().await;
    assert!(report.changed.is_empty());
    assert!(report.uploaded.is_empty());
    assert!(store.accepted_puts().is_empty());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let ctx = context(dir.path(), &store, "");
    let source = dir.path().join("blob.bin");
    let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    std::fs::write(&source, &bytes).unwrap();

    manual_upload(&ctx, "bin/blob.bin", &source).await.unwrap();
    let out = TempDir::new().unwrap();
    let report = manual_download(&ctx, "bin/blob.bin", out.path())
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(std::fs::read(out.path().join("bin/blob.bin")).unwrap(), bytes);
}

#[tokio::test]
async fn test_rejected_upload_does_not_block_others() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let ctx = context(dir.path(), &store, "");
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, "a").unwrap();
    std::fs::write(&b, "b").unwrap();
    store.reject_key("a.txt");

    let mut poller = LocalPoller::new(ctx, PollerConfig::default());
    poller.poll_once().await;
    bump_mtime(&a);
    bump_mtime(&b);
    let report = poller.poll_once().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "a.txt");
    assert_eq!(store.get("b.txt").unwrap(), b"b");
    assert!(store.get("a.txt").is_none());
}

#[tokio::test]
async fn test_prefix_scoping() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("team/app.yaml", "in");
    store.insert("elsewhere/app.yaml", "out");
    let ctx = context(dir.path(), &store, "team/");

    bootstrap(&ctx).await;
    assert!(dir.path().join("team/app.yaml").exists());
    assert!(!dir.path().join("elsewhere").exists());

    let mut poller = LocalPoller::new(ctx.clone(), PollerConfig::default());
    poller.poll_once().await;
    std::fs::write(dir.path().join("local-only.txt"), "x").unwrap();
    std::fs::write(dir.path().join("team/new.yaml"), "y").unwrap();
    poller.poll_once().await;

    assert_eq!(store.accepted_puts(), vec!["team/new.yaml".to_string()]);

    // remote changes outside the root key never reach the watcher
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let handle = tokio::spawn(
        WatchSupervisor::new(ctx)
            .reconnect_policy(fast_reconnect())
            .run(Some(store.revision() + 1), shutdown_rx),
    );
    store.insert("elsewhere/late.yaml", "out");
    store.insert("team/late.yaml", "in");
    eventually("in-scope change", || dir.path().join("team/late.yaml").exists()).await;
    assert!(!dir.path().join("elsewhere").exists());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
