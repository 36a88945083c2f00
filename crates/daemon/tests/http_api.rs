//! Manual override and health endpoints, driven through the router

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

use common::mirror::FsMirror;
use common::retry::RetryPolicy;
use common::store::MemoryStore;
use common::sync::{SyncContext, WatcherState};
use etcd_mirror_daemon::http_server::api::client::{ApiClient, ApiError};
use etcd_mirror_daemon::http_server::api::files::put_file::PutFileRequest;
use etcd_mirror_daemon::http_server::health::readiness::ReadyzRequest;
use etcd_mirror_daemon::http_server::router;
use etcd_mirror_daemon::{start_with_context, AppConfig, ServiceState};

struct Harness {
    dir: TempDir,
    store: MemoryStore,
    state: ServiceState,
    watcher: watch::Sender<WatcherState>,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let sync = SyncContext::new(Arc::new(store.clone()), FsMirror::new(dir.path()), "")
        .with_retry(RetryPolicy::none());
    let (tx, rx) = watch::channel(WatcherState::Consuming);
    Harness {
        dir,
        store,
        state: ServiceState::new(sync, rx),
        watcher: tx,
    }
}

async fn post(state: &ServiceState, uri: &str, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_put_file() {
    let h = harness();
    let file = h.dir.path().join("app.json");
    std::fs::write(&file, r#"{"replicas":3}"#).unwrap();

    let body = json!({"etcdKey": "apps/app.json", "filePath": file});
    let (status, body) = post(&h.state, "/putFile", body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    assert_eq!(h.store.get("apps/app.json").unwrap(), br#"{"replicas":3}"#);
}

#[tokio::test]
async fn test_put_missing_file_is_bad_request() {
    let h = harness();
    let body = json!({"etcdKey": "k", "filePath": h.dir.path().join("missing")});

    let (status, body) = post(&h.state, "/putFile", body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = harness();

    let (status, body) = post(&h.state, "/putFile", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = post(&h.state, "/downloadFile", json!({"etcdKey": 1}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_put_empty_key_is_bad_request() {
    let h = harness();
    let file = h.dir.path().join("f");
    std::fs::write(&file, "x").unwrap();

    let body = json!({"etcdKey": "", "filePath": file});
    let (status, body) = post(&h.state, "/putFile", body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "etcdKey must not be empty");
    assert!(h.store.keys().is_empty());
}

#[tokio::test]
async fn test_download_file() {
    let h = harness();
    h.store.insert("svc/a.yaml", "a: 1");
    h.store.insert("svc/b/c.yaml", "c: 2");
    let out = TempDir::new().unwrap();

    let body = json!({"etcdKey": "svc/", "filePath": out.path()});
    let (status, body) = post(&h.state, "/downloadFile", body.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(
        std::fs::read_to_string(out.path().join("svc/b/c.yaml")).unwrap(),
        "c: 2"
    );
}

#[tokio::test]
async fn test_download_reports_write_failures() {
    let h = harness();
    h.store.insert("x/y", "1");
    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("x"), "a file, not a directory").unwrap();

    let body = json!({"etcdKey": "x/", "filePath": out.path()});
    let (status, body) = post(&h.state, "/downloadFile", body.to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("1 of 1"));
}

#[tokio::test]
async fn test_probes() {
    let h = harness();

    let request = Request::get("/_status/livez").body(Body::empty()).unwrap();
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::get("/_status/readyz").body(Body::empty()).unwrap();
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    h.watcher.send_replace(WatcherState::Subscribing);
    let request = Request::get("/_status/readyz").body(Body::empty()).unwrap();
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_service_lifecycle_over_http() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    store.insert("boot.txt", "from etcd");
    let sync = SyncContext::new(Arc::new(store.clone()), FsMirror::new(dir.path()), "");

    let mut config = AppConfig {
        folder: Some(dir.path().to_path_buf()),
        etcd: vec!["http://unused:2379".to_string()],
        port: 0,
        ..Default::default()
    }
    .to_service_config()
    .unwrap();
    config.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config.poller.interval = Duration::from_millis(20);

    let handle = start_with_context(&config, sync).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("boot.txt")).unwrap(),
        "from etcd"
    );

    let remote = url::Url::parse(&format!("http://{}", handle.local_addr())).unwrap();
    let mut client = ApiClient::new(&remote).unwrap();

    let mut ready = false;
    for _ in 0..100 {
        if client.call(ReadyzRequest {}).await.is_ok() {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready, "watcher never became ready");

    let upload = dir.path().join("boot.txt");
    client
        .call(PutFileRequest {
            etcd_key: "copy.txt".to_string(),
            file_path: upload,
        })
        .await
        .unwrap();
    assert_eq!(store.get("copy.txt").unwrap(), b"from etcd");

    let err = client
        .call(PutFileRequest {
            etcd_key: "nope".to_string(),
            file_path: dir.path().join("absent"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::HttpStatus(StatusCode::BAD_REQUEST, _)));

    handle.shutdown().await.unwrap();
}
