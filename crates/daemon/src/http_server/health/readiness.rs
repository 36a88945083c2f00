use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::sync::WatcherState;

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyzRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyzResponse {
    pub status: String,
    /// Remote watcher state, e.g. `consuming` or `faulted: ...`
    pub watcher: String,
}

impl ApiRequest for ReadyzRequest {
    type Response = ReadyzResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/_status/readyz"))
    }
}

/// Ready only while the remote watcher is consuming events. Any other state
/// means remote changes are not reaching the local directory right now.
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let watcher = state.watcher_state();
    let (code, status) = match watcher {
        WatcherState::Consuming => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    let body = ReadyzResponse {
        status: status.to_string(),
        watcher: watcher.to_string(),
    };
    (code, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::mirror::FsMirror;
    use common::store::{MemoryStore, StoreError};
    use common::sync::{SyncContext, WatchFault};
    use tokio::sync::watch;

    use super::*;

    async fn probe(state: WatcherState) -> (StatusCode, ReadyzResponse) {
        let dir = tempfile::TempDir::new().unwrap();
        let sync = SyncContext::new(Arc::new(MemoryStore::new()), FsMirror::new(dir.path()), "");
        let (_tx, rx) = watch::channel(state);

        let response = handler(State(ServiceState::new(sync, rx))).await;
        let code = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (code, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_ready_while_consuming() {
        let (code, body) = probe(WatcherState::Consuming).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.watcher, "consuming");
    }

    #[tokio::test]
    async fn test_not_ready_otherwise() {
        let (code, body) = probe(WatcherState::Subscribing).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unavailable");

        let fault = WatchFault::Subscribe(StoreError::Unavailable("refused".into()));
        let (code, body) = probe(WatcherState::Faulted(fault)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.watcher.starts_with("faulted"));
    }
}
