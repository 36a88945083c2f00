use std::path::PathBuf;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::sync::{manual_download, SyncError};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::{bad_request, StatusResponse};
use crate::ServiceState;

/// Write every key starting with `etcd_key` beneath the directory
/// `file_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFileRequest {
    pub etcd_key: String,
    pub file_path: PathBuf,
}

pub async fn handler(
    State(state): State<ServiceState>,
    payload: Result<Json<DownloadFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DownloadFileError> {
    let Json(req) = payload?;
    if req.file_path.as_os_str().is_empty() {
        return Err(DownloadFileError::EmptyPath);
    }

    let report = manual_download(state.sync(), &req.etcd_key, &req.file_path).await?;
    if let Some(first) = report.failures.first() {
        return Err(DownloadFileError::Partial {
            failed: report.failures.len(),
            total: report.failures.len() + report.written.len(),
            first: first.to_string(),
        });
    }

    Ok((http::StatusCode::OK, Json(StatusResponse::ok())).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadFileError {
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),
    #[error("filePath must not be empty")]
    EmptyPath,
    #[error("failed to write {failed} of {total} keys, first failure: {first}")]
    Partial {
        failed: usize,
        total: usize,
        first: String,
    },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for DownloadFileError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "downloadFile failed");
        bad_request(self)
    }
}

impl ApiRequest for DownloadFileRequest {
    type Response = StatusResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.post(endpoint(base_url, "/downloadFile")).json(&self)
    }
}
