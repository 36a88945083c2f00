use std::path::PathBuf;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::sync::{manual_upload, SyncError};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::http_server::api::{bad_request, StatusResponse};
use crate::ServiceState;

/// Upload the file at `file_path` under `etcd_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutFileRequest {
    pub etcd_key: String,
    pub file_path: PathBuf,
}

pub async fn handler(
    State(state): State<ServiceState>,
    payload: Result<Json<PutFileRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PutFileError> {
    let Json(req) = payload?;
    if req.etcd_key.is_empty() {
        return Err(PutFileError::EmptyKey);
    }
    if req.file_path.as_os_str().is_empty() {
        return Err(PutFileError::EmptyPath);
    }

    manual_upload(state.sync(), &req.etcd_key, &req.file_path).await?;

    Ok((http::StatusCode::OK, Json(StatusResponse::ok())).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum PutFileError {
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),
    #[error("etcdKey must not be empty")]
    EmptyKey,
    #[error("filePath must not be empty")]
    EmptyPath,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for PutFileError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "putFile failed");
        bad_request(self)
    }
}

impl ApiRequest for PutFileRequest {
    type Response = StatusResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.post(endpoint(base_url, "/putFile")).json(&self)
    }
}
