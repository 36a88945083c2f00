use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod liveness;
pub mod readiness;

/// Probes mounted under `/_status`.
pub fn router() -> Router<ServiceState> {
    Router::new()
        .route("/livez", get(liveness::handler))
        .route("/readyz", get(readiness::handler))
}
