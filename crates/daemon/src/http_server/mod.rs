use std::net::SocketAddr;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::ServiceState;

pub mod api;
pub mod health;

use api::files::{download_file, put_file};

/// Manual override API plus health probes.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/putFile", post(put_file::handler))
        .route("/downloadFile", post(download_file::handler))
        .nest("/_status", health::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until the shutdown channel fires.
pub async fn serve(
    listener: TcpListener,
    state: ServiceState,
    mut shutdown: watch::Receiver<()>,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(addr = ?addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    tracing::info!("http server stopped");
    Ok(())
}
