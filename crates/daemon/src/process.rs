//! Service lifecycle
//!
//! Startup order: connect, bootstrap, then run the remote watcher, the local
//! poller and the HTTP server side by side. All three observe the same
//! shutdown channel and are awaited before the process exits.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

use common::sync::{
    bootstrap, LocalPoller, SyncContext, WatchExhausted, WatchStats, WatchSupervisor,
};

use crate::http_server;
use crate::service_config::Config;
use crate::service_state::{State as ServiceState, StateSetupError};

pub const LOG_FILE_PREFIX: &str = "etcd-mirror.log";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("setup failed: {0}")]
    Setup(#[from] StateSetupError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    WatchExhausted(#[from] WatchExhausted),
    #[error("http server failed: {0}")]
    Http(std::io::Error),
    #[error("{0} task panicked")]
    Panicked(&'static str),
}

/// Install the global subscriber: stdout, plus a daily rolling file when a
/// log directory is configured. `RUST_LOG` takes precedence over the
/// configured level. Keep the returned guard alive to flush the file writer.
pub fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (file, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(std::io::stdout.and(file)), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();

    guard
}

/// Handle to a running service.
pub struct ShutdownHandle {
    shutdown_tx: watch::Sender<()>,
    local_addr: SocketAddr,
    watcher: JoinHandle<Result<WatchStats, WatchExhausted>>,
    poller: JoinHandle<()>,
    http: JoinHandle<std::io::Result<()>>,
}

impl ShutdownHandle {
    /// Address the HTTP server actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal every task to stop and wait for them.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        let _ = self.shutdown_tx.send(());
        self.join().await
    }

    /// Run until ctrl-c or until the watcher gives up, then stop everything.
    pub async fn wait(mut self) -> Result<(), ServiceError> {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                self.shutdown().await
            }
            result = &mut self.watcher => {
                let _ = self.shutdown_tx.send(());
                let _ = self.poller.await;
                let _ = self.http.await;
                match result {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(exhausted)) => {
                        tracing::error!(error = %exhausted, "remote watcher is down, exiting");
                        Err(exhausted.into())
                    }
                    Err(_) => Err(ServiceError::Panicked("watcher")),
                }
            }
        }
    }

    async fn join(self) -> Result<(), ServiceError> {
        let watch = self
            .watcher
            .await
            .map_err(|_| ServiceError::Panicked("watcher"))?;
        self.poller
            .await
            .map_err(|_| ServiceError::Panicked("poller"))?;
        let http = self.http.await.map_err(|_| ServiceError::Panicked("http"))?;

        let stats = watch?;
        http.map_err(ServiceError::Http)?;
        tracing::info!(
            written = stats.written,
            removed = stats.removed,
            failed = stats.failed,
            "service stopped"
        );
        Ok(())
    }
}

/// Start the service around an existing sync context. The bootstrap runs to
/// completion before this returns; everything else runs in background tasks.
pub async fn start_with_context(
    config: &Config,
    sync: SyncContext,
) -> Result<ShutdownHandle, ServiceError> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .map_err(|source| ServiceError::Bind {
            addr: config.listen_addr,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| ServiceError::Bind {
        addr: config.listen_addr,
        source,
    })?;

    let report = bootstrap(&sync).await;
    report.log();

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let supervisor = WatchSupervisor::new(sync.clone())
        .reconnect_policy(config.reconnect)
        .max_reconnects(config.max_reconnects);
    let state = ServiceState::new(sync.clone(), supervisor.state());

    let watcher = tokio::spawn(supervisor.run(report.watch_from(), shutdown_rx.clone()));
    let poller = tokio::spawn(LocalPoller::new(sync, config.poller).run(shutdown_rx.clone()));
    let http = tokio::spawn(http_server::serve(listener, state, shutdown_rx));

    Ok(ShutdownHandle {
        shutdown_tx,
        local_addr,
        watcher,
        poller,
        http,
    })
}

/// Connect to etcd and start the service.
pub async fn start_service(config: &Config) -> Result<ShutdownHandle, ServiceError> {
    let sync = ServiceState::sync_context(config).await?;
    start_with_context(config, sync).await
}

/// Run the service in the foreground until ctrl-c or a fatal watcher error.
pub async fn spawn_service(config: &Config) -> Result<(), ServiceError> {
    let _guard = init_tracing(config);
    tracing::info!(
        folder = %config.folder.display(),
        root_key = %config.root_key,
        endpoints = ?config.etcd.endpoints,
        listen = %config.listen_addr,
        "starting etcd-mirror"
    );

    let handle = start_service(config).await?;
    handle.wait().await
}
