use std::path::PathBuf;

use clap::Args;

use etcd_mirror_daemon::state::AppState;
use etcd_mirror_daemon::{spawn_service, ServiceError, StateError};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Directory to keep in sync (overrides config.toml)
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// Root key to mirror (overrides config.toml)
    #[arg(short, long)]
    pub key: Option<String>,

    /// HTTP port (overrides config.toml)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// etcd endpoints, comma separated (overrides config.toml)
    #[arg(long, value_delimiter = ',')]
    pub etcd: Vec<String>,

    /// Seconds between local scans (overrides config.toml)
    #[arg(long)]
    pub poll_interval: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("daemon failed: {0}")]
    Failed(#[from] ServiceError),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // Load config (or defaults when there is none) from config path or ~/.etcd-mirror
        let mut state = AppState::load_or_default(ctx.config_path.clone())?;

        if let Some(folder) = &self.folder {
            state.config.folder = Some(crate::cli::op::absolute(folder)?);
        }
        if let Some(key) = &self.key {
            state.config.key = key.clone();
        }
        if let Some(port) = self.port {
            state.config.port = port;
        }
        if !self.etcd.is_empty() {
            state.config.etcd = self.etcd.clone();
        }
        if let Some(secs) = self.poll_interval {
            state.config.poll_interval_secs = secs;
        }

        let config = state.config.to_service_config()?;
        spawn_service(&config).await?;
        Ok("daemon ended".to_string())
    }
}
