use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use etcd_mirror_daemon::state::{AppConfig, AppState, DEFAULT_PORT};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Directory to keep in sync
    #[arg(short, long)]
    pub folder: Option<PathBuf>,

    /// Root key to mirror (empty mirrors the whole keyspace)
    #[arg(short, long, default_value = "")]
    pub key: String,

    /// etcd endpoints, comma separated
    #[arg(long, value_delimiter = ',')]
    pub etcd: Vec<String>,

    /// HTTP port for the manual override API
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds between local scans
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Directory for daily rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Overwrite an existing config.toml
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug)]
pub struct InitOutput {
    pub config_path: PathBuf,
    pub folder: Option<PathBuf>,
    pub key: String,
    pub etcd: Vec<String>,
    pub port: u16,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} etcd-mirror config at {}",
            "Initialized".green().bold(),
            self.config_path.display().to_string().bold()
        )?;
        let folder = match &self.folder {
            Some(folder) => folder.display().to_string(),
            None => "(not set, pass --folder to daemon)".to_string(),
        };
        writeln!(f, "  {} {}", "Folder:".dimmed(), folder)?;
        writeln!(f, "  {} {:?}", "Root key:".dimmed(), self.key)?;
        let etcd = if self.etcd.is_empty() {
            "(not set, pass --etcd to daemon)".to_string()
        } else {
            self.etcd.join(", ")
        };
        writeln!(f, "  {} {}", "etcd:".dimmed(), etcd)?;
        write!(f, "  {} {}", "Port:".dimmed(), self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] etcd_mirror_daemon::state::StateError),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let defaults = AppConfig::default();
        let folder = match &self.folder {
            Some(folder) => Some(crate::cli::op::absolute(folder)?),
            None => None,
        };

        let config = AppConfig {
            folder,
            key: self.key.clone(),
            etcd: self.etcd.clone(),
            port: self.port,
            poll_interval_secs: self.poll_interval.unwrap_or(defaults.poll_interval_secs),
            log_dir: self.log_dir.clone(),
            ..defaults
        };

        let state = AppState::init(ctx.config_path.clone(), config, self.force)?;

        Ok(InitOutput {
            config_path: state.config_path,
            folder: state.config.folder,
            key: state.config.key,
            etcd: state.config.etcd,
            port: state.config.port,
        })
    }
}
