use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use etcd_mirror_daemon::http_server::api::client::ApiError;
use etcd_mirror_daemon::http_server::health::liveness::LivezRequest;
use etcd_mirror_daemon::http_server::health::readiness::ReadyzRequest;
use etcd_mirror_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Health;

#[derive(Debug)]
pub struct ConfigInfo {
    pub config_path: PathBuf,
    pub folder: Option<PathBuf>,
    pub key: String,
    pub etcd: Vec<String>,
    pub port: u16,
}

#[derive(Debug)]
pub enum EndpointStatus {
    Ok,
    Unhealthy(String),
    NotReachable,
}

impl From<Result<(), ApiError>> for EndpointStatus {
    fn from(result: Result<(), ApiError>) -> Self {
        match result {
            Ok(()) => EndpointStatus::Ok,
            Err(ApiError::HttpStatus(status, body)) => {
                EndpointStatus::Unhealthy(format!("{} {}", status, body))
            }
            Err(ApiError::Reqwest(_)) => EndpointStatus::NotReachable,
        }
    }
}

#[derive(Debug)]
pub struct DaemonInfo {
    pub url: String,
    pub livez: EndpointStatus,
    pub readyz: EndpointStatus,
    pub watcher: Option<String>,
}

#[derive(Debug)]
pub struct HealthOutput {
    pub config: Option<ConfigInfo>,
    pub config_error: Option<String>,
    pub daemon: DaemonInfo,
}

impl fmt::Display for HealthOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", "Config".bold())?;
        match &self.config {
            Some(info) => {
                writeln!(
                    f,
                    "  {} {}",
                    "config.toml:".dimmed(),
                    info.config_path.display()
                )?;
                let folder = info
                    .folder
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string());
                writeln!(f, "  {} {}", "folder:".dimmed(), folder)?;
                writeln!(f, "  {} {:?}", "key:".dimmed(), info.key)?;
                writeln!(f, "  {} {}", "etcd:".dimmed(), info.etcd.join(", "))?;
                writeln!(f, "  {} {}", "port:".dimmed(), info.port)?;
            }
            None => {
                if let Some(err) = &self.config_error {
                    writeln!(f, "  {} {}", "error:".red(), err)?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "{} ({}):", "Daemon".bold(), self.daemon.url)?;

        let status_str = |s: &EndpointStatus| -> String {
            match s {
                EndpointStatus::Ok => "OK".green().to_string(),
                EndpointStatus::Unhealthy(reason) => {
                    format!("{} ({})", "UNHEALTHY".red(), reason)
                }
                EndpointStatus::NotReachable => "NOT REACHABLE".red().to_string(),
            }
        };

        writeln!(
            f,
            "  {} {}",
            "livez:".dimmed(),
            status_str(&self.daemon.livez)
        )?;
        write!(
            f,
            "  {} {}",
            "readyz:".dimmed(),
            status_str(&self.daemon.readyz)
        )?;
        if let Some(watcher) = &self.daemon.watcher {
            write!(f, "\n  {} {}", "watcher:".dimmed(), watcher)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("Health check failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = HealthError;
    type Output = HealthOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (config, config_error) = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => (
                Some(ConfigInfo {
                    config_path: state.config_path,
                    folder: state.config.folder,
                    key: state.config.key,
                    etcd: state.config.etcd,
                    port: state.config.port,
                }),
                None,
            ),
            Err(e) => (None, Some(e.to_string())),
        };

        let mut client = ctx.client.clone();
        let livez = EndpointStatus::from(client.call(LivezRequest {}).await.map(|_| ()));

        let (readyz, watcher) = match client.call(ReadyzRequest {}).await {
            Ok(response) => (EndpointStatus::Ok, Some(response.watcher)),
            Err(e) => (EndpointStatus::from(Err::<(), _>(e)), None),
        };

        Ok(HealthOutput {
            config,
            config_error,
            daemon: DaemonInfo {
                url: ctx.client.base_url().to_string(),
                livez,
                readyz,
                watcher,
            },
        })
    }
}
