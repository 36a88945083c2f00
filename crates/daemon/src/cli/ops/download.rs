use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use etcd_mirror_daemon::http_server::api::client::ApiError;
use etcd_mirror_daemon::http_server::api::files::download_file::DownloadFileRequest;

#[derive(Args, Debug, Clone)]
pub struct Download {
    /// Key prefix to fetch
    #[arg(short, long)]
    pub key: String,

    /// Directory to write matching keys into
    #[arg(short, long)]
    pub dir: PathBuf,
}

#[derive(Debug)]
pub struct DownloadOutput {
    pub key: String,
    pub dir: PathBuf,
}

impl fmt::Display for DownloadOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} keys under {} into {}",
            "Downloaded".green().bold(),
            self.key.bold(),
            self.dir.display()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download failed: {0}")]
    Api(#[from] ApiError),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Download {
    type Error = DownloadError;
    type Output = DownloadOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let dir = crate::cli::op::absolute(&self.dir)?;
        let mut client = ctx.client.clone();
        client
            .call(DownloadFileRequest {
                etcd_key: self.key.clone(),
                file_path: dir.clone(),
            })
            .await?;

        Ok(DownloadOutput {
            key: self.key.clone(),
            dir,
        })
    }
}
