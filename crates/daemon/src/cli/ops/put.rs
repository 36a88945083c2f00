use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use etcd_mirror_daemon::http_server::api::client::ApiError;
use etcd_mirror_daemon::http_server::api::files::put_file::PutFileRequest;

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Key to store the file under
    #[arg(short, long)]
    pub key: String,

    /// File to upload
    #[arg(short, long)]
    pub file: PathBuf,
}

#[derive(Debug)]
pub struct PutOutput {
    pub key: String,
    pub file: PathBuf,
}

impl fmt::Display for PutOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} to {}",
            "Uploaded".green().bold(),
            self.file.display(),
            self.key.bold()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error("upload failed: {0}")]
    Api(#[from] ApiError),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = PutOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let file = crate::cli::op::absolute(&self.file)?;
        let mut client = ctx.client.clone();
        client
            .call(PutFileRequest {
                etcd_key: self.key.clone(),
                file_path: file.clone(),
            })
            .await?;

        Ok(PutOutput {
            key: self.key.clone(),
            file,
        })
    }
}
