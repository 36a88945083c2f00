use std::path::PathBuf;

use clap::Parser;
use url::Url;

use etcd_mirror_daemon::http_server::api::client::ApiClient;
use etcd_mirror_daemon::state::{AppState, DEFAULT_PORT};

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{Daemon, Download, Health, Init, Put};

crate::command_enum! {
    (Init, Init),
    (Daemon, Daemon),
    (Put, Put),
    (Download, Download),
    (Health, Health),
}

/// Mirror a local directory to an etcd key prefix and back.
#[derive(Parser, Debug)]
#[command(name = "etcd-mirror", version, about)]
struct Args {
    /// URL of a running daemon (default: http://localhost:<port from config>)
    #[arg(long, global = true)]
    remote: Option<Url>,

    /// Config directory (default: ~/.etcd-mirror)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn default_remote(config_dir: Option<PathBuf>) -> anyhow::Result<Url> {
    let port = AppState::load(config_dir)
        .map(|state| state.config.port)
        .unwrap_or(DEFAULT_PORT);
    Ok(Url::parse(&format!("http://localhost:{}", port))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let remote = match args.remote {
        Some(remote) => remote,
        None => default_remote(args.config_dir.clone())?,
    };
    let ctx = OpContext {
        client: ApiClient::new(&remote)?,
        config_path: args.config_dir,
    };

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
