use std::net::SocketAddr;
use std::path::PathBuf;

use common::retry::RetryPolicy;
use common::store::EtcdConfig;
use common::sync::PollerConfig;

/// Everything needed to run the sync service, resolved from the config file
/// and command-line overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local directory kept in sync
    pub folder: PathBuf,
    /// Key prefix kept in sync
    pub root_key: String,
    pub etcd: EtcdConfig,
    /// Address for the manual override HTTP interface
    pub listen_addr: SocketAddr,
    pub poller: PollerConfig,
    /// Backoff for store reads and writes
    pub retry: RetryPolicy,
    /// Backoff between watcher sessions
    pub reconnect: RetryPolicy,
    pub max_reconnects: Option<u32>,
    pub log_level: tracing::Level,
    pub log_dir: Option<PathBuf>,
}
