use std::sync::Arc;

use tokio::sync::watch;

use common::mirror::FsMirror;
use common::store::{EtcdStore, StoreError};
use common::sync::{SyncContext, WatcherState};

use crate::service_config::Config;

/// State shared with the HTTP handlers.
#[derive(Clone)]
pub struct State {
    sync: SyncContext,
    watcher: watch::Receiver<WatcherState>,
}

impl State {
    pub fn new(sync: SyncContext, watcher: watch::Receiver<WatcherState>) -> Self {
        Self { sync, watcher }
    }

    /// Connect to etcd and prepare the sync folder.
    pub async fn sync_context(config: &Config) -> Result<SyncContext, StateSetupError> {
        tokio::fs::create_dir_all(&config.folder)
            .await
            .map_err(|source| StateSetupError::Folder {
                path: config.folder.display().to_string(),
                source,
            })?;

        let store = EtcdStore::connect(&config.etcd).await?;
        tracing::info!(
            folder = %config.folder.display(),
            root_key = %config.root_key,
            "sync context ready"
        );

        Ok(
            SyncContext::new(Arc::new(store), FsMirror::new(&config.folder), &config.root_key)
                .with_retry(config.retry),
        )
    }

    pub fn sync(&self) -> &SyncContext {
        &self.sync
    }

    /// Current state of the remote watcher.
    pub fn watcher_state(&self) -> WatcherState {
        self.watcher.borrow().clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("cannot use sync folder {path}: {source}")]
    Folder {
        path: String,
        source: std::io::Error,
    },
    #[error("etcd connection failed: {0}")]
    Store(#[from] StoreError),
}
