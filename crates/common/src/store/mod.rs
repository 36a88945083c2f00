//! Remote key-value store abstraction
//!
//! The sync engine only needs three things from the store: a prefix read, a
//! point write, and a prefix-filtered change subscription. [`EtcdStore`] is
//! the production adapter; [`MemoryStore`] is an in-process implementation
//! with fault injection, used by the test suites.

use async_trait::async_trait;
use futures::stream::BoxStream;

mod etcd;
mod memory;

pub use etcd::{EtcdConfig, EtcdStore, DEFAULT_DIAL_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use memory::MemoryStore;

/// A key and its full content as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Result of a prefix read, with the store revision it was served at.
#[derive(Debug, Clone, Default)]
pub struct PrefixSnapshot {
    pub entries: Vec<Entry>,
    pub revision: i64,
}

/// A change delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Put {
        key: String,
        value: Vec<u8>,
        revision: i64,
    },
    Delete {
        key: String,
        revision: i64,
    },
}

impl ChangeEvent {
    pub fn key(&self) -> &str {
        match self {
            ChangeEvent::Put { key, .. } | ChangeEvent::Delete { key, .. } => key,
        }
    }

    pub fn revision(&self) -> i64 {
        match self {
            ChangeEvent::Put { revision, .. } | ChangeEvent::Delete { revision, .. } => *revision,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Put { .. } => "put",
            ChangeEvent::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connection failure or timeout talking to the store
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store received the request and refused it
    #[error("store rejected request: {0}")]
    Rejected(String),
    /// A subscription asked for history the store no longer keeps
    #[error("revision {requested} has been compacted (compact revision {compacted})")]
    Compacted { requested: i64, compacted: i64 },
}

impl StoreError {
    /// Only connectivity failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Infinite stream of change events. Ends (or yields an error) when the
/// underlying connection is lost; dropping it cancels the subscription.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

#[async_trait]
pub trait KvStore: std::fmt::Debug + Send + Sync {
    /// All entries whose key starts with `prefix`. No match is an empty
    /// snapshot, not an error.
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError>;

    /// Store the full `value` under `key`.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Subscribe to changes under `prefix`, starting at `start_revision` when
    /// given, otherwise at the current revision.
    async fn subscribe(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<ChangeStream, StoreError>;
}
