//! etcd adapter

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, EventType, GetOptions, WatchOptions, WatchResponse, WatchStream,
    Watcher,
};
use tonic::Code;

use super::{ChangeEvent, ChangeStream, Entry, KvStore, PrefixSnapshot, StoreError};

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// Bound on establishing the connection
    pub dial_timeout: Duration,
    /// Bound on each read or write; never applied to watches
    pub request_timeout: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
    request_timeout: Duration,
}

impl fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoints", &self.endpoints)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl EtcdStore {
    pub async fn connect(config: &EtcdConfig) -> Result<Self, StoreError> {
        // The request timeout is enforced per call below; setting it on the
        // channel would also cut long-lived watches.
        let options = ConnectOptions::new().with_connect_timeout(config.dial_timeout);
        let client = tokio::time::timeout(
            config.dial_timeout,
            Client::connect(config.endpoints.clone(), Some(options)),
        )
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "timed out after {:?} connecting to {:?}",
                config.dial_timeout, config.endpoints
            ))
        })?
        .map_err(map_error)?;

        tracing::info!(endpoints = ?config.endpoints, "connected to etcd");

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            request_timeout: config.request_timeout,
        })
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, etcd_client::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(map_error),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{} timed out after {:?}",
                op, self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError> {
        let mut client = self.client.clone();
        let response = self
            .bounded(
                "get",
                client.get(prefix, Some(GetOptions::new().with_prefix())),
            )
            .await?;

        let revision = response.header().map(|h| h.revision()).unwrap_or_default();
        let mut entries = Vec::with_capacity(response.kvs().len());
        for kv in response.kvs() {
            match kv.key_str() {
                Ok(key) => entries.push(Entry {
                    key: key.to_string(),
                    value: kv.value().to_vec(),
                }),
                Err(_) => {
                    tracing::warn!(key = ?kv.key(), "skipping non UTF-8 key");
                }
            }
        }

        Ok(PrefixSnapshot { entries, revision })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        self.bounded("put", client.put(key, value, None)).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<ChangeStream, StoreError> {
        let mut options = WatchOptions::new().with_prefix();
        if let Some(revision) = start_revision {
            options = options.with_start_revision(revision);
        }

        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(map_error)?;

        let state = WatchState {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
            requested: start_revision.unwrap_or_default(),
            done: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, next_event)))
    }
}

/// Owns the watcher so that dropping the stream cancels the watch.
struct WatchState {
    _watcher: Watcher,
    stream: WatchStream,
    pending: VecDeque<ChangeEvent>,
    requested: i64,
    done: bool,
}

async fn next_event(
    mut state: WatchState,
) -> Option<(Result<ChangeEvent, StoreError>, WatchState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((Ok(event), state));
        }
        if state.done {
            return None;
        }

        match state.stream.message().await {
            Ok(Some(response)) => {
                if response.canceled() {
                    state.done = true;
                    let err = cancel_error(response.compact_revision(), state.requested);
                    return Some((Err(err), state));
                }
                state.pending.extend(convert_events(&response));
            }
            Ok(None) => return None,
            Err(e) => {
                state.done = true;
                return Some((Err(map_error(e)), state));
            }
        }
    }
}

fn cancel_error(compact_revision: i64, requested: i64) -> StoreError {
    if compact_revision > 0 {
        StoreError::Compacted {
            requested,
            compacted: compact_revision,
        }
    } else {
        StoreError::Unavailable("watch canceled by server".to_string())
    }
}

fn convert_events(response: &WatchResponse) -> Vec<ChangeEvent> {
    response
        .events()
        .iter()
        .filter_map(|event| {
            let kv = event.kv()?;
            change_event(event.event_type(), kv.key(), kv.value(), kv.mod_revision())
        })
        .collect()
}

fn change_event(
    kind: EventType,
    key: &[u8],
    value: &[u8],
    revision: i64,
) -> Option<ChangeEvent> {
    let Ok(key) = std::str::from_utf8(key) else {
        tracing::warn!(key = ?key, "skipping event for non UTF-8 key");
        return None;
    };
    Some(match kind {
        EventType::Put => ChangeEvent::Put {
            key: key.to_string(),
            value: value.to_vec(),
            revision,
        },
        EventType::Delete => ChangeEvent::Delete {
            key: key.to_string(),
            revision,
        },
    })
}

fn map_error(err: etcd_client::Error) -> StoreError {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            Code::InvalidArgument
            | Code::FailedPrecondition
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::OutOfRange
            | Code::ResourceExhausted
            | Code::AlreadyExists
            | Code::NotFound
            | Code::Unimplemented => StoreError::Rejected(status.message().to_string()),
            _ => StoreError::Unavailable(status.to_string()),
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tonic::Status;

    use super::*;

    #[test]
    fn test_map_error_classifies_grpc_codes() {
        let rejected = [
            Code::InvalidArgument,
            Code::FailedPrecondition,
            Code::PermissionDenied,
            Code::Unauthenticated,
            Code::OutOfRange,
            Code::ResourceExhausted,
            Code::AlreadyExists,
            Code::NotFound,
            Code::Unimplemented,
        ];
        for code in rejected {
            let err = map_error(etcd_client::Error::GRpcStatus(Status::new(code, "nope")));
            assert_eq!(err, StoreError::Rejected("nope".to_string()), "{code:?}");
            assert!(!err.is_transient());
        }

        let transient = [
            Code::Unavailable,
            Code::DeadlineExceeded,
            Code::Aborted,
            Code::Internal,
            Code::Unknown,
            Code::Cancelled,
        ];
        for code in transient {
            let err = map_error(etcd_client::Error::GRpcStatus(Status::new(code, "later")));
            assert!(err.is_transient(), "{code:?} should be retried");
        }
    }

    #[test]
    fn test_map_error_transport_failures_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = map_error(etcd_client::Error::IoError(io));
        assert!(err.is_transient());
    }

    #[test]
    fn test_cancel_error() {
        assert_eq!(
            cancel_error(40, 12),
            StoreError::Compacted {
                requested: 12,
                compacted: 40
            }
        );
        assert!(cancel_error(0, 12).is_transient());
    }

    #[test]
    fn test_change_event_conversion() {
        assert_eq!(
            change_event(EventType::Put, b"a/b.txt", b"hello", 7),
            Some(ChangeEvent::Put {
                key: "a/b.txt".to_string(),
                value: b"hello".to_vec(),
                revision: 7,
            })
        );
        assert_eq!(
            change_event(EventType::Delete, b"a/b.txt", b"", 8),
            Some(ChangeEvent::Delete {
                key: "a/b.txt".to_string(),
                revision: 8,
            })
        );
        assert_eq!(change_event(EventType::Put, &[0xff, 0xfe], b"x", 9), None);
    }
}
