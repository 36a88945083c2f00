//! In-process store with revisions and fault injection

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use super::{ChangeEvent, ChangeStream, Entry, KvStore, PrefixSnapshot, StoreError};

/// Store kept entirely in memory.
///
/// Mirrors the etcd semantics the engine relies on: a global revision bumped
/// by every write, prefix reads, and subscriptions that can replay history
/// from a start revision. Faults can be injected per key (rejection) or for
/// the whole store (unavailability, dropped subscriptions, compaction).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Vec<u8>>,
    revision: i64,
    compacted: i64,
    history: Vec<ChangeEvent>,
    subscribers: Vec<Subscriber>,
    rejected: HashSet<String>,
    unavailable: bool,
    accepted_puts: Vec<String>,
}

#[derive(Debug)]
struct Subscriber {
    prefix: String,
    tx: flume::Sender<Result<ChangeEvent, StoreError>>,
}

impl Inner {
    fn apply(&mut self, event: ChangeEvent) {
        self.history.push(event.clone());
        self.subscribers.retain(|sub| {
            if sub.tx.is_disconnected() {
                return false;
            }
            if event.key().starts_with(&sub.prefix) {
                let _ = sub.tx.send(Ok(event.clone()));
            }
            true
        });
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key` as if another client had put it. Returns the new revision.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> i64 {
        let mut inner = self.inner.lock();
        let key = key.into();
        let value = value.into();
        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(key.clone(), value.clone());
        inner.apply(ChangeEvent::Put {
            key,
            value,
            revision,
        });
        revision
    }

    /// Delete `key` as if another client had removed it. Returns whether it
    /// existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.remove(key).is_none() {
            return false;
        }
        inner.revision += 1;
        let revision = inner.revision;
        inner.apply(ChangeEvent::Delete {
            key: key.to_string(),
            revision,
        });
        true
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn revision(&self) -> i64 {
        self.inner.lock().revision
    }

    /// Make every future `put` of `key` fail with `Rejected`.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.inner.lock().rejected.insert(key.into());
    }

    /// Toggle whole-store unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// End every open subscription, as a lost connection would.
    pub fn drop_subscribers(&self) {
        self.inner.lock().subscribers.clear();
    }

    /// Forget history up to and including `revision`.
    pub fn compact(&self, revision: i64) {
        let mut inner = self.inner.lock();
        inner.compacted = revision;
        inner.history.retain(|event| event.revision() > revision);
    }

    /// Keys of every `put` the store accepted through [`KvStore::put`], in
    /// order.
    pub fn accepted_puts(&self) -> Vec<String> {
        self.inner.lock().accepted_puts.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|sub| !sub.tx.is_disconnected());
        inner.subscribers.len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError> {
        let inner = self.inner.lock();
        inner.check_available()?;
        let entries = inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| Entry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(PrefixSnapshot {
            entries,
            revision: inner.revision,
        })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        if inner.rejected.contains(key) {
            return Err(StoreError::Rejected(format!("put of {key} refused")));
        }
        inner.revision += 1;
        let revision = inner.revision;
        inner.entries.insert(key.to_string(), value.clone());
        inner.accepted_puts.push(key.to_string());
        inner.apply(ChangeEvent::Put {
            key: key.to_string(),
            value,
            revision,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        prefix: &str,
        start_revision: Option<i64>,
    ) -> Result<ChangeStream, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;

        let (tx, rx) = flume::unbounded();
        if let Some(start) = start_revision {
            if start <= inner.compacted {
                return Err(StoreError::Compacted {
                    requested: start,
                    compacted: inner.compacted,
                });
            }
            for event in inner
                .history
                .iter()
                .filter(|event| event.revision() >= start && event.key().starts_with(prefix))
            {
                let _ = tx.send(Ok(event.clone()));
            }
        }
        inner.subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(rx.into_stream().boxed())
    }
}
