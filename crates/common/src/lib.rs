//! Reconciliation core for etcd-mirror
//!
//! Keeps a local directory tree and an etcd key prefix consistent in both
//! directions:
//!
//! - [`sync::bootstrap`] materializes every key under the root key on disk
//! - [`sync::watcher`] applies remote change events to the filesystem
//! - [`sync::poller`] detects local edits by modification time and uploads them
//! - [`sync::manual`] exposes single-shot upload/download for operators
//!
//! The [`ledger::ChangeLedger`] is the only state shared between these
//! activities. Every remote-to-local write records the resulting modification
//! time in the ledger while holding its lock, which is what keeps the poller
//! from re-uploading the engine's own writes.

pub mod keyspace;
pub mod ledger;
pub mod mirror;
pub mod retry;
pub mod store;
pub mod sync;

pub mod prelude {
    pub use crate::keyspace::{key_to_path, path_to_key, KeyspaceError, RelativePath};
    pub use crate::ledger::ChangeLedger;
    pub use crate::mirror::{FsMirror, MirrorError};
    pub use crate::retry::RetryPolicy;
    pub use crate::store::{ChangeEvent, Entry, KvStore, PrefixSnapshot, StoreError};
    pub use crate::sync::{SyncContext, SyncError};
}
