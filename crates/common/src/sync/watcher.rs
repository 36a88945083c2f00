//! Remote-to-local propagation
//!
//! A [`RemoteWatcher`] session walks `Subscribing -> Consuming` and ends in
//! either `Terminated` (shutdown was requested) or `Faulted` (the change
//! stream failed or simply ended). A stream ending on its own is always a
//! fault: remote changes would otherwise stop arriving while the process
//! looks healthy. [`WatchSupervisor`] turns faults into reconnects with
//! backoff, resuming from the last applied revision.

use futures::StreamExt;
use tokio::sync::watch;

use crate::keyspace::RelativePath;
use crate::retry::RetryPolicy;
use crate::store::{ChangeEvent, StoreError};

use super::bootstrap::reload;
use super::{SyncContext, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Subscribing,
    Consuming,
    Terminated,
    Faulted(WatchFault),
}

impl WatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherState::Subscribing => "subscribing",
            WatcherState::Consuming => "consuming",
            WatcherState::Terminated => "terminated",
            WatcherState::Faulted(_) => "faulted",
        }
    }
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatcherState::Faulted(fault) => write!(f, "faulted: {}", fault),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchFault {
    #[error("subscription failed: {0}")]
    Subscribe(StoreError),
    #[error("change stream failed: {0}")]
    Stream(StoreError),
    #[error("change stream ended unexpectedly")]
    StreamEnded,
}

impl WatchFault {
    /// The requested start revision is gone; only a fresh snapshot recovers.
    pub fn is_compacted(&self) -> bool {
        matches!(
            self,
            WatchFault::Subscribe(StoreError::Compacted { .. })
                | WatchFault::Stream(StoreError::Compacted { .. })
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("remote watcher gave up after {attempts} consecutive failed sessions: {last}")]
pub struct WatchExhausted {
    pub attempts: u32,
    pub last: WatchFault,
}

/// What applying one change event did to the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Written(RelativePath),
    Removed(RelativePath),
    AlreadyAbsent(RelativePath),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    pub written: u64,
    pub removed: u64,
    pub already_absent: u64,
    pub failed: u64,
}

impl WatchStats {
    /// Events that changed (or confirmed) local state.
    pub fn applied(&self) -> u64 {
        self.written + self.removed + self.already_absent
    }
}

pub struct RemoteWatcher {
    ctx: SyncContext,
    next_revision: Option<i64>,
    stats: WatchStats,
    state: watch::Sender<WatcherState>,
}

impl RemoteWatcher {
    /// Watcher that will subscribe from `start_revision`, or from the
    /// current revision when `None`.
    pub fn new(ctx: SyncContext, start_revision: Option<i64>) -> Self {
        let (state, _) = watch::channel(WatcherState::Subscribing);
        Self {
            ctx,
            next_revision: start_revision,
            stats: WatchStats::default(),
            state,
        }
    }

    /// Publish state transitions on an existing channel.
    pub fn with_state_channel(mut self, state: watch::Sender<WatcherState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> WatchStats {
        self.stats
    }

    pub fn next_revision(&self) -> Option<i64> {
        self.next_revision
    }

    pub fn resume_from(&mut self, revision: Option<i64>) {
        self.next_revision = revision;
    }

    /// Run one subscription until shutdown or a fault.
    pub async fn run_session(&mut self, shutdown: &mut watch::Receiver<()>) -> WatcherState {
        self.publish(WatcherState::Subscribing);

        let store = self.ctx.store().clone();
        let root_key = self.ctx.root_key().to_string();
        let from = self.next_revision;

        let mut stream = tokio::select! {
            _ = shutdown.changed() => return self.finish(WatcherState::Terminated),
            result = store.subscribe(&root_key, from) => match result {
                Ok(stream) => stream,
                Err(err) => return self.finish(WatcherState::Faulted(WatchFault::Subscribe(err))),
            },
        };

        self.publish(WatcherState::Consuming);
        tracing::info!(root_key = %root_key, from_revision = from, "watching for remote changes");

        loop {
            tokio::select! {
                _ = shutdown.changed() => return self.finish(WatcherState::Terminated),
                next = stream.next() => match next {
                    Some(Ok(event)) => self.handle(event).await,
                    Some(Err(err)) => {
                        return self.finish(WatcherState::Faulted(WatchFault::Stream(err)))
                    }
                    None => return self.finish(WatcherState::Faulted(WatchFault::StreamEnded)),
                },
            }
        }
    }

    /// Apply a single event to the mirror.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<EventOutcome, SyncError> {
        match event {
            ChangeEvent::Put { key, value, .. } => self
                .ctx
                .write_entry(key, value)
                .await
                .map(EventOutcome::Written),
            ChangeEvent::Delete { key, .. } => self.ctx.remove_entry(key).await,
        }
    }

    async fn handle(&mut self, event: ChangeEvent) {
        tracing::info!(
            event_type = event.kind(),
            key = %event.key(),
            revision = event.revision(),
            "remote change"
        );

        match self.apply(&event).await {
            Ok(EventOutcome::Written(_)) => self.stats.written += 1,
            Ok(EventOutcome::Removed(_)) => self.stats.removed += 1,
            Ok(EventOutcome::AlreadyAbsent(path)) => {
                tracing::debug!(path = %path, "deleted key had no local file");
                self.stats.already_absent += 1;
            }
            Err(err) => {
                tracing::error!(key = %event.key(), error = %err, "dropping remote change");
                self.stats.failed += 1;
            }
        }

        self.next_revision = Some(event.revision() + 1);
    }

    fn publish(&self, state: WatcherState) {
        self.state.send_replace(state);
    }

    fn finish(&self, state: WatcherState) -> WatcherState {
        match &state {
            WatcherState::Faulted(fault) => {
                tracing::warn!(fault = %fault, "remote watcher faulted")
            }
            _ => tracing::info!("remote watcher stopped"),
        }
        self.publish(state.clone());
        state
    }
}

/// Keeps a [`RemoteWatcher`] alive across faults.
pub struct WatchSupervisor {
    ctx: SyncContext,
    reconnect: RetryPolicy,
    max_reconnects: Option<u32>,
    state: watch::Sender<WatcherState>,
}

impl WatchSupervisor {
    pub fn new(ctx: SyncContext) -> Self {
        let (state, _) = watch::channel(WatcherState::Subscribing);
        Self {
            ctx,
            reconnect: RetryPolicy::reconnect(),
            max_reconnects: None,
            state,
        }
    }

    pub fn reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Give up after this many consecutive failed subscribe attempts.
    pub fn max_reconnects(mut self, max: Option<u32>) -> Self {
        self.max_reconnects = max;
        self
    }

    pub fn state_channel(mut self, state: watch::Sender<WatcherState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Run watcher sessions until shutdown. Returns an error only when the
    /// reconnect budget is exhausted.
    pub async fn run(
        self,
        start_revision: Option<i64>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<WatchStats, WatchExhausted> {
        let mut watcher = RemoteWatcher::new(self.ctx.clone(), start_revision)
            .with_state_channel(self.state.clone());
        let mut failures: u32 = 0;

        loop {
            let fault = match watcher.run_session(&mut shutdown).await {
                WatcherState::Faulted(fault) => fault,
                _ => break,
            };

            // only failed subscribes count against the budget
            if !matches!(fault, WatchFault::Subscribe(_)) {
                failures = 0;
            }
            failures += 1;

            if let Some(max) = self.max_reconnects {
                if failures > max {
                    return Err(WatchExhausted {
                        attempts: failures,
                        last: fault,
                    });
                }
            }

            if fault.is_compacted() {
                tracing::warn!("watch history compacted, reloading from a fresh snapshot");
                let report = reload(&self.ctx).await;
                report.log();
                watcher.resume_from(report.watch_from());
            }

            let delay = self.reconnect.delay_for(failures - 1);
            tracing::warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                resume_revision = watcher.next_revision(),
                "reconnecting remote watcher"
            );

            tokio::select! {
                _ = shutdown.changed() => {
                    self.state.send_replace(WatcherState::Terminated);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(watcher.stats())
    }
}
