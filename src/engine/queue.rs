//! Persisted outbound queue of sync messages awaiting a dashboard tab.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    config::{Config, OverflowPolicy},
    storage::{self, LocalStore, KEY_PENDING_UPSERTS},
};

use super::{
    delivery::MessageDeliverer,
    errors::{QueueError, StorageError},
    message::{SyncMessage, SyncPayload},
    tabs::TabLocator,
};

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_retries: u8,
    pub max_len: usize,
    pub overflow: OverflowPolicy,
}

impl From<&Config> for QueueSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            max_len: config.max_queue_len,
            overflow: config.overflow,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<SyncMessage>,
    dropped: u64,
    /// Bumped by `clear`; a flush that straddles a clear must not put its
    /// batch back.
    epoch: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub pending: Vec<SyncMessage>,
    /// Messages discarded after exhausting their retries or by overflow.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// No dashboard tab was open; the queue was left untouched.
    pub skipped: bool,
}

pub struct OutboundQueue {
    store: Arc<dyn LocalStore>,
    settings: QueueSettings,
    state: Mutex<QueueState>,
    flushing: AtomicBool,
}

impl OutboundQueue {
    pub fn new(store: Arc<dyn LocalStore>, settings: QueueSettings) -> Self {
        Self {
            store,
            settings,
            state: Mutex::new(QueueState::default()),
            flushing: AtomicBool::new(false),
        }
    }

    /// Replaces the in-memory queue with what was persisted. Call once at
    /// startup, before anything is enqueued.
    pub async fn load(&self) -> Result<usize, StorageError> {
        let pending: Vec<SyncMessage> =
            match storage::load(self.store.as_ref(), KEY_PENDING_UPSERTS).await {
                Ok(pending) => pending.unwrap_or_default(),
                Err(StorageError::Malformed { source, .. }) => {
                    log::error!("discarding unreadable {KEY_PENDING_UPSERTS}: {source}");
                    vec![]
                }
                Err(err) => return Err(err),
            };

        let mut state = self.state.lock().await;
        state.pending = pending;
        log::info!("rehydrated {} pending sync messages", state.pending.len());

        Ok(state.pending.len())
    }

    pub async fn persist(&self) -> Result<(), StorageError> {
        let state = self.state.lock().await;
        self.write(&state).await
    }

    async fn write(&self, state: &QueueState) -> Result<(), StorageError> {
        storage::save(self.store.as_ref(), KEY_PENDING_UPSERTS, &state.pending).await
    }

    pub async fn enqueue(&self, payload: SyncPayload) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;

        if state.pending.len() >= self.settings.max_len {
            match self.settings.overflow {
                OverflowPolicy::Reject => return Err(QueueError::Full(state.pending.len())),
                OverflowPolicy::EvictOldest => {
                    let evicted = state.pending.remove(0);
                    state.dropped += 1;
                    log::warn!(
                        "outbound queue full, evicting {} {}",
                        evicted.payload.kind(),
                        evicted.id
                    );
                }
            }
        }

        let message = SyncMessage::new(payload);
        log::debug!("queued {} {}", message.payload.kind(), message.id);
        state.pending.push(message);

        Ok(self.write(&state).await?)
    }

    /// Redelivers every pending message to the open dashboard tabs.
    pub async fn flush(&self, locator: &TabLocator, deliverer: &MessageDeliverer) -> FlushReport {
        if self.flushing.swap(true, Ordering::AcqRel) {
            log::debug!("flush already running");
            return FlushReport {
                skipped: true,
                ..Default::default()
            };
        }

        let report = self.flush_inner(locator, deliverer).await;
        self.flushing.store(false, Ordering::Release);

        report
    }

    async fn flush_inner(&self, locator: &TabLocator, deliverer: &MessageDeliverer) -> FlushReport {
        if self.is_empty().await {
            return FlushReport::default();
        }

        let tabs = locator.locate().await;
        if tabs.is_empty() {
            log::debug!("no dashboard tab open, leaving queue as is");
            return FlushReport {
                skipped: true,
                ..Default::default()
            };
        }

        let (batch, epoch) = {
            let mut state = self.state.lock().await;
            (std::mem::take(&mut state.pending), state.epoch)
        };
        let mut report = FlushReport {
            attempted: batch.len(),
            ..Default::default()
        };

        let mut retry = Vec::new();
        for mut message in batch {
            let wire = match message.payload.to_wire() {
                Ok(wire) => wire,
                Err(err) => {
                    log::error!(
                        "dropping unencodable {} {}: {err}",
                        message.payload.kind(),
                        message.id
                    );
                    report.dropped += 1;
                    continue;
                }
            };
            let outcome = deliverer.broadcast(&tabs, &wire).await;

            if outcome.any_delivered() {
                report.delivered += 1;
                continue;
            }

            message.retries = message.retries.saturating_add(1);
            if message.retries > self.settings.max_retries {
                log::warn!(
                    "dropping {} {} after {} failed deliveries",
                    message.payload.kind(),
                    message.id,
                    message.retries
                );
                report.dropped += 1;
            } else {
                retry.push(message);
            }
        }
        report.requeued = retry.len();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            log::info!("queue cleared during flush, discarding {} undelivered", retry.len());
            retry.clear();
            report.requeued = 0;
        }
        state.dropped += report.dropped as u64;
        // retried messages go back ahead of anything enqueued mid-flush
        retry.append(&mut state.pending);
        state.pending = retry;
        if let Err(err) = self.write(&state).await {
            log::error!("failed to persist queue after flush: {err}");
        }

        log::info!(
            "flush: {} delivered, {} requeued, {} dropped",
            report.delivered,
            report.requeued,
            report.dropped
        );
        report
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.epoch += 1;
        self.store.remove(KEY_PENDING_UPSERTS).await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    pub async fn dropped(&self) -> u64 {
        self.state.lock().await.dropped
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        QueueSnapshot {
            pending: state.pending.clone(),
            dropped: state.dropped,
        }
    }
}
