//! Offset-tracked event poller.
//!
//! The poller reads pages of events past an in-memory polling offset and
//! hands each page to an [`EventBatchHandler`]. It owns three concerns the
//! delivery engine depends on:
//!
//! - **Offset identity**: non-ephemeral pollers load a durable offset at
//!   startup (with bounded retries) and persist it when a handler requests a
//!   full-batch commit. Ephemeral pollers start at the store's latest
//!   sequence and never persist.
//! - **Rewind**: [`rewind_polling_offset`](EventPoller::rewind_polling_offset)
//!   moves the in-memory offset backwards so rejected events are re-read on
//!   the next cycle.
//! - **Retry**: failed polls and failed batch deliveries back off and retry
//!   here; the handler itself never retries.
//!
//! The poller signals `closed` exactly once, when its loop exits (or when the
//! owning dispatcher shuts down before the loop ever started).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::dispatch::error::DispatchError;
use crate::retry::RetryPolicy;
use crate::store::{OffsetKind, Store};
use crate::types::Event;

/// Receives each page of newly polled events.
#[async_trait]
pub trait EventBatchHandler: Send + Sync {
    /// Handles one page of events, in increasing sequence order.
    ///
    /// The poller also invokes the handler with an empty page once per idle
    /// cycle, so the handler can make progress on work that arrives between
    /// pages (e.g. late delivery responses).
    ///
    /// Returns `Ok(true)` to request a full-batch offset commit, `Ok(false)`
    /// when offset advancement is driven by finer-grained bookkeeping.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Closing`] stops the poller; any other error makes the
    /// poller re-deliver the page after backoff.
    async fn events_available(&self, events: Vec<Event>) -> Result<bool, DispatchError>;
}

/// Configuration for one poller instance.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Namespace to poll events from.
    pub namespace: String,
    /// Durable offset name (the subscription name).
    pub offset_name: String,
    /// Ephemeral pollers keep no durable offset and start at latest.
    pub ephemeral: bool,
    /// Maximum events per page.
    pub batch_size: usize,
    /// Idle sleep when no new events are available.
    pub poll_interval: Duration,
    /// Attempts to resolve the starting offset before giving up.
    pub startup_offset_retry_attempts: u32,
    /// Backoff for failed polls and failed batch deliveries.
    pub retry: RetryPolicy,
}

/// Polls the store for new events past a tracked offset.
pub struct EventPoller {
    store: Arc<dyn Store>,
    config: PollerConfig,
    offset: AtomicI64,
    shutdown: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl EventPoller {
    /// Creates a poller bound to `store`, observing `shutdown`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: PollerConfig, shutdown: watch::Receiver<bool>) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            store,
            config,
            offset: AtomicI64::new(0),
            shutdown,
            closed_tx,
            closed_rx,
        }
    }

    /// Returns the current in-memory polling offset.
    #[must_use]
    pub fn polling_offset(&self) -> i64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Rewinds the polling offset so events after `sequence` are re-read.
    ///
    /// Only moves backwards; a rewind past the current offset is ignored.
    pub fn rewind_polling_offset(&self, sequence: i64) {
        let mut current = self.offset.load(Ordering::Acquire);
        while sequence < current {
            match self.offset.compare_exchange_weak(
                current,
                sequence,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(from = current, to = sequence, "Rewound polling offset");
                    break;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Completes once the poller has signalled closure.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        // Sender lives on self, so wait_for only fails after mark_closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Positions the offset directly, as the poll loop does after a page.
    #[cfg(test)]
    pub(crate) fn set_polling_offset(&self, sequence: i64) {
        self.offset.store(sequence, Ordering::Release);
    }

    /// Marks the poller closed without running it.
    ///
    /// Used by the owning dispatcher when shutdown wins the election race and
    /// the poll loop never starts.
    pub(crate) fn mark_closed(&self) {
        let _ = self.closed_tx.send(true);
    }

    /// Runs the poll loop until shutdown, signalling `closed` on exit.
    pub async fn run(&self, handler: Arc<dyn EventBatchHandler>) {
        if let Err(err) = self.resolve_start_offset().await {
            error!(error = %err, "Could not resolve starting offset; poller exiting");
            self.mark_closed();
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let from = self.polling_offset();
            let page = match self
                .store
                .events_after(&self.config.namespace, from, self.config.batch_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    attempt += 1;
                    warn!(error = %err, attempt, "Event poll failed");
                    if self.sleep_or_shutdown(self.config.retry.delay(attempt)).await {
                        break;
                    }
                    continue;
                }
            };

            // Advance optimistically; a nack rewinds through us before the
            // handler returns. An empty page is still handed over as an idle
            // tick, letting the handler flush late delivery responses.
            let idle = page.is_empty();
            if let Some(last) = page.last() {
                self.offset.store(last.sequence, Ordering::Release);
            }

            match handler.events_available(page).await {
                Ok(commit) => {
                    attempt = 0;
                    if commit {
                        self.commit_offset().await;
                    }
                    if idle && self.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
                Err(DispatchError::Closing) => break,
                Err(err) => {
                    attempt += 1;
                    warn!(error = %err, attempt, "Batch delivery failed; will re-poll");
                    // Re-deliver the page, honoring any deeper rewind the
                    // handler performed.
                    self.rewind_polling_offset(from);
                    if self.sleep_or_shutdown(self.config.retry.delay(attempt)).await {
                        break;
                    }
                }
            }
        }

        debug!("Event poller exiting");
        self.mark_closed();
    }

    /// Resolves the starting offset, retrying per the startup policy.
    async fn resolve_start_offset(&self) -> anyhow::Result<()> {
        let attempts = self.config.startup_offset_retry_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.load_start_offset().await {
                Ok(offset) => {
                    self.offset.store(offset, Ordering::Release);
                    debug!(offset, ephemeral = self.config.ephemeral, "Poller starting");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, attempt, "Failed to load starting offset");
                    last_err = Some(err);
                    if attempt < attempts
                        && self.sleep_or_shutdown(self.config.retry.delay(attempt)).await
                    {
                        break;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("offset startup interrupted")))
    }

    /// Loads the durable offset, or initializes at the latest sequence.
    async fn load_start_offset(&self) -> anyhow::Result<i64> {
        if self.config.ephemeral {
            return self.store.latest_sequence(&self.config.namespace).await;
        }
        if let Some(offset) = self
            .store
            .offset(
                OffsetKind::Subscription,
                &self.config.namespace,
                &self.config.offset_name,
            )
            .await?
        {
            return Ok(offset);
        }
        // New subscriptions start at latest; they do not replay history.
        let latest = self.store.latest_sequence(&self.config.namespace).await?;
        self.store
            .put_offset(
                OffsetKind::Subscription,
                &self.config.namespace,
                &self.config.offset_name,
                latest,
            )
            .await?;
        Ok(latest)
    }

    /// Persists the current offset for non-ephemeral pollers.
    async fn commit_offset(&self) {
        self.commit_to(self.polling_offset()).await;
    }

    /// Persists `sequence` as the durable offset for non-ephemeral pollers.
    ///
    /// Used by the dispatcher's ack bookkeeping: the durable offset advances
    /// per acknowledged event, independently of the in-memory polling offset.
    pub(crate) async fn commit_to(&self, sequence: i64) {
        if self.config.ephemeral {
            return;
        }
        if let Err(err) = self
            .store
            .put_offset(
                OffsetKind::Subscription,
                &self.config.namespace,
                &self.config.offset_name,
                sequence,
            )
            .await
        {
            // Benign: the offset is re-persisted on the next commit.
            warn!(error = %err, sequence, "Failed to persist offset");
        }
    }

    /// Sleeps for `duration`, returning `true` if shutdown fired first.
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.wait_for(|closing| *closing) => true,
        }
    }
}

impl std::fmt::Debug for EventPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPoller")
            .field("namespace", &self.config.namespace)
            .field("offset_name", &self.config.offset_name)
            .field("polling_offset", &self.polling_offset())
            .finish()
    }
}
