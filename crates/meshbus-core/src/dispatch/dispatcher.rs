//! Per-subscription event delivery engine.
//!
//! An [`EventDispatcher`] owns one subscription-to-connection binding. It
//! drives an [`EventPoller`] (after winning the subscription's election),
//! enriches each polled page with the referenced messages and data, filters
//! it against the subscription's compiled regexes, and hands matching
//! deliveries to the transport under a read-ahead window:
//!
//! ```text
//!  poller page ──► enrich ──► filter ──► windowed dispatch ──► transport
//!                                            ▲      │
//!                                   ack/nack │      ▼ (blocks when window full)
//!                              delivery_response   in-flight table (≤ read_ahead + 1)
//! ```
//!
//! An ack evicts its in-flight entry; a nack rewinds the poller to the
//! rejected offset and clears the whole in-flight window, because downstream
//! ordering must be preserved and there is no partial-ack-after-nack.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::dispatch::error::DispatchError;
use crate::dispatch::poller::{EventBatchHandler, EventPoller, PollerConfig};
use crate::dispatch::subscription::Subscription;
use crate::services::EventTransport;
use crate::store::Store;
use crate::types::{DeliveryResponse, Event, EventDelivery};

/// One consumer response, reduced to what the dispatch loop needs.
#[derive(Debug, Clone, Copy)]
struct AckNack {
    rejected: bool,
    offset: i64,
}

/// The delivery engine for one subscription-connection pairing.
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
    poller: Arc<EventPoller>,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
}

struct DispatcherInner {
    store: Arc<dyn Store>,
    transport: Arc<dyn EventTransport>,
    connection_id: String,
    subscription: Arc<Subscription>,
    namespace: String,
    read_ahead: usize,
    inflight: Mutex<HashMap<Uuid, Event>>,
    acks_tx: mpsc::Sender<AckNack>,
    acks_rx: tokio::sync::Mutex<mpsc::Receiver<AckNack>>,
    shutdown: watch::Receiver<bool>,
    poller: Arc<EventPoller>,
}

impl EventDispatcher {
    /// Builds a dispatcher binding `subscription` to one connection.
    ///
    /// Read-ahead is the subscription's override when set, else the
    /// configured default, clamped below the poll page size so one page can
    /// always fill the window.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn EventTransport>,
        connection_id: impl Into<String>,
        subscription: Arc<Subscription>,
        config: &DispatchConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let read_ahead = subscription
            .def
            .options
            .read_ahead
            .unwrap_or(config.default_read_ahead)
            .min(config.batch_size.saturating_sub(1));

        let poller = Arc::new(EventPoller::new(
            store.clone(),
            PollerConfig {
                namespace: subscription.def.namespace.clone(),
                offset_name: subscription.def.name.clone(),
                ephemeral: subscription.def.options.ephemeral,
                batch_size: config.batch_size,
                poll_interval: config.poll_interval,
                startup_offset_retry_attempts: config.startup_offset_retry_attempts,
                retry: config.retry.clone(),
            },
            shutdown_rx.clone(),
        ));

        // Capacity 1: a response parks at most one signal ahead of the
        // dispatch loop, which drains it before computing window capacity.
        let (acks_tx, acks_rx) = mpsc::channel(1);

        let inner = Arc::new(DispatcherInner {
            store,
            transport,
            connection_id: connection_id.into(),
            namespace: subscription.def.namespace.clone(),
            subscription,
            read_ahead,
            inflight: Mutex::new(HashMap::new()),
            acks_tx,
            acks_rx: tokio::sync::Mutex::new(acks_rx),
            shutdown: shutdown_rx,
            poller: poller.clone(),
        });

        Self {
            inner,
            poller,
            shutdown_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Contends for subscription leadership and, on winning, polls until
    /// close.
    ///
    /// Losing contenders block on the election gate; the permit returns when
    /// the active dispatcher closes, so a waiter takes over without ever
    /// double-delivering.
    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        let inner = self.inner.clone();
        let poller = self.poller.clone();
        let election = self.inner.subscription.election.clone();
        let mut shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            debug!(
                conn = %inner.connection_id,
                sub = %inner.subscription.def.name,
                "Dispatcher attempting to become leader"
            );
            tokio::select! {
                permit = election.acquire_owned() => {
                    let Ok(permit) = permit else {
                        poller.mark_closed();
                        return;
                    };
                    debug!(conn = %inner.connection_id, "Dispatcher became leader");
                    poller.run(inner.clone() as Arc<dyn EventBatchHandler>).await;
                    // Unelect on close, letting a waiting dispatcher in.
                    drop(permit);
                }
                // The watch guard must not become select output: the arm
                // above awaits, and the guard is not Send.
                () = async { let _ = shutdown.wait_for(|closing| *closing).await; } => {
                    debug!(conn = %inner.connection_id, "Closed before becoming leader");
                    poller.mark_closed();
                }
            }
        });
    }

    /// Entry point for consumer acks/nacks from the transport boundary.
    ///
    /// An unmatched identifier is a stale or duplicate response (which
    /// happens naturally after a nack cleared the table) and is a logged
    /// no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closing`] when the dispatcher shuts down
    /// before the dispatch loop consumes the signal.
    pub async fn delivery_response(&self, response: DeliveryResponse) -> Result<(), DispatchError> {
        self.inner.delivery_response(response).await
    }

    /// Number of delivered-but-unresolved events.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.lock().expect("inflight lock").len()
    }

    /// The poller bound to this dispatcher.
    #[must_use]
    pub fn poller(&self) -> &EventPoller {
        &self.poller
    }

    /// Shuts the dispatcher down and waits for the poller to finish.
    ///
    /// No poller callback runs after this returns.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        if !self.started.load(Ordering::Acquire) {
            self.poller.mark_closed();
        }
        self.poller.closed().await;
        debug!(conn = %self.inner.connection_id, "Dispatcher closed");
    }
}

impl DispatcherInner {
    /// Joins each event to at most one message and one data record by exact
    /// reference-id match, scoped to the dispatcher's namespace.
    async fn enrich_events(
        &self,
        events: Vec<Event>,
    ) -> Result<Vec<EventDelivery>, DispatchError> {
        let ref_ids: Vec<Uuid> = events.iter().filter_map(|e| e.reference).collect();
        let messages = self.store.messages_by_ids(&self.namespace, &ref_ids).await?;
        let data_refs = self.store.data_refs_by_ids(&self.namespace, &ref_ids).await?;

        let subscription = self.subscription.subscription_ref();
        Ok(events
            .into_iter()
            .map(|event| {
                let message = event
                    .reference
                    .and_then(|r| messages.iter().find(|m| m.header.id == Some(r)).cloned());
                let data_ref = event
                    .reference
                    .and_then(|r| data_refs.iter().find(|d| d.id == r).copied());
                EventDelivery {
                    event,
                    subscription: subscription.clone(),
                    message,
                    data_ref,
                }
            })
            .collect())
    }

    /// Marks the event in flight, then hands it to the transport.
    ///
    /// Insertion precedes the transport call so a response can never arrive
    /// for an event the table does not know.
    async fn deliver_event(&self, delivery: EventDelivery) -> Result<(), DispatchError> {
        {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            inflight.insert(delivery.event.id, delivery.event.clone());
        }
        debug!(
            sequence = delivery.event.sequence,
            id = %delivery.event.id,
            event_type = %delivery.event.event_type,
            "Dispatching event"
        );
        self.transport.deliver(delivery).await?;
        Ok(())
    }

    async fn apply_signal(&self, signal: AckNack) {
        if signal.rejected {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            // A rejection invalidates the whole current window: everything
            // from the rejected offset onwards must be re-read and
            // redelivered.
            if self.poller.polling_offset() >= signal.offset {
                self.poller.rewind_polling_offset(signal.offset - 1);
            }
            inflight.clear();
            return;
        }
        // Ack bookkeeping: the durable offset advances to the acked sequence
        // once nothing earlier remains in flight. The entry itself was
        // already evicted in delivery_response.
        let commit = {
            let inflight = self.inflight.lock().expect("inflight lock");
            inflight.values().all(|e| e.sequence > signal.offset)
        };
        if commit {
            self.poller.commit_to(signal.offset).await;
        }
    }

    async fn delivery_response(&self, response: DeliveryResponse) -> Result<(), DispatchError> {
        let signal = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            match inflight.remove(&response.id) {
                Some(event) => AckNack {
                    rejected: response.rejected,
                    offset: event.sequence,
                },
                None => {
                    warn!(
                        id = %response.id,
                        rejected = response.rejected,
                        "Response for event not in flight (likely previous reject)"
                    );
                    return Ok(());
                }
            }
        };

        debug!(
            id = %response.id,
            rejected = response.rejected,
            offset = signal.offset,
            info = response.info.as_deref().unwrap_or(""),
            "Response for event"
        );

        // Hand the signal over to the dispatch loop; the loop does the work.
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            sent = self.acks_tx.send(signal) => sent.map_err(|_| DispatchError::Closing),
            _ = shutdown.wait_for(|closing| *closing) => Err(DispatchError::Closing),
        }
    }
}

#[async_trait]
impl EventBatchHandler for DispatcherInner {
    /// Windowed delivery of one polled page.
    ///
    /// Returns `Ok(false)` on completion: offset advancement is driven by
    /// per-event ack bookkeeping, never by batch completion.
    async fn events_available(&self, events: Vec<Event>) -> Result<bool, DispatchError> {
        if events.is_empty() {
            // Idle cycle. Responses that arrived after the previous batch
            // completed are parked in (or blocked on) the hand-off slot;
            // apply them here so late acks commit their offsets and blocked
            // responders are released without waiting for new traffic.
            let mut acks_rx = self.acks_rx.lock().await;
            while let Ok(signal) = acks_rx.try_recv() {
                self.apply_signal(signal).await;
            }
            return Ok(false);
        }

        let candidates = self.enrich_events(events).await?;
        let candidate_count = candidates.len();
        let mut matching: VecDeque<EventDelivery> = candidates
            .into_iter()
            .filter(|d| self.subscription.filter.matches(d))
            .collect();
        let match_count = matching.len();
        let mut dispatched = 0usize;

        let mut acks_rx = self.acks_rx.lock().await;
        let mut shutdown = self.shutdown.clone();

        while !matching.is_empty() {
            // Drain any parked response (e.g. a late nack from the previous
            // page) before computing capacity.
            while let Ok(signal) = acks_rx.try_recv() {
                self.apply_signal(signal).await;
            }

            let dispatchable: Vec<EventDelivery> = {
                let inflight = self.inflight.lock().expect("inflight lock");
                let capacity = (1 + self.read_ahead).saturating_sub(inflight.len());
                debug!(
                    candidates = candidate_count,
                    matched = match_count,
                    inflight = inflight.len(),
                    queued = matching.len(),
                    dispatched,
                    dispatchable = capacity.min(matching.len()),
                    "Dispatcher event state"
                );
                drop(inflight);
                matching.drain(..capacity.min(matching.len())).collect()
            };

            for delivery in dispatchable {
                self.deliver_event(delivery).await?;
                dispatched += 1;
            }

            if matching.is_empty() {
                break;
            }

            // Window full: block until close or a delivery response frees
            // it. The signal is applied outside the select so no await runs
            // while the (non-Send) watch guard could be live.
            let signal = tokio::select! {
                () = async { let _ = shutdown.wait_for(|closing| *closing).await; } => {
                    return Err(DispatchError::Closing);
                }
                signal = acks_rx.recv() => signal.ok_or(DispatchError::Closing)?,
            };
            self.apply_signal(signal).await;
        }

        Ok(false)
    }
}
