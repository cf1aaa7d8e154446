//! Blocking request/reply over the asynchronous event stream.
//!
//! The bridge turns the fire-and-forget messaging layer into a synchronous
//! call: it registers a waiter keyed by the request message id, sends the
//! request, and blocks the caller until a confirmed message whose correlation
//! id equals the request id flows back through the event stream (or the
//! deadline passes).
//!
//! Registration strictly precedes the send, so a reply that races the
//! request's own confirmation can never be missed. The bridge installs
//! itself as a system event listener once per namespace, on the first request
//! in that namespace.
//!
//! Most events the listener sees are unrelated to any in-flight request;
//! every mismatch short of a store failure is a benign no-op, never an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::services::{DataResolver, DeliveryListener, EventManager, MessageSender};
use crate::store::Store;
use crate::syncasync::error::RequestError;
use crate::types::{EventDelivery, EventType, Message, ReplyEnvelope};

struct InflightRequest {
    reply_tx: oneshot::Sender<ReplyEnvelope>,
    started: Instant,
}

/// Deregisters a waiter when the owning `request_reply` future completes or
/// is dropped, so caller-side cancellation cannot leak table entries.
///
/// Successful resolution removed the entry already; the drop-time removal is
/// then a no-op.
struct WaiterGuard<'a> {
    bridge: &'a SyncAsyncBridge,
    namespace: &'a str,
    request_id: Uuid,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.bridge.remove_inflight(self.namespace, &self.request_id);
    }
}

/// Correlates synchronous requests with their asynchronous replies.
pub struct SyncAsyncBridge {
    store: Arc<dyn Store>,
    sender: Arc<dyn MessageSender>,
    data: Arc<dyn DataResolver>,
    events: Arc<dyn EventManager>,
    request_timeout: Duration,
    // Outer key: namespace. Inner key: the REQUEST message id, which replies
    // carry as their correlation id.
    inflight: Mutex<HashMap<String, HashMap<Uuid, InflightRequest>>>,
}

impl SyncAsyncBridge {
    /// Builds a bridge over the given collaborator services.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn MessageSender>,
        data: Arc<dyn DataResolver>,
        events: Arc<dyn EventManager>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            store,
            sender,
            data,
            events,
            request_timeout: config.request_timeout,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Sends `request` and blocks until its correlated reply arrives.
    ///
    /// The request's message id is assigned here and becomes the correlation
    /// key; the returned envelope carries the reply message with every data
    /// row materialized inline.
    ///
    /// # Errors
    ///
    /// - [`RequestError::MissingTag`] when the request has no tag.
    /// - [`RequestError::AlreadyCorrelated`] when the request already carries
    ///   a correlation id.
    /// - [`RequestError::Timeout`] when no reply arrives in time.
    /// - [`RequestError::Dependency`] when listener registration or the send
    ///   itself fails.
    pub async fn request_reply(
        self: &Arc<Self>,
        namespace: &str,
        mut request: Message,
    ) -> Result<ReplyEnvelope, RequestError> {
        if request.header.tag.is_empty() {
            return Err(RequestError::MissingTag);
        }
        if request.header.cid.is_some() {
            return Err(RequestError::AlreadyCorrelated);
        }

        let request_id = Uuid::new_v4();
        request.header.id = Some(request_id);
        request.header.namespace = namespace.into();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.register_inflight(namespace, request_id, reply_tx)?;
        // Deregisters on every exit path, including this future being
        // dropped by a caller that gave up waiting.
        let _guard = WaiterGuard {
            bridge: self.as_ref(),
            namespace,
            request_id,
        };
        debug!(%namespace, request = %request_id, tag = %request.header.tag, "Request in flight");

        self.sender
            .send_message_with_id(namespace, request)
            .await
            .map_err(RequestError::Dependency)?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            // The waiter slot vanished without a reply; treat as a
            // dependency failure rather than inventing one.
            Ok(Err(_)) => Err(RequestError::Dependency(anyhow::anyhow!(
                "reply channel closed for request {request_id}"
            ))),
            Err(_) => Err(RequestError::Timeout(self.request_timeout)),
        }
    }

    /// Registers the waiter, installing the namespace listener on first use.
    ///
    /// The namespace slot is claimed under the lock, but the registration
    /// call itself runs outside it: a slow listener registration must not
    /// stall requests and callbacks in other namespaces. The claim
    /// guarantees exactly one concurrent caller registers.
    fn register_inflight(
        self: &Arc<Self>,
        namespace: &str,
        request_id: Uuid,
        reply_tx: oneshot::Sender<ReplyEnvelope>,
    ) -> Result<(), RequestError> {
        let claimed = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            if inflight.contains_key(namespace) {
                false
            } else {
                inflight.insert(namespace.to_string(), HashMap::new());
                true
            }
        };
        if claimed {
            if let Err(err) = self.events.add_system_event_listener(namespace, self.clone()) {
                // Surrender the claim so a later request re-registers. Any
                // waiter that piggy-backed on the claim is dropped with it
                // and observes its reply channel closing.
                let mut inflight = self.inflight.lock().expect("inflight lock");
                inflight.remove(namespace);
                return Err(RequestError::Dependency(err));
            }
        }

        let mut inflight = self.inflight.lock().expect("inflight lock");
        // Key collision is impossible: the id was freshly generated.
        if let Some(waiters) = inflight.get_mut(namespace) {
            waiters.insert(
                request_id,
                InflightRequest {
                    reply_tx,
                    started: Instant::now(),
                },
            );
        }
        Ok(())
    }

    fn remove_inflight(&self, namespace: &str, request_id: &Uuid) {
        let mut inflight = self.inflight.lock().expect("inflight lock");
        if let Some(waiters) = inflight.get_mut(namespace) {
            waiters.remove(request_id);
        }
    }

    /// True when `namespace` has a waiter keyed by `request_id`.
    fn has_waiter(&self, namespace: &str, request_id: &Uuid) -> bool {
        let inflight = self.inflight.lock().expect("inflight lock");
        inflight
            .get(namespace)
            .is_some_and(|w| w.contains_key(request_id))
    }

    /// True when `namespace` has any waiters at all.
    fn has_any_waiters(&self, namespace: &str) -> bool {
        let inflight = self.inflight.lock().expect("inflight lock");
        inflight.get(namespace).is_some_and(|w| !w.is_empty())
    }

    /// Materializes the reply's data and hands it to the waiter.
    ///
    /// A data-resolution failure leaves the waiter in place: it will either
    /// be resolved by a redelivery of the event or time out.
    async fn resolve_reply(&self, namespace: &str, request_id: Uuid, reply: Message) {
        let (rows, _complete) = match self.data.message_data(&reply, true).await {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(%namespace, request = %request_id, error = %err, "Failed to resolve reply data");
                return;
            }
        };

        let waiter = {
            let mut inflight = self.inflight.lock().expect("inflight lock");
            inflight
                .get_mut(namespace)
                .and_then(|w| w.remove(&request_id))
        };
        let Some(waiter) = waiter else {
            // The request timed out while we were resolving data.
            debug!(%namespace, request = %request_id, "Reply arrived for expired request");
            return;
        };

        info!(
            %namespace,
            request = %request_id,
            elapsed_ms = waiter.started.elapsed().as_millis() as u64,
            "Resolved reply"
        );
        // The requester may have given up between removal and send.
        let _ = waiter.reply_tx.send(ReplyEnvelope {
            message: reply,
            data: rows,
        });
    }

    #[cfg(test)]
    fn inflight_count(&self, namespace: &str) -> usize {
        let inflight = self.inflight.lock().expect("inflight lock");
        inflight.get(namespace).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DeliveryListener for SyncAsyncBridge {
    /// Inspects one delivered system event for reply correlation.
    ///
    /// The only error path is a store failure looking up the confirmed
    /// message; everything else that fails to correlate is ignored.
    async fn on_event(&self, delivery: EventDelivery) -> anyhow::Result<()> {
        if delivery.event.event_type != EventType::MessageConfirmed {
            return Ok(());
        }
        let namespace = delivery.event.namespace.clone();
        if !self.has_any_waiters(&namespace) {
            return Ok(());
        }
        let Some(reply_id) = delivery.event.reference else {
            return Ok(());
        };

        let Some(reply) = self.store.message_by_id(&namespace, &reply_id).await? else {
            debug!(%namespace, reply = %reply_id, "Confirmed message not yet queryable");
            return Ok(());
        };
        // Replies name their request through the correlation id.
        let Some(request_id) = reply.header.cid else {
            return Ok(());
        };
        if !self.has_waiter(&namespace, &request_id) {
            return Ok(());
        }

        self.resolve_reply(&namespace, request_id, reply).await;
        Ok(())
    }
}
