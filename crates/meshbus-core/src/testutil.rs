//! In-memory fakes for the collaborator seams, shared across unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::services::{DataResolver, DeliveryListener, EventManager, EventTransport, MessageSender};
use crate::store::{OffsetKind, Store};
use crate::types::{Data, DataRef, Event, EventDelivery, Message};

/// Decrements a failure budget, reporting whether this call should fail.
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory [`Store`] with per-method failure injection.
#[derive(Default)]
pub struct MockStore {
    events: Mutex<Vec<Event>>,
    messages: Mutex<Vec<Message>>,
    data_refs: Mutex<Vec<DataRef>>,
    offsets: Mutex<HashMap<(String, String), i64>>,
    events_after_failures: AtomicU32,
    messages_by_ids_failures: AtomicU32,
    message_by_id_failures: AtomicU32,
    offset_failures: AtomicU32,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&self, event: Event) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        events.sort_by_key(|e| e.sequence);
    }

    pub fn add_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn add_data_ref(&self, data_ref: DataRef) {
        self.data_refs.lock().unwrap().push(data_ref);
    }

    pub async fn set_offset(&self, namespace: &str, name: &str, sequence: i64) {
        self.offsets
            .lock()
            .unwrap()
            .insert((namespace.into(), name.into()), sequence);
    }

    pub async fn stored_offset(&self, namespace: &str, name: &str) -> Option<i64> {
        self.offsets
            .lock()
            .unwrap()
            .get(&(namespace.into(), name.into()))
            .copied()
    }

    /// The next `n` calls to `events_after` fail.
    pub fn fail_events_after(&self, n: u32) {
        self.events_after_failures.store(n, Ordering::Release);
    }

    /// The next `n` calls to `messages_by_ids` fail.
    pub fn fail_messages_by_ids(&self, n: u32) {
        self.messages_by_ids_failures.store(n, Ordering::Release);
    }

    /// The next `n` calls to `message_by_id` fail.
    pub fn fail_message_by_id(&self, n: u32) {
        self.message_by_id_failures.store(n, Ordering::Release);
    }

    /// The next `n` calls to `offset` fail.
    pub fn fail_offset(&self, n: u32) {
        self.offset_failures.store(n, Ordering::Release);
    }
}

#[async_trait]
impl Store for MockStore {
    async fn events_after(
        &self,
        namespace: &str,
        sequence: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>> {
        if take_failure(&self.events_after_failures) {
            anyhow::bail!("pop");
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.namespace == namespace && e.sequence > sequence)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_sequence(&self, namespace: &str) -> anyhow::Result<i64> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.namespace == namespace)
            .map(|e| e.sequence)
            .max()
            .unwrap_or(0))
    }

    async fn messages_by_ids(
        &self,
        namespace: &str,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<Message>> {
        if take_failure(&self.messages_by_ids_failures) {
            anyhow::bail!("pop");
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                m.header.namespace == namespace
                    && m.header.id.is_some_and(|id| ids.contains(&id))
            })
            .cloned()
            .collect())
    }

    async fn data_refs_by_ids(
        &self,
        _namespace: &str,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<DataRef>> {
        Ok(self
            .data_refs
            .lock()
            .unwrap()
            .iter()
            .filter(|d| ids.contains(&d.id))
            .copied()
            .collect())
    }

    async fn message_by_id(
        &self,
        namespace: &str,
        id: &Uuid,
    ) -> anyhow::Result<Option<Message>> {
        if take_failure(&self.message_by_id_failures) {
            anyhow::bail!("pop");
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.header.namespace == namespace && m.header.id == Some(*id))
            .cloned())
    }

    async fn offset(
        &self,
        _kind: OffsetKind,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<i64>> {
        if take_failure(&self.offset_failures) {
            anyhow::bail!("pop");
        }
        Ok(self.stored_offset(namespace, name).await)
    }

    async fn put_offset(
        &self,
        _kind: OffsetKind,
        namespace: &str,
        name: &str,
        sequence: i64,
    ) -> anyhow::Result<()> {
        self.set_offset(namespace, name, sequence).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// [`EventTransport`] that queues deliveries for the test to consume.
pub struct MockTransport {
    tx: mpsc::UnboundedSender<EventDelivery>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EventDelivery>>,
    delivered: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            delivered: AtomicUsize::new(0),
        }
    }

    /// Awaits the next delivery handed to the transport.
    pub async fn next_delivery(&self) -> EventDelivery {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .expect("transport channel closed")
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn deliver(&self, delivery: EventDelivery) -> anyhow::Result<()> {
        self.delivered.fetch_add(1, Ordering::AcqRel);
        self.tx
            .send(delivery)
            .map_err(|_| anyhow::anyhow!("transport receiver dropped"))
    }
}

// ---------------------------------------------------------------------------
// MockMessageSender
// ---------------------------------------------------------------------------

/// [`MessageSender`] that records sends and can fail on demand.
#[derive(Default)]
pub struct MockMessageSender {
    sent: Mutex<Vec<Message>>,
    failures: AtomicU32,
}

impl MockMessageSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` sends fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::Release);
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for MockMessageSender {
    async fn send_message_with_id(
        &self,
        _namespace: &str,
        message: Message,
    ) -> anyhow::Result<Message> {
        if take_failure(&self.failures) {
            anyhow::bail!("pop");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// MockDataResolver
// ---------------------------------------------------------------------------

/// [`DataResolver`] serving rows from an in-memory table.
#[derive(Default)]
pub struct MockDataResolver {
    data: Mutex<Vec<Data>>,
    failures: AtomicU32,
}

impl MockDataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data(&self, data: Data) {
        self.data.lock().unwrap().push(data);
    }

    /// The next `n` resolutions fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::Release);
    }
}

#[async_trait]
impl DataResolver for MockDataResolver {
    async fn message_data(
        &self,
        message: &Message,
        _allow_partial: bool,
    ) -> anyhow::Result<(Vec<Data>, bool)> {
        if take_failure(&self.failures) {
            anyhow::bail!("pop");
        }
        let table = self.data.lock().unwrap();
        let rows: Vec<Data> = message
            .data
            .iter()
            .filter_map(|r| table.iter().find(|d| d.id == r.id).cloned())
            .collect();
        let complete = rows.len() == message.data.len();
        Ok((rows, complete))
    }
}

// ---------------------------------------------------------------------------
// MockEventManager
// ---------------------------------------------------------------------------

/// [`EventManager`] that records listener registrations per namespace.
#[derive(Default)]
pub struct MockEventManager {
    listeners: Mutex<HashMap<String, Vec<Arc<dyn DeliveryListener>>>>,
    failures: AtomicU32,
}

impl MockEventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` registrations fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::Release);
    }

    pub fn registration_count(&self, namespace: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(namespace)
            .map_or(0, Vec::len)
    }
}

impl EventManager for MockEventManager {
    fn add_system_event_listener(
        &self,
        namespace: &str,
        listener: Arc<dyn DeliveryListener>,
    ) -> anyhow::Result<()> {
        if take_failure(&self.failures) {
            anyhow::bail!("pop");
        }
        self.listeners
            .lock()
            .unwrap()
            .entry(namespace.into())
            .or_default()
            .push(listener);
        Ok(())
    }
}
