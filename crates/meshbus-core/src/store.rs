//! Durable event/offset store seam.
//!
//! The store is an external collaborator: a keyed, filterable persistence
//! plugin. This crate consumes it through the narrow [`Store`] trait — event
//! pages for the poller, batched enrichment lookups for the dispatcher,
//! single-message lookup for the bridge, and durable offsets.
//!
//! All lookups are namespace-scoped. "Not found" is `None` (or an empty
//! page), never an error; errors are real dependency failures and propagate
//! verbatim as [`anyhow::Error`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{DataRef, Event, Message};

/// Kind discriminator for durable offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetKind {
    /// A subscription's delivery offset.
    Subscription,
}

/// The persistence seam consumed by the poller, dispatcher and bridge.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns up to `limit` events in `namespace` with sequence strictly
    /// greater than `sequence`, in increasing sequence order.
    async fn events_after(
        &self,
        namespace: &str,
        sequence: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Event>>;

    /// Returns the highest event sequence currently stored for `namespace`,
    /// or 0 when the namespace has no events.
    async fn latest_sequence(&self, namespace: &str) -> anyhow::Result<i64>;

    /// Returns the messages in `namespace` whose id is in `ids`.
    async fn messages_by_ids(&self, namespace: &str, ids: &[Uuid])
        -> anyhow::Result<Vec<Message>>;

    /// Returns the data references in `namespace` whose id is in `ids`.
    async fn data_refs_by_ids(
        &self,
        namespace: &str,
        ids: &[Uuid],
    ) -> anyhow::Result<Vec<DataRef>>;

    /// Returns the message with the given id, or `None` when it is not (yet)
    /// visible.
    async fn message_by_id(&self, namespace: &str, id: &Uuid) -> anyhow::Result<Option<Message>>;

    /// Returns the durable offset for `(kind, namespace, name)`, if one has
    /// been recorded.
    async fn offset(
        &self,
        kind: OffsetKind,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<i64>>;

    /// Records the durable offset for `(kind, namespace, name)`.
    async fn put_offset(
        &self,
        kind: OffsetKind,
        namespace: &str,
        name: &str,
        sequence: i64,
    ) -> anyhow::Result<()>;
}
