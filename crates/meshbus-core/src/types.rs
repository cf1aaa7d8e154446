//! Core domain types for the event-delivery and correlation engine.
//!
//! Three tiers of types flow through the crate:
//! - Persisted facts: [`Event`], [`Message`], [`DataRef`], [`Data`] — owned by
//!   the store, never mutated here.
//! - Delivery shapes: [`EventDelivery`] (an event enriched with its referenced
//!   message/data and the subscription it is delivered under) and
//!   [`DeliveryResponse`] (the consumer's ack/nack).
//! - Reply shapes: [`ReplyEnvelope`] — a correlated reply message with its
//!   data rows materialized inline.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Discriminant for domain event kinds.
///
/// The wire name (`message_confirmed`, `message_rejected`) is what
/// subscription event-type regexes match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A message completed aggregation and is visible to consumers.
    MessageConfirmed,
    /// A message failed validation or aggregation.
    MessageRejected,
}

impl EventType {
    /// Returns the wire name used for filter matching.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::MessageConfirmed => "message_confirmed",
            Self::MessageRejected => "message_rejected",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable, sequenced fact referencing a message or data record.
///
/// Produced by the store's event writer; the dispatcher and bridge only ever
/// read events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Monotonic sequence number assigned by the store.
    pub sequence: i64,
    /// Event kind.
    pub event_type: EventType,
    /// Namespace the event belongs to.
    pub namespace: String,
    /// Identifier of the message or data record this event is about.
    pub reference: Option<Uuid>,
}

impl Event {
    /// Creates a new event referencing `reference`.
    #[must_use]
    pub fn new(
        sequence: i64,
        event_type: EventType,
        namespace: impl Into<String>,
        reference: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            event_type,
            namespace: namespace.into(),
            reference,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Routing and correlation metadata for a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Message identifier. `None` until assigned by the sender.
    pub id: Option<Uuid>,
    /// Correlation id: the request message this message replies to.
    pub cid: Option<Uuid>,
    /// Namespace the message belongs to.
    pub namespace: String,
    /// Ordering topic.
    pub topic: String,
    /// Application context string.
    pub context: String,
    /// Private-group identifier, when the message is group-scoped.
    pub group: Option<String>,
    /// Application tag. Required on request/reply requests.
    pub tag: String,
}

/// A message: header plus references to the data records it carries.
///
/// The data payloads themselves live in the store and are materialized on
/// demand (see [`ReplyEnvelope`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Header metadata.
    pub header: MessageHeader,
    /// References to the attached data records.
    pub data: Vec<DataRef>,
}

/// A reference to a data record attached to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    /// Data record identifier.
    pub id: Uuid,
}

/// A stored data record with its JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// Data record identifier.
    pub id: Uuid,
    /// The JSON payload.
    pub value: serde_json::Value,
}

// ---------------------------------------------------------------------------
// EventDelivery / DeliveryResponse
// ---------------------------------------------------------------------------

/// Reference to the subscription an event is being delivered under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    /// Subscription identifier.
    pub id: Uuid,
    /// Subscription namespace.
    pub namespace: String,
    /// Subscription name.
    pub name: String,
}

/// An event enriched for delivery: the raw event joined with the referenced
/// message and data record (when the reference resolves to one) and the
/// subscription it is delivered under.
///
/// Created per delivery attempt and discarded once the delivery resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDelivery {
    /// The underlying event.
    pub event: Event,
    /// The subscription this delivery belongs to.
    pub subscription: SubscriptionRef,
    /// The referenced message, when the event reference matched one.
    pub message: Option<Message>,
    /// The referenced data record, when the event reference matched one.
    pub data_ref: Option<DataRef>,
}

/// A consumer's acknowledgement or rejection of a delivered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResponse {
    /// Identifier of the delivered event being responded to.
    pub id: Uuid,
    /// `true` when the consumer rejected the event.
    pub rejected: bool,
    /// Optional free-text detail from the consumer.
    pub info: Option<String>,
}

// ---------------------------------------------------------------------------
// ReplyEnvelope
// ---------------------------------------------------------------------------

/// A correlated reply message with its referenced data materialized inline.
///
/// This is what a [`request_reply`](crate::syncasync::SyncAsyncBridge::request_reply)
/// caller receives: never a partial result — resolution either inlines every
/// data row or does not resolve at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// The reply message.
    pub message: Message,
    /// The reply's data rows, in message order.
    pub data: Vec<Data>,
}
