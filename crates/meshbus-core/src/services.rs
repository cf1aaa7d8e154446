//! Collaborator service seams.
//!
//! Everything the core invokes but does not own: the message-send service,
//! the data-resolution service, the event manager that fans system events out
//! to registered listeners, and the transport that carries deliveries to
//! remote consumers. Each is a narrow async trait; dependency failures
//! propagate verbatim as [`anyhow::Error`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{Data, EventDelivery, Message};

/// Sends a message, assigning its identifier.
///
/// The returned message carries the assigned header id, which callers use as
/// the correlation key for any reply.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends `message` in `namespace` and returns it with its id assigned.
    async fn send_message_with_id(
        &self,
        namespace: &str,
        message: Message,
    ) -> anyhow::Result<Message>;
}

/// Materializes the data rows a message references.
#[async_trait]
pub trait DataResolver: Send + Sync {
    /// Returns the data rows referenced by `message`, and whether every row
    /// was fully stored. With `allow_partial`, not-yet-fully-stored rows are
    /// included rather than treated as missing.
    async fn message_data(
        &self,
        message: &Message,
        allow_partial: bool,
    ) -> anyhow::Result<(Vec<Data>, bool)>;
}

/// A listener invoked for every system event delivered in a namespace.
#[async_trait]
pub trait DeliveryListener: Send + Sync {
    /// Handles one delivered event. Errors propagate to the event-delivery
    /// pipeline, which owns retry.
    async fn on_event(&self, delivery: EventDelivery) -> anyhow::Result<()>;
}

/// The subscription-manager seam for system-level event listeners.
pub trait EventManager: Send + Sync {
    /// Registers `listener` for every relevant event in `namespace`.
    ///
    /// Registration is idempotent per namespace.
    fn add_system_event_listener(
        &self,
        namespace: &str,
        listener: Arc<dyn DeliveryListener>,
    ) -> anyhow::Result<()>;
}

/// The outward transport seam: hands a delivery to the connected consumer.
///
/// Called exactly once per delivery attempt; the consumer's ack/nack comes
/// back separately through `EventDispatcher::delivery_response`.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Delivers `delivery` to the remote consumer.
    async fn deliver(&self, delivery: EventDelivery) -> anyhow::Result<()>;
}
