//! Subscription-driven event delivery.
//!
//! A [`Subscription`] pairs a durable definition (name, filters, options)
//! with a leader-election gate. Each connection that wants to consume the
//! subscription gets an [`EventDispatcher`]; exactly one dispatcher at a time
//! wins the election and drives an [`EventPoller`] over the store, delivering
//! filtered, enriched events under a read-ahead window.

mod dispatcher;
mod error;
mod filter;
mod poller;
mod subscription;

pub use dispatcher::EventDispatcher;
pub use error::DispatchError;
pub use filter::{FilterCompileError, FilterDef, SubscriptionFilter};
pub use poller::{EventBatchHandler, EventPoller, PollerConfig};
pub use subscription::{Subscription, SubscriptionDef, SubscriptionOptions};
