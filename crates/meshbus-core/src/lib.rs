//! # Meshbus Core
//!
//! The event-delivery and request/reply-correlation engine for a multi-party
//! data-exchange node.
//!
//! This crate provides:
//! - **Dispatch**: Per-subscription delivery of sequenced events, with
//!   enrichment, regex filtering, read-ahead windowing and ack/nack flow
//!   control
//! - **Poller**: Offset-tracked paging over the durable event store, with
//!   rewind for redelivery
//! - **Sync-Async Bridge**: Blocking request/reply correlated over the
//!   asynchronous event stream
//!
//! ## Design Principles
//!
//! 1. **At-least-once delivery** - Offsets advance only on acknowledged
//!    progress; rejection rewinds
//! 2. **Single leader per subscription** - An election gate serializes
//!    dispatchers, so ordering is preserved across reconnects
//! 3. **Narrow collaborator seams** - Storage, messaging, data resolution and
//!    transport are traits; the engine owns only correlation and flow control
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshbus_core::config::DispatchConfig;
//! use meshbus_core::dispatch::{EventDispatcher, Subscription, SubscriptionDef};
//!
//! let sub = Arc::new(Subscription::new(SubscriptionDef::new("ns1", "app1"))?);
//! let dispatcher = EventDispatcher::new(store, transport, conn_id, sub, &DispatchConfig::default());
//! dispatcher.start();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod retry;
pub mod services;
pub mod store;
pub mod syncasync;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the two engine entry points.
pub use dispatch::EventDispatcher;
pub use syncasync::SyncAsyncBridge;
