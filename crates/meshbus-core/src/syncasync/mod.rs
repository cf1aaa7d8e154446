//! Synchronous request/reply bridged over asynchronous messaging.

mod bridge;
mod error;

pub use bridge::SyncAsyncBridge;
pub use error::RequestError;
