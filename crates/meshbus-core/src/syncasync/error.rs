//! Request/reply error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Failure modes of a blocking request/reply exchange.
///
/// Validation failures ([`MissingTag`](RequestError::MissingTag),
/// [`AlreadyCorrelated`](RequestError::AlreadyCorrelated)) are caller bugs
/// and fail before anything is sent. [`Timeout`](RequestError::Timeout) means
/// the request went out but no correlated reply arrived in time — the reply
/// may still arrive later and will be discarded. Dependency failures carry
/// the underlying service error verbatim.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request message has no tag to route the reply handler on.
    #[error("request message must carry a tag")]
    MissingTag,

    /// The request message already carries a correlation id.
    #[error("request message must not have a correlation id set")]
    AlreadyCorrelated,

    /// No correlated reply arrived within the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A collaborator service failed.
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

impl RequestError {
    /// Returns true for the pre-send validation failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingTag | Self::AlreadyCorrelated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_message_passes_through() {
        let err = RequestError::from(anyhow::anyhow!("pop"));
        assert_eq!(err.to_string(), "pop");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_validation_classification() {
        assert!(RequestError::MissingTag.is_validation());
        assert!(RequestError::AlreadyCorrelated.is_validation());
        assert!(!RequestError::Timeout(Duration::from_secs(1)).is_validation());
    }
}
