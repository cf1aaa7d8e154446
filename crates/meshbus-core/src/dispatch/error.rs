//! Dispatch engine error types.

/// Errors from the dispatch engine.
///
/// Dependency failures (store, transport) propagate verbatim; the poller owns
/// retry of a failed batch. [`Closing`](DispatchError::Closing) marks the
/// orderly-shutdown race and is not a fault.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher is closing; the in-progress wait was abandoned.
    #[error("dispatcher closing")]
    Closing,

    /// A collaborator call failed; the message is the collaborator's own.
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

impl DispatchError {
    /// Returns `true` for the orderly-shutdown variant.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing)
    }
}
