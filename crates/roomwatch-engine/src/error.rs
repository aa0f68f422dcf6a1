use thiserror::Error;

/// Errors produced by the reconciliation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A roster refresh was requested while one is still running. The new
    /// request is rejected, not queued; the caller's poll timer retries.
    #[error("Roster refresh already in progress")]
    RefreshInProgress,

    /// Underlying persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] roomwatch_store::StoreError),

    /// A host payload failed to parse as JSON; the batch is dropped.
    #[error("Malformed host payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
