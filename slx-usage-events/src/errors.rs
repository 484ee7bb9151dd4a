use thiserror::Error;

/// Error types for usage event operations
#[derive(Error, Debug)]
pub enum UsageEventError {
    /// Error during event serialization
    #[error("Failed to serialize event: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The event is missing a field the ledger cannot do without
    #[error("Invalid usage event: {0}")]
    InvalidEvent(String),

    /// An event with the same request id was already recorded
    #[error("Duplicate usage event for request {0}")]
    DuplicateRequest(String),

    /// Generic error type for other failures
    #[error("Operation failed: {0}")]
    Other(String),
}
