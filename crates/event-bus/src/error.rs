use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The broker could not be reached.
    #[error("Broker connection error: {0}")]
    Connection(#[source] lapin::Error),

    /// A channel-level operation failed.
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Publishing was refused.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The exchange has not been declared.
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    /// The queue has not been declared.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
