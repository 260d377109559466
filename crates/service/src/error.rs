//! Service error types.

use event_bus::EventBusError;
use fulfillment::FulfillmentError;
use order_store::StoreError;
use thiserror::Error;

/// Errors in the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable could not be parsed.
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be reached or migrated.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The broker could not be reached or the topology declared.
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// A worker failed to start.
    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    /// The metrics recorder could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// The HTTP listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
