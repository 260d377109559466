use domain::{OrderError, OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The product was not found.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value could not be mapped onto the domain.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A stored order violated a domain rule.
    #[error("Domain error: {0}")]
    Domain(#[from] OrderError),

    /// The store refused the operation (used by the in-memory store to simulate outages).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
