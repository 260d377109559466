//! Fulfillment error types.

use domain::{OrderError, OrderId, ProductId, UserId};
use event_bus::EventBusError;
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur while placing or fulfilling an order.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An ordered product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order belongs to another user.
    #[error("User {user_id} is not allowed to access order {order_id}")]
    NotAuthorized { order_id: OrderId, user_id: UserId },

    /// The order violates a domain rule.
    #[error("Domain error: {0}")]
    Domain(#[from] OrderError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The notification channel failed.
    #[error("Notification failed: {0}")]
    Notification(String),

    /// A background publish task panicked or was cancelled.
    #[error("Publish task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
