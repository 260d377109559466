//! Order entity and related types.

mod entity;
mod state;
mod value_objects;

pub use entity::{Order, PendingOrder};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A stored status value is not one of the known states.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}
