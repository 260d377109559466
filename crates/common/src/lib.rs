//! Identifier types shared by every crate in the fulfillment pipeline.

pub mod types;

pub use types::{OrderId, OrderItemId, UserId};
