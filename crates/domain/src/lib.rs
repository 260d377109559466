//! Domain layer for the order fulfillment pipeline.
//!
//! This crate provides:
//! - Order entity with its PENDING → CONFIRMED / CANCELLED status machine
//! - Product entity with a non-negative stock count
//! - Wire payloads for the `OrderPlaced` and `OrderResult` events

pub mod events;
pub mod order;
pub mod product;

pub use common::{OrderId, OrderItemId, UserId};
pub use events::{OrderPlaced, OrderResult, PlacedItem, REASON_OUT_OF_STOCK, ResultStatus};
pub use order::{Money, Order, OrderError, OrderItem, OrderStatus, PendingOrder, ProductId};
pub use product::Product;
