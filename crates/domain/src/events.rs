//! Wire payloads exchanged over the event bus.
//!
//! Field names are the contract with other services and must not change.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::order::{Order, OrderStatus, ProductId};

/// Reason code attached to a cancellation caused by insufficient stock.
pub const REASON_OUT_OF_STOCK: &str = "out_of_stock";

/// A single line of an [`OrderPlaced`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Emitted once an order has been stored in the `Pending` state.
///
/// The item list is a snapshot taken at publish time; consumers only go back
/// to storage for the authoritative status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<PlacedItem>,
    pub created_at: DateTime<Utc>,
}

impl OrderPlaced {
    /// Snapshots an order into an event stamped with the current time.
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            items: order
                .items
                .iter()
                .map(|item| PlacedItem {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }
}

/// Terminal outcome carried by an [`OrderResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Confirmed,
    Cancelled,
}

impl ResultStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Confirmed => "CONFIRMED",
            ResultStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ResultStatus> for OrderStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Confirmed => OrderStatus::Confirmed,
            ResultStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

/// Emitted by the reservation worker after an order reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderResult {
    /// Result for an order whose stock was debited.
    pub fn confirmed(order_id: OrderId, user_id: UserId) -> Self {
        Self {
            order_id,
            user_id,
            status: ResultStatus::Confirmed,
            reason: None,
            created_at: Utc::now(),
        }
    }

    /// Result for an order that could not be satisfied.
    pub fn cancelled(order_id: OrderId, user_id: UserId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            user_id,
            status: ResultStatus::Cancelled,
            reason: Some(reason.into()),
            created_at: Utc::now(),
        }
    }
}
