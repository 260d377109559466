//! Order entity.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderItem, OrderStatus};

/// A placed order.
///
/// The status field is private: an order is created `Pending` by
/// [`Order::place`] and can only leave that state through
/// [`PendingOrder::confirm`] or [`PendingOrder::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,

    /// The user who placed the order.
    pub user_id: UserId,

    status: OrderStatus,

    /// Sum of price × quantity at placement time.
    pub total: Money,

    /// Ordered lines, in placement order.
    pub items: Vec<OrderItem>,

    /// When the order was placed.
    pub created_at: DateTime<Utc>,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new pending order.
    ///
    /// Rejects an empty item list and any zero quantity.
    pub fn place(
        user_id: UserId,
        items: Vec<OrderItem>,
        total: Money,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Pending,
            total,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order from persisted fields.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        status: OrderStatus,
        total: Money,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            status,
            total,
            items,
            created_at,
            updated_at,
        }
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the order as a [`PendingOrder`] if it still awaits a decision,
    /// or hands it back unchanged when it is already terminal.
    pub fn try_into_pending(self) -> Result<PendingOrder, Order> {
        if self.status == OrderStatus::Pending {
            Ok(PendingOrder(self))
        } else {
            Err(self)
        }
    }
}

/// An order known to be in the `Pending` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder(Order);

impl PendingOrder {
    /// Returns the order identifier.
    pub fn id(&self) -> OrderId {
        self.0.id
    }

    /// Returns the owning user.
    pub fn user_id(&self) -> UserId {
        self.0.user_id
    }

    /// Moves the order to `Confirmed`.
    pub fn confirm(self) -> Order {
        self.transition(OrderStatus::Confirmed)
    }

    /// Moves the order to `Cancelled`.
    pub fn cancel(self) -> Order {
        self.transition(OrderStatus::Cancelled)
    }

    fn transition(self, status: OrderStatus) -> Order {
        let mut order = self.0;
        order.status = status;
        order.updated_at = Utc::now();
        order
    }
}
