//! Order placement: store a PENDING order, then announce it.

use domain::{Money, Order, OrderError, OrderId, OrderItem, OrderPlaced, PlacedItem, UserId};
use event_bus::EventBus;
use order_store::OrderStore;

use crate::{EventEmitter, FulfillmentError, PublishHandle, Result};

/// An order that has been stored, with the publish of its `OrderPlaced`
/// event running in the background.
#[derive(Debug)]
pub struct PlacedOrder {
    pub order: Order,
    pub publish: PublishHandle,
}

/// Creates orders and emits `OrderPlaced` once they are durable.
pub struct OrderPlacement<S: OrderStore, B: EventBus> {
    store: S,
    emitter: EventEmitter<B>,
    routing_key: String,
}

impl<S: OrderStore, B: EventBus + 'static> OrderPlacement<S, B> {
    /// Creates a placement service publishing under `routing_key`.
    pub fn new(store: S, emitter: EventEmitter<B>, routing_key: impl Into<String>) -> Self {
        Self {
            store,
            emitter,
            routing_key: routing_key.into(),
        }
    }

    /// Places an order for `user_id`.
    ///
    /// Every product must exist; the total is computed from current prices.
    /// The order is stored as PENDING before the event is handed to the
    /// emitter, so the caller does not wait on the broker.
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn place_order(&self, user_id: UserId, items: Vec<PlacedItem>) -> Result<PlacedOrder> {
        if items.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            }
            .into());
        }

        let mut total = Money::zero();
        for item in &items {
            let product = self
                .store
                .find_product(&item.product_id)
                .await?
                .ok_or_else(|| FulfillmentError::ProductNotFound(item.product_id.clone()))?;
            total += product.price.multiply(item.quantity);
        }

        let order = Order::place(
            user_id,
            items
                .into_iter()
                .map(|item| OrderItem::new(item.product_id, item.quantity))
                .collect(),
            total,
        )?;
        self.store.create_order(&order).await?;

        tracing::info!(order_id = %order.id, total = %order.total, "order placed");
        let publish = self
            .emitter
            .emit(&self.routing_key, &OrderPlaced::from_order(&order));

        Ok(PlacedOrder { order, publish })
    }

    /// Returns an order, provided it belongs to `user_id`.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        if order.user_id != user_id {
            return Err(FulfillmentError::NotAuthorized { order_id, user_id });
        }
        Ok(order)
    }
}
