//! Inventory reservation: decides whether a placed order can be fulfilled.
//!
//! Per order the status moves PENDING → CONFIRMED or PENDING → CANCELLED;
//! an order already in a terminal state is left alone. Stock is only ever
//! read and written under the store's row locks, inside one transaction per
//! message.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use domain::{OrderPlaced, OrderResult, OrderStatus, ProductId, REASON_OUT_OF_STOCK};
use event_bus::{EventBus, Topology};
use order_store::{OrderStore, StoreTransaction};
use tokio::task::JoinHandle;

use crate::{
    Disposition, EventEmitter, FulfillmentError, MessageHandler, PublishHandle, Result, Shutdown,
    spawn_consumer,
};

/// How a placed order was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Every line fitted and stock was debited.
    Confirmed,
    /// `product_id` was the first line without enough stock; nothing was
    /// debited.
    Cancelled { product_id: ProductId },
    /// The order had already reached `status`; nothing changed.
    AlreadyTerminal(OrderStatus),
}

impl ReservationOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReservationOutcome::Confirmed => "confirmed",
            ReservationOutcome::Cancelled { .. } => "cancelled",
            ReservationOutcome::AlreadyTerminal(_) => "already_terminal",
        }
    }
}

/// Result of processing one `OrderPlaced` event.
#[derive(Debug)]
pub struct Reservation {
    pub outcome: ReservationOutcome,
    /// Publish of the `OrderResult`, absent for a no-op.
    pub publish: Option<PublishHandle>,
}

/// Consumes `OrderPlaced` and reserves stock for it.
pub struct ReservationWorker<S: OrderStore, B: EventBus> {
    store: S,
    emitter: EventEmitter<B>,
    confirmed_routing_key: String,
    failed_routing_key: String,
}

impl<S: OrderStore, B: EventBus + 'static> ReservationWorker<S, B> {
    /// Creates a worker emitting results with the topology's routing keys.
    pub fn new(store: S, emitter: EventEmitter<B>, topology: &Topology) -> Self {
        Self {
            store,
            emitter,
            confirmed_routing_key: topology.confirmed_routing_key.clone(),
            failed_routing_key: topology.failed_routing_key.clone(),
        }
    }

    /// Starts the consumer loop on the placed-order queue.
    pub async fn spawn<Q>(
        self: Arc<Self>,
        bus: &Q,
        queue: &str,
        shutdown: &Shutdown,
    ) -> Result<JoinHandle<()>>
    where
        S: 'static,
        Q: EventBus + ?Sized,
    {
        let subscription = bus.consume(queue).await?;
        Ok(spawn_consumer(subscription, self, shutdown.clone()))
    }

    /// Processes one placed order.
    ///
    /// The outcome is committed before the `OrderResult` is emitted. On error
    /// the transaction is rolled back and nothing is emitted.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    pub async fn process(&self, event: &OrderPlaced) -> Result<Reservation> {
        let started = Instant::now();
        let result = self.reserve(event).await;
        metrics::histogram!("inventory_processing_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::counter!("inventory_orders_processed_total", "outcome" => "error")
                    .increment(1);
                return Err(e);
            }
        };
        metrics::counter!("inventory_orders_processed_total", "outcome" => outcome.label())
            .increment(1);

        let publish = match &outcome {
            ReservationOutcome::Confirmed => {
                tracing::info!("order confirmed");
                let result = OrderResult::confirmed(event.order_id, event.user_id);
                Some(self.emitter.emit(&self.confirmed_routing_key, &result))
            }
            ReservationOutcome::Cancelled { product_id } => {
                tracing::info!(%product_id, "order cancelled: out of stock");
                let result =
                    OrderResult::cancelled(event.order_id, event.user_id, REASON_OUT_OF_STOCK);
                Some(self.emitter.emit(&self.failed_routing_key, &result))
            }
            ReservationOutcome::AlreadyTerminal(status) => {
                tracing::info!(%status, "order already settled, skipping");
                None
            }
        };

        Ok(Reservation { outcome, publish })
    }

    async fn reserve(&self, event: &OrderPlaced) -> Result<ReservationOutcome> {
        let mut tx = self.store.begin().await?;
        match decide(tx.as_mut(), event).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Runs the reservation inside `tx`, staging every write. Committing is left
/// to the caller.
async fn decide(tx: &mut dyn StoreTransaction, event: &OrderPlaced) -> Result<ReservationOutcome> {
    let order = tx
        .find_order_for_update(event.order_id)
        .await?
        .ok_or(FulfillmentError::OrderNotFound(event.order_id))?;

    let pending = match order.try_into_pending() {
        Ok(pending) => pending,
        Err(order) => return Ok(ReservationOutcome::AlreadyTerminal(order.status())),
    };

    // Lock every product in a fixed order so concurrent orders sharing
    // products cannot deadlock.
    let mut remaining = HashMap::new();
    let product_ids: BTreeSet<&ProductId> = event.items.iter().map(|item| &item.product_id).collect();
    for product_id in product_ids {
        let product = tx
            .find_product_for_update(product_id)
            .await?
            .ok_or_else(|| FulfillmentError::ProductNotFound(product_id.clone()))?;
        remaining.insert(product_id.clone(), product.stock);
    }

    // Lines are evaluated in payload order; a product listed twice is
    // checked against what its earlier lines left over.
    for item in &event.items {
        let stock = remaining
            .get_mut(&item.product_id)
            .ok_or_else(|| FulfillmentError::ProductNotFound(item.product_id.clone()))?;
        if *stock < item.quantity {
            tx.save_order_status(&pending.cancel()).await?;
            return Ok(ReservationOutcome::Cancelled {
                product_id: item.product_id.clone(),
            });
        }
        *stock -= item.quantity;
    }

    for (product_id, stock) in &remaining {
        tx.save_product_stock(product_id, *stock).await?;
    }
    tx.save_order_status(&pending.confirm()).await?;
    Ok(ReservationOutcome::Confirmed)
}

#[async_trait]
impl<S, B> MessageHandler for ReservationWorker<S, B>
where
    S: OrderStore,
    B: EventBus + 'static,
{
    async fn handle(&self, body: &[u8], redelivered: bool) -> Disposition {
        let event: OrderPlaced = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "discarding malformed OrderPlaced message");
                return Disposition::Discard;
            }
        };

        match self.process(&event).await {
            Ok(_) => Disposition::Ack,
            Err(e) => {
                tracing::warn!(
                    order_id = %event.order_id,
                    redelivered,
                    error = %e,
                    "reservation failed, requeueing"
                );
                Disposition::Requeue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, Order, OrderItem, PlacedItem, Product, UserId};
    use event_bus::{InMemoryEventBus, declare_topology};
    use order_store::InMemoryOrderStore;

    struct Harness {
        worker: ReservationWorker<InMemoryOrderStore, InMemoryEventBus>,
        store: InMemoryOrderStore,
        bus: Arc<InMemoryEventBus>,
        topology: Topology,
    }

    impl Harness {
        async fn new(stock: &[(&str, u32)]) -> Self {
            let store = InMemoryOrderStore::new();
            for (sku, qty) in stock {
                store
                    .insert_product(Product::new(*sku, *sku, Money::from_cents(100), *qty))
                    .await;
            }
            let bus = Arc::new(InMemoryEventBus::new());
            let topology = Topology::default();
            declare_topology(bus.as_ref(), &topology).await.unwrap();

            let emitter = EventEmitter::new(Arc::clone(&bus), topology.exchange.clone());
            let worker = ReservationWorker::new(store.clone(), emitter, &topology);
            Self {
                worker,
                store,
                bus,
                topology,
            }
        }

        async fn place(&self, items: &[(&str, u32)]) -> OrderPlaced {
            let order = Order::place(
                UserId::new(),
                items
                    .iter()
                    .map(|(sku, qty)| OrderItem::new(*sku, *qty))
                    .collect(),
                Money::from_cents(100),
            )
            .unwrap();
            self.store.create_order(&order).await.unwrap();
            OrderPlaced::from_order(&order)
        }

        async fn stock(&self, sku: &str) -> u32 {
            self.store
                .product_stock(&ProductId::new(sku))
                .await
                .unwrap()
        }

        async fn results(&self, queue: &str) -> Vec<OrderResult> {
            self.bus
                .drain(queue)
                .await
                .iter()
                .map(|body| serde_json::from_slice(body).unwrap())
                .collect()
        }
    }

    async fn settle(reservation: Reservation) -> ReservationOutcome {
        if let Some(publish) = reservation.publish {
            publish.await.unwrap().unwrap();
        }
        reservation.outcome
    }

    #[tokio::test]
    async fn test_confirm_debits_every_line() {
        let h = Harness::new(&[("A", 5), ("B", 2)]).await;
        let event = h.place(&[("A", 3), ("B", 2)]).await;

        let outcome = settle(h.worker.process(&event).await.unwrap()).await;

        assert_eq!(outcome, ReservationOutcome::Confirmed);
        assert_eq!(h.stock("A").await, 2);
        assert_eq!(h.stock("B").await, 0);
        assert_eq!(
            h.store.order_status(event.order_id).await,
            Some(OrderStatus::Confirmed)
        );

        let results = h.results(&h.topology.confirmed_queue).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].order_id, event.order_id);
        assert_eq!(results[0].user_id, event.user_id);
        assert_eq!(results[0].reason, None);
    }

    #[tokio::test]
    async fn test_shortage_cancels_without_debiting() {
        let h = Harness::new(&[("A", 5), ("B", 1)]).await;
        let event = h.place(&[("A", 3), ("B", 2)]).await;

        let outcome = settle(h.worker.process(&event).await.unwrap()).await;

        assert_eq!(
            outcome,
            ReservationOutcome::Cancelled {
                product_id: ProductId::new("B")
            }
        );
        assert_eq!(h.stock("A").await, 5);
        assert_eq!(h.stock("B").await, 1);
        assert_eq!(
            h.store.order_status(event.order_id).await,
            Some(OrderStatus::Cancelled)
        );

        let results = h.results(&h.topology.failed_queue).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].reason.as_deref(), Some(REASON_OUT_OF_STOCK));
        assert!(h.results(&h.topology.confirmed_queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_first_short_line_in_payload_order_is_reported() {
        let h = Harness::new(&[("A", 0), ("B", 0)]).await;
        let event = h.place(&[("B", 1), ("A", 1)]).await;

        let outcome = settle(h.worker.process(&event).await.unwrap()).await;
        assert_eq!(
            outcome,
            ReservationOutcome::Cancelled {
                product_id: ProductId::new("B")
            }
        );
    }

    #[tokio::test]
    async fn test_repeated_product_counts_earlier_lines() {
        let h = Harness::new(&[("A", 4)]).await;
        let event = h.place(&[("A", 3), ("A", 2)]).await;

        let outcome = settle(h.worker.process(&event).await.unwrap()).await;
        assert!(matches!(outcome, ReservationOutcome::Cancelled { .. }));
        assert_eq!(h.stock("A").await, 4);

        let event = h.place(&[("A", 2), ("A", 2)]).await;
        let outcome = settle(h.worker.process(&event).await.unwrap()).await;
        assert_eq!(outcome, ReservationOutcome::Confirmed);
        assert_eq!(h.stock("A").await, 0);
    }

    #[tokio::test]
    async fn test_terminal_order_is_a_no_op() {
        let h = Harness::new(&[("A", 5)]).await;
        let event = h.place(&[("A", 1)]).await;
        settle(h.worker.process(&event).await.unwrap()).await;
        h.results(&h.topology.confirmed_queue).await;

        let again = h.worker.process(&event).await.unwrap();
        assert!(again.publish.is_none());
        assert_eq!(
            again.outcome,
            ReservationOutcome::AlreadyTerminal(OrderStatus::Confirmed)
        );
        assert_eq!(h.stock("A").await, 4);
        assert!(h.results(&h.topology.confirmed_queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_is_an_error() {
        let h = Harness::new(&[("A", 5)]).await;
        let unstored = Order::place(
            UserId::new(),
            vec![OrderItem::new("A", 1)],
            Money::from_cents(100),
        )
        .unwrap();

        let result = h.worker.process(&OrderPlaced::from_order(&unstored)).await;
        assert!(matches!(result, Err(FulfillmentError::OrderNotFound(_))));
        assert_eq!(h.stock("A").await, 5);
    }

    #[tokio::test]
    async fn test_missing_product_is_an_error() {
        let h = Harness::new(&[("A", 5)]).await;
        let mut event = h.place(&[("A", 1)]).await;
        event.items.push(PlacedItem {
            product_id: ProductId::new("GONE"),
            quantity: 1,
        });

        let result = h.worker.process(&event).await;
        assert!(matches!(result, Err(FulfillmentError::ProductNotFound(_))));
        assert_eq!(
            h.store.order_status(event.order_id).await,
            Some(OrderStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_state_and_emits_nothing() {
        let h = Harness::new(&[("A", 5)]).await;
        let event = h.place(&[("A", 2)]).await;
        h.store.set_fail_on_commit(true);

        assert!(h.worker.process(&event).await.is_err());
        assert_eq!(h.stock("A").await, 5);
        assert_eq!(
            h.store.order_status(event.order_id).await,
            Some(OrderStatus::Pending)
        );
        assert_eq!(h.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_dispositions() {
        let h = Harness::new(&[("A", 5)]).await;

        assert_eq!(h.worker.handle(b"not json", false).await, Disposition::Discard);
        assert_eq!(
            h.worker.handle(br#"{"order_id": 1}"#, false).await,
            Disposition::Discard
        );

        let event = h.place(&[("A", 1)]).await;
        let body = serde_json::to_vec(&event).unwrap();
        h.store.set_fail_on_commit(true);
        assert_eq!(h.worker.handle(&body, false).await, Disposition::Requeue);

        h.store.set_fail_on_commit(false);
        assert_eq!(h.worker.handle(&body, true).await, Disposition::Ack);
        assert_eq!(h.worker.handle(&body, true).await, Disposition::Ack);
        assert_eq!(h.stock("A").await, 4);
    }
}
