use async_trait::async_trait;
use domain::{Order, OrderId, Product, ProductId};

use crate::Result;

/// Core trait for order/product storage.
///
/// Reads outside a transaction see committed data only. Anything that must
/// be decided atomically goes through [`OrderStore::begin`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order together with its items.
    async fn create_order(&self, order: &Order) -> Result<()>;

    /// Loads an order and its items.
    ///
    /// Returns None if the order doesn't exist.
    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads a product without locking it.
    async fn find_product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A unit of work against the store.
///
/// Row locks taken by the `*_for_update` methods are held until the
/// transaction commits, rolls back or is dropped. Dropping without
/// committing discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Loads an order and takes an exclusive lock on its row.
    async fn find_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads a product and takes an exclusive lock on its row.
    ///
    /// Locking a row already held by this transaction returns it again,
    /// including any stock written earlier in the transaction.
    async fn find_product_for_update(&mut self, product_id: &ProductId)
    -> Result<Option<Product>>;

    /// Writes the order's current status.
    async fn save_order_status(&mut self, order: &Order) -> Result<()>;

    /// Writes a product's new stock count.
    async fn save_product_stock(&mut self, product_id: &ProductId, stock: u32) -> Result<()>;

    /// Makes every write visible and releases the locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write and releases the locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for std::sync::Arc<T> {
    async fn create_order(&self, order: &Order) -> Result<()> {
        (**self).create_order(order).await
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        (**self).find_order(order_id).await
    }

    async fn find_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        (**self).find_product(product_id).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        (**self).begin().await
    }
}
