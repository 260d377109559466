use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use domain::{Order, OrderId, OrderStatus, Product, ProductId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

/// A stored record: the last committed value plus the row lock guarding writers.
struct Row<T> {
    lock: Arc<Mutex<()>>,
    committed: std::sync::RwLock<T>,
}

impl<T: Clone> Row<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            lock: Arc::new(Mutex::new(())),
            committed: std::sync::RwLock::new(value),
        })
    }

    fn read(&self) -> T {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write(&self, value: T) {
        *self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = value;
    }
}

#[derive(Default)]
struct Tables {
    orders: RwLock<HashMap<OrderId, Arc<Row<Order>>>>,
    products: RwLock<HashMap<ProductId, Arc<Row<Product>>>>,
    fail_on_commit: AtomicBool,
}

/// In-memory order store for testing.
///
/// Mirrors the PostgreSQL semantics that the workers depend on: plain reads
/// see committed data, `*_for_update` takes an exclusive per-row lock held
/// until the transaction ends, and uncommitted writes are invisible to
/// everyone else. There is no deadlock detection, so transactions that lock
/// the same rows in opposite orders will wait on each other forever.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Tables>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product.
    pub async fn insert_product(&self, product: Product) {
        self.tables
            .products
            .write()
            .await
            .insert(product.id.clone(), Row::new(product));
    }

    /// Returns the committed stock of a product.
    pub async fn product_stock(&self, product_id: &ProductId) -> Option<u32> {
        let row = self.tables.products.read().await.get(product_id).cloned()?;
        Some(row.read().stock)
    }

    /// Returns the committed status of an order.
    pub async fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        let row = self.tables.orders.read().await.get(&order_id).cloned()?;
        Some(row.read().status())
    }

    /// Makes every subsequent commit fail until switched off again.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.tables.fail_on_commit.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let products = self.tables.products.read().await;
        if let Some(item) = order
            .items
            .iter()
            .find(|item| !products.contains_key(&item.product_id))
        {
            return Err(StoreError::ProductNotFound(item.product_id.clone()));
        }
        drop(products);

        self.tables
            .orders
            .write()
            .await
            .insert(order.id, Row::new(order.clone()));
        Ok(())
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = self.tables.orders.read().await.get(&order_id).cloned();
        Ok(row.map(|row| row.read()))
    }

    async fn find_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = self.tables.products.read().await.get(product_id).cloned();
        Ok(row.map(|row| row.read()))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            orders: HashMap::new(),
            products: HashMap::new(),
        }))
    }
}

/// A row locked by a transaction, with its pending value.
struct LockedRow<T> {
    row: Arc<Row<T>>,
    staged: T,
    dirty: bool,
    _guard: OwnedMutexGuard<()>,
}

impl<T: Clone> LockedRow<T> {
    async fn acquire(row: Arc<Row<T>>) -> Self {
        let guard = Arc::clone(&row.lock).lock_owned().await;
        // Read after locking so we see the previous holder's commit.
        let staged = row.read();
        Self {
            row,
            staged,
            dirty: false,
            _guard: guard,
        }
    }
}

/// Transaction over an [`InMemoryOrderStore`].
pub struct InMemoryTransaction {
    tables: Arc<Tables>,
    orders: HashMap<OrderId, LockedRow<Order>>,
    products: HashMap<ProductId, LockedRow<Product>>,
}

impl InMemoryTransaction {
    async fn lock_order(&mut self, order_id: OrderId) -> Option<&mut LockedRow<Order>> {
        if !self.orders.contains_key(&order_id) {
            let row = self.tables.orders.read().await.get(&order_id).cloned()?;
            self.orders.insert(order_id, LockedRow::acquire(row).await);
        }
        self.orders.get_mut(&order_id)
    }

    async fn lock_product(&mut self, product_id: &ProductId) -> Option<&mut LockedRow<Product>> {
        if !self.products.contains_key(product_id) {
            let row = self.tables.products.read().await.get(product_id).cloned()?;
            self.products
                .insert(product_id.clone(), LockedRow::acquire(row).await);
        }
        self.products.get_mut(product_id)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .lock_order(order_id)
            .await
            .map(|locked| locked.staged.clone()))
    }

    async fn find_product_for_update(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<Product>> {
        Ok(self
            .lock_product(product_id)
            .await
            .map(|locked| locked.staged.clone()))
    }

    async fn save_order_status(&mut self, order: &Order) -> Result<()> {
        let locked = self
            .lock_order(order.id)
            .await
            .ok_or(StoreError::OrderNotFound(order.id))?;
        locked.staged = order.clone();
        locked.dirty = true;
        Ok(())
    }

    async fn save_product_stock(&mut self, product_id: &ProductId, stock: u32) -> Result<()> {
        let locked = self
            .lock_product(product_id)
            .await
            .ok_or_else(|| StoreError::ProductNotFound(product_id.clone()))?;
        locked.staged.stock = stock;
        locked.staged.updated_at = Utc::now();
        locked.dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if self.tables.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }

        for locked in self.orders.values().filter(|l| l.dirty) {
            locked.row.write(locked.staged.clone());
        }
        for locked in self.products.values().filter(|l| l.dirty) {
            locked.row.write(locked.staged.clone());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
