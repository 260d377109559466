use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductId, UserId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool and verifies the database answers.
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .max_lifetime(Duration::from_secs(3600))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::info!("connected to postgres");

        Ok(Self { pool })
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a product or overwrites an existing one with the same id.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {value}")))
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: to_u32(row.try_get("stock")?, "stock")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
    })
}

async fn load_order(
    conn: &mut PgConnection,
    order_id: OrderId,
    for_update: bool,
) -> Result<Option<Order>> {
    let sql = if for_update {
        "SELECT id, user_id, status, total_cents, created_at, updated_at FROM orders WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, user_id, status, total_cents, created_at, updated_at FROM orders WHERE id = $1"
    };

    let Some(row) = sqlx::query(sql)
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let status: OrderStatus = row.try_get::<String, _>("status")?.parse()?;
    let user_id = UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?);
    let total = Money::from_cents(row.try_get("total_cents")?);
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let items = sqlx::query(
        r#"
        SELECT id, product_id, quantity
        FROM order_items
        WHERE order_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(row_to_item)
    .collect::<Result<Vec<_>>>()?;

    Ok(Some(Order::restore(
        order_id, user_id, status, total, items, created_at, updated_at,
    )))
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, total_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status().as_str())
        .bind(order.total.cents())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, position)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(i64::from(item.quantity))
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("order_items_product_id_fkey")
                {
                    return StoreError::ProductNotFound(item.product_id.clone());
                }
                StoreError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, order_id, false).await
    }

    async fn find_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        sqlx::query("SELECT id, name, price_cents, stock, updated_at FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_product)
            .transpose()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

/// Transaction over a [`PostgresOrderStore`]. Row locks are `SELECT … FOR UPDATE`.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn find_order_for_update(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        load_order(&mut self.tx, order_id, true).await
    }

    async fn find_product_for_update(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<Product>> {
        sqlx::query(
            "SELECT id, name, price_cents, stock, updated_at FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_product)
        .transpose()
    }

    async fn save_order_status(&mut self, order: &Order) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id.as_uuid())
            .bind(order.status().as_str())
            .bind(order.updated_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order.id));
        }
        Ok(())
    }

    async fn save_product_stock(&mut self, product_id: &ProductId, stock: u32) -> Result<()> {
        let result =
            sqlx::query("UPDATE products SET stock = $2, updated_at = NOW() WHERE id = $1")
                .bind(product_id.as_str())
                .bind(i64::from(stock))
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ProductNotFound(product_id.clone()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
