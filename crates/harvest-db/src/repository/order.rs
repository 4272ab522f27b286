//! # Order Repository
//!
//! SQLite order ledger: `orders` plus frozen `order_lines`.
//!
//! ## Mutations After Append
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transition_status   UPDATE orders ... WHERE id = ? AND status = ?      │
//! │                      0 rows + order exists → stale status (None)        │
//! │  update_details      COALESCE per column, line items untouched          │
//! │  release_line        one transaction:                                   │
//! │                        released_at set?  → commit nothing               │
//! │                        stock += qty (capped), released_at = now         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `release_line` writes the `stock` table as well. It shares the pool with
//! `ProductRepository`, so both updates commit or roll back together.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::QueryAs;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use harvest_core::{Order, OrderDetailsUpdate, OrderLine, OrderStatus, PaymentStatus};
use harvest_engine::{Entity, LineRelease, OrderLedger, OrderReleases, StoreResult};

use crate::error::{DbError, DbResult};
use crate::repository::product::INCREMENT_STOCK_SQL;

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    owner_id: String,
    total_cents: i64,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: Option<String>,
    shipping_address: Option<String>,
    billing_address: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderLineRow {
    order_id: String,
    product_id: String,
    product_name: String,
    quantity: i64,
    unit_price_cents: i64,
    line_total_cents: i64,
    released_at: Option<DateTime<Utc>>,
}

/// Which orders a read selects.
#[derive(Debug, Clone, Copy)]
enum OrderFilter<'a> {
    All,
    Id(&'a str),
    Owner(&'a str),
    Status(OrderStatus),
    Product(&'a str),
}

impl OrderFilter<'_> {
    fn clause(&self) -> &'static str {
        match self {
            OrderFilter::All => "1 = 1",
            OrderFilter::Id(_) => "id = ?1",
            OrderFilter::Owner(_) => "owner_id = ?1",
            OrderFilter::Status(_) => "status = ?1",
            OrderFilter::Product(_) => "id IN (SELECT order_id FROM order_lines WHERE product_id = ?1)",
        }
    }
}

fn bind_filter<'q, O>(
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    filter: OrderFilter<'q>,
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    match filter {
        OrderFilter::All => query,
        OrderFilter::Id(v) | OrderFilter::Owner(v) | OrderFilter::Product(v) => query.bind(v),
        OrderFilter::Status(status) => query.bind(status),
    }
}

/// Repository for the `orders` and `order_lines` tables.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Inserts the order and its lines in one transaction.
    pub async fn insert_order(&self, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, owner_id = %order.owner_id, lines = order.lines.len(), "Inserting order");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, owner_id, total_cents, status, payment_status,
                payment_method, shipping_address, billing_address, notes,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&order.id)
        .bind(&order.owner_id)
        .bind(order.total_cents)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(&order.payment_method)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &order.id),
            other => other,
        })?;

        for (position, line) in order.lines.iter().enumerate() {
            let released_at = order
                .is_stock_released(&line.product_id)
                .then_some(order.updated_at);

            sqlx::query(
                r#"
                INSERT INTO order_lines (
                    order_id, product_id, position, product_name,
                    quantity, unit_price_cents, line_total_cents, released_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&order.id)
            .bind(&line.product_id)
            .bind(position as i64)
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .bind(line.line_total_cents)
            .bind(released_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        Ok(self.load(OrderFilter::Id(id)).await?.into_iter().next())
    }

    /// Compare-and-set on `status`. `None` when the stored status is not `from`.
    pub async fn update_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> DbResult<Option<Order>> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?3, updated_at = ?4
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(id).await? {
                Some(current) => {
                    debug!(id, expected = %from, actual = %current.status, "Stale status transition");
                    Ok(None)
                }
                None => Err(DbError::not_found(Entity::Order, id)),
            };
        }

        debug!(id, from = %from, to = %to, "Order status updated");
        self.get_by_id(id).await
    }

    /// Overwrites only the fields present in `update`.
    pub async fn update_metadata(&self, id: &str, update: &OrderDetailsUpdate, at: DateTime<Utc>) -> DbResult<Order> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET
                payment_status = COALESCE(?2, payment_status),
                payment_method = COALESCE(?3, payment_method),
                shipping_address = COALESCE(?4, shipping_address),
                billing_address = COALESCE(?5, billing_address),
                notes = COALESCE(?6, notes),
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(update.payment_status)
        .bind(&update.payment_method)
        .bind(&update.shipping_address)
        .bind(&update.billing_address)
        .bind(&update.notes)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(Entity::Order, id));
        }
        self.require(id).await
    }

    /// Gives one line's stock back and stamps `released_at`, in one
    /// transaction. The quantity is `None` when the line was already released.
    pub async fn release_line_stock(
        &self,
        id: &str,
        product_id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<(Order, Option<i64>)> {
        let mut tx = self.pool.begin().await?;

        let line: Option<(i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT quantity, released_at FROM order_lines WHERE order_id = ?1 AND product_id = ?2",
        )
        .bind(id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        let available = match line {
            None => {
                let order: Option<i64> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = ?1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
                return Err(match order {
                    Some(_) => DbError::not_found(Entity::Product, product_id),
                    None => DbError::not_found(Entity::Order, id),
                });
            }
            Some((_, Some(_))) => None,
            Some((quantity, None)) => {
                let available: Option<i64> = sqlx::query_scalar(INCREMENT_STOCK_SQL)
                    .bind(product_id)
                    .bind(quantity)
                    .bind(at)
                    .fetch_optional(&mut *tx)
                    .await?;
                let available = available.ok_or_else(|| DbError::not_found(Entity::Product, product_id))?;

                sqlx::query(
                    r#"
                    UPDATE order_lines
                    SET released_at = ?3
                    WHERE order_id = ?1 AND product_id = ?2 AND released_at IS NULL
                    "#,
                )
                .bind(id)
                .bind(product_id)
                .bind(at)
                .execute(&mut *tx)
                .await?;

                sqlx::query("UPDATE orders SET updated_at = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(at)
                    .execute(&mut *tx)
                    .await?;

                Some(available)
            }
        };

        tx.commit().await?;
        debug!(id, product_id, ?available, "Order line released");
        Ok((self.require(id).await?, available))
    }

    async fn require(&self, id: &str) -> DbResult<Order> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found(Entity::Order, id))
    }

    /// Loads matching orders with their lines, oldest first.
    async fn load(&self, filter: OrderFilter<'_>) -> DbResult<Vec<Order>> {
        let order_sql = format!(
            r#"
            SELECT
                id, owner_id, total_cents, status, payment_status,
                payment_method, shipping_address, billing_address, notes,
                created_at, updated_at
            FROM orders
            WHERE {}
            ORDER BY created_at, id
            "#,
            filter.clause()
        );
        let rows = bind_filter(sqlx::query_as::<_, OrderRow>(&order_sql), filter)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let line_sql = format!(
            r#"
            SELECT
                order_id, product_id, product_name, quantity,
                unit_price_cents, line_total_cents, released_at
            FROM order_lines
            WHERE order_id IN (SELECT id FROM orders WHERE {})
            ORDER BY order_id, position
            "#,
            filter.clause()
        );
        let line_rows = bind_filter(sqlx::query_as::<_, OrderLineRow>(&line_sql), filter)
            .fetch_all(&self.pool)
            .await?;

        let mut lines_by_order: HashMap<String, Vec<OrderLineRow>> = HashMap::new();
        for line in line_rows {
            lines_by_order.entry(line.order_id.clone()).or_default().push(line);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let lines = lines_by_order.remove(&row.id).unwrap_or_default();
                assemble(row, lines)
            })
            .collect())
    }
}

fn assemble(row: OrderRow, line_rows: Vec<OrderLineRow>) -> Order {
    let mut released: Vec<(DateTime<Utc>, usize, String)> = line_rows
        .iter()
        .enumerate()
        .filter_map(|(position, l)| l.released_at.map(|at| (at, position, l.product_id.clone())))
        .collect();
    released.sort();

    let lines = line_rows
        .into_iter()
        .map(|l| OrderLine {
            product_id: l.product_id,
            product_name: l.product_name,
            quantity: l.quantity,
            unit_price_cents: l.unit_price_cents,
            line_total_cents: l.line_total_cents,
        })
        .collect();

    Order {
        id: row.id,
        owner_id: row.owner_id,
        lines,
        total_cents: row.total_cents,
        status: row.status,
        payment_status: row.payment_status,
        payment_method: row.payment_method,
        shipping_address: row.shipping_address,
        billing_address: row.billing_address,
        notes: row.notes,
        released_product_ids: released.into_iter().map(|(_, _, id)| id).collect(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

// =============================================================================
// Engine Collaborator
// =============================================================================

#[async_trait]
impl OrderLedger for OrderRepository {
    async fn append(&self, order: &Order) -> StoreResult<()> {
        Ok(self.insert_order(order).await?)
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.get_by_id(order_id).await?)
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.load(OrderFilter::All).await?)
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Order>> {
        Ok(self.load(OrderFilter::Owner(owner_id)).await?)
    }

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>> {
        Ok(self.load(OrderFilter::Status(status)).await?)
    }

    async fn list_by_product(&self, product_id: &str) -> StoreResult<Vec<Order>> {
        Ok(self.load(OrderFilter::Product(product_id)).await?)
    }

    async fn transition_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        Ok(self.update_status(order_id, from, to, at).await?)
    }

    async fn update_details(
        &self,
        order_id: &str,
        update: &OrderDetailsUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<Order> {
        Ok(self.update_metadata(order_id, update, at).await?)
    }
}

#[async_trait]
impl OrderReleases for OrderRepository {
    async fn release_line(&self, order_id: &str, product_id: &str, at: DateTime<Utc>) -> StoreResult<LineRelease> {
        let (order, available) = self.release_line_stock(order_id, product_id, at).await?;
        Ok(LineRelease { order, available })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
