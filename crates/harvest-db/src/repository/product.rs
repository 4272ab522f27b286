//! # Product Repository
//!
//! Catalog entries and stock counters.
//!
//! ## Conditional Decrement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE stock                                                           │
//! │     SET available_quantity = available_quantity - :qty                  │
//! │   WHERE product_id = :id                                                │
//! │     AND is_listed = 1                                                   │
//! │     AND available_quantity >= :qty        ◄── check and write are one   │
//! │  RETURNING available_quantity                 statement, so two buyers  │
//! │                                               can never both pass       │
//! │  row returned ──► Reserved { remaining }                                │
//! │  no row ───────► read the record to say why:                            │
//! │                    missing      → NotFound                              │
//! │                    unlisted     → NotAvailable                          │
//! │                    otherwise    → InsufficientStock { available }       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! SQLite serializes writers, so the statement is the critical section for
//! that product. No lock is held across statements.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use harvest_core::{CatalogProduct, RejectionReason, ReserveOutcome, StockRecord};
use harvest_engine::{Catalog, Entity, StockStore, StoreResult};

use crate::error::{DbError, DbResult};

/// Capped increment of one stock row. Binds: product id, quantity, timestamp.
pub(crate) const INCREMENT_STOCK_SQL: &str = r#"
    UPDATE stock
    SET
        available_quantity = CASE
            WHEN max_sellable IS NULL THEN available_quantity + ?2
            ELSE MAX(available_quantity, MIN(available_quantity + ?2, max_sellable))
        END,
        updated_at = ?3
    WHERE product_id = ?1
    RETURNING available_quantity
"#;

#[derive(Debug, FromRow)]
struct ProductRow {
    id: String,
    seller_id: String,
    name: String,
    unit_price_cents: i64,
    image_ref: Option<String>,
    unit: Option<String>,
    category: Option<String>,
}

impl From<ProductRow> for CatalogProduct {
    fn from(row: ProductRow) -> Self {
        CatalogProduct {
            id: row.id,
            seller_id: row.seller_id,
            name: row.name,
            unit_price_cents: row.unit_price_cents,
            image_ref: row.image_ref,
            unit: row.unit,
            category: row.category,
        }
    }
}

#[derive(Debug, FromRow)]
struct StockRow {
    product_id: String,
    available_quantity: i64,
    is_listed: bool,
    max_sellable: Option<i64>,
}

impl From<StockRow> for StockRecord {
    fn from(row: StockRow) -> Self {
        StockRecord {
            product_id: row.product_id,
            available_quantity: row.available_quantity,
            is_listed: row.is_listed,
            max_sellable: row.max_sellable,
        }
    }
}

/// Repository for the `products` and `stock` tables.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let outcome = repo.reserve("tomatoes", 3).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CatalogProduct>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, seller_id, name, unit_price_cents, image_ref, unit, category
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CatalogProduct::from))
    }

    /// Inserts a product or replaces its catalog fields.
    pub async fn upsert_product(&self, product: &CatalogProduct) -> DbResult<()> {
        debug!(id = %product.id, seller_id = %product.seller_id, "Upserting product");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO products (
                id, seller_id, name, unit_price_cents,
                image_ref, unit, category, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (id) DO UPDATE SET
                seller_id = excluded.seller_id,
                name = excluded.name,
                unit_price_cents = excluded.unit_price_cents,
                image_ref = excluded.image_ref,
                unit = excluded.unit,
                category = excluded.category,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.seller_id)
        .bind(&product.name)
        .bind(product.unit_price_cents)
        .bind(&product.image_ref)
        .bind(&product.unit)
        .bind(&product.category)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Products of one seller, by name.
    pub async fn list_by_seller(&self, seller_id: &str) -> DbResult<Vec<CatalogProduct>> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, seller_id, name, unit_price_cents, image_ref, unit, category
            FROM products
            WHERE seller_id = ?1
            ORDER BY name
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CatalogProduct::from).collect())
    }

    /// Counts catalog products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Stock
    // =========================================================================

    pub async fn get_stock(&self, product_id: &str) -> DbResult<Option<StockRecord>> {
        let row = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT product_id, available_quantity, is_listed, max_sellable
            FROM stock
            WHERE product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StockRecord::from))
    }

    /// Conditional decrement. See the module docs.
    pub async fn reserve(&self, product_id: &str, quantity: i64) -> DbResult<ReserveOutcome> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE stock
            SET
                available_quantity = available_quantity - ?2,
                updated_at = ?3
            WHERE product_id = ?1
              AND is_listed = 1
              AND available_quantity >= ?2
            RETURNING available_quantity
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            debug!(product_id, quantity, remaining, "Stock reserved");
            return Ok(ReserveOutcome::Reserved { remaining });
        }

        let record = self
            .get_stock(product_id)
            .await?
            .ok_or_else(|| DbError::not_found(Entity::Product, product_id))?;

        let reason = match record.check_reserve(quantity) {
            Err(reason) => reason,
            // Stock went back up between the two statements; report what we
            // saw without retrying so the caller decides.
            Ok(()) => RejectionReason::InsufficientStock {
                available: record.available_quantity,
            },
        };
        debug!(product_id, quantity, ?reason, "Stock reservation rejected");
        Ok(ReserveOutcome::Rejected(reason))
    }

    /// Capped increment. Returns the new available quantity.
    pub async fn add_stock(&self, product_id: &str, quantity: i64) -> DbResult<i64> {
        let available: Option<i64> = sqlx::query_scalar(INCREMENT_STOCK_SQL)
            .bind(product_id)
            .bind(quantity)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        let available = available.ok_or_else(|| DbError::not_found(Entity::Product, product_id))?;
        debug!(product_id, quantity, available, "Stock incremented");
        Ok(available)
    }

    pub async fn insert_stock(&self, record: &StockRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, available_quantity, is_listed, max_sellable, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&record.product_id)
        .bind(record.available_quantity)
        .bind(record.is_listed)
        .bind(record.max_sellable)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &record.product_id),
            other => other,
        })?;

        Ok(())
    }

    /// Soft-deletes (or restores) a product by flipping `is_listed`.
    pub async fn update_listed(&self, product_id: &str, listed: bool) -> DbResult<StockRecord> {
        let row = sqlx::query_as::<_, StockRow>(
            r#"
            UPDATE stock
            SET is_listed = ?2, updated_at = ?3
            WHERE product_id = ?1
            RETURNING product_id, available_quantity, is_listed, max_sellable
            "#,
        )
        .bind(product_id)
        .bind(listed)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StockRecord::from)
            .ok_or_else(|| DbError::not_found(Entity::Product, product_id))
    }
}

// =============================================================================
// Engine Collaborators
// =============================================================================

#[async_trait]
impl Catalog for ProductRepository {
    async fn product(&self, product_id: &str) -> StoreResult<Option<CatalogProduct>> {
        Ok(self.get_by_id(product_id).await?)
    }

    async fn upsert(&self, product: &CatalogProduct) -> StoreResult<()> {
        Ok(self.upsert_product(product).await?)
    }
}

#[async_trait]
impl StockStore for ProductRepository {
    async fn try_decrement(&self, product_id: &str, quantity: i64) -> StoreResult<ReserveOutcome> {
        Ok(self.reserve(product_id, quantity).await?)
    }

    async fn increment(&self, product_id: &str, quantity: i64) -> StoreResult<i64> {
        Ok(self.add_stock(product_id, quantity).await?)
    }

    async fn stock(&self, product_id: &str) -> StoreResult<Option<StockRecord>> {
        Ok(self.get_stock(product_id).await?)
    }

    async fn register(&self, record: &StockRecord) -> StoreResult<()> {
        Ok(self.insert_stock(record).await?)
    }

    async fn set_listed(&self, product_id: &str, listed: bool) -> StoreResult<StockRecord> {
        Ok(self.update_listed(product_id, listed).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use harvest_engine::StoreError;

    async fn repo() -> ProductRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().products()
    }

    fn tomatoes() -> CatalogProduct {
        CatalogProduct {
            id: "tomatoes".into(),
            seller_id: "green-acres".into(),
            name: "Heirloom Tomatoes".into(),
            unit_price_cents: 499,
            image_ref: Some("img/tomatoes.jpg".into()),
            unit: Some("lb".into()),
            category: Some("vegetables".into()),
        }
    }

    #[tokio::test]
    async fn test_catalog_upsert_replaces() {
        let repo = repo().await;
        assert!(repo.product("tomatoes").await.unwrap().is_none());

        repo.upsert(&tomatoes()).await.unwrap();
        let mut changed = tomatoes();
        changed.unit_price_cents = 549;
        repo.upsert(&changed).await.unwrap();

        assert_eq!(repo.product("tomatoes").await.unwrap(), Some(changed));
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.list_by_seller("green-acres").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decrement_enforces_floor() {
        let repo = repo().await;
        repo.register(&StockRecord::new("kale", 5, None)).await.unwrap();

        assert_eq!(
            repo.try_decrement("kale", 3).await.unwrap(),
            ReserveOutcome::Reserved { remaining: 2 }
        );
        assert_eq!(
            repo.try_decrement("kale", 3).await.unwrap(),
            ReserveOutcome::Rejected(RejectionReason::InsufficientStock { available: 2 })
        );
        assert_eq!(repo.stock("kale").await.unwrap().unwrap().available_quantity, 2);
    }

    #[tokio::test]
    async fn test_unlisted_and_unknown() {
        let repo = repo().await;
        repo.register(&StockRecord::new("kale", 5, None)).await.unwrap();

        let record = repo.set_listed("kale", false).await.unwrap();
        assert!(!record.is_listed);
        assert_eq!(
            repo.try_decrement("kale", 1).await.unwrap(),
            ReserveOutcome::Rejected(RejectionReason::NotAvailable)
        );

        assert_eq!(
            repo.try_decrement("durian", 1).await.unwrap_err(),
            StoreError::not_found(Entity::Product, "durian")
        );
        assert!(repo.increment("durian", 1).await.is_err());
        assert!(repo.set_listed("durian", true).await.is_err());
    }

    #[tokio::test]
    async fn test_increment_respects_ceiling() {
        let repo = repo().await;
        repo.register(&StockRecord::new("berries", 8, Some(10))).await.unwrap();
        repo.register(&StockRecord::new("plums", 8, None)).await.unwrap();

        assert_eq!(repo.increment("berries", 5).await.unwrap(), 10);
        assert_eq!(repo.increment("plums", 5).await.unwrap(), 13);
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let repo = repo().await;
        repo.register(&StockRecord::new("kale", 5, None)).await.unwrap();

        let err = repo.register(&StockRecord::new("kale", 1, None)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                entity: Entity::Product,
                id: "kale".into()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_oversell() {
        let repo = repo().await;
        repo.register(&StockRecord::new("tomatoes", 10, None)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.try_decrement("tomatoes", 1).await }));
        }

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_reserved() {
                reserved += 1;
            }
        }

        assert_eq!(reserved, 10);
        assert_eq!(repo.stock("tomatoes").await.unwrap().unwrap().available_quantity, 0);
    }
}
