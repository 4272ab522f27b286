//! # Cart Repository
//!
//! Whole-cart persistence. A save replaces every line of the owner's cart in
//! one transaction, so a reader never sees half a cart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use harvest_core::{Cart, CartLine};
use harvest_engine::{CartStore, StoreResult};

use crate::error::DbResult;

#[derive(Debug, FromRow)]
struct CartRow {
    owner_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct CartLineRow {
    product_id: String,
    product_name: String,
    unit_price_cents: i64,
    quantity: i64,
    image_ref: Option<String>,
    added_at: DateTime<Utc>,
}

impl From<CartLineRow> for CartLine {
    fn from(row: CartLineRow) -> Self {
        CartLine {
            product_id: row.product_id,
            product_name: row.product_name,
            unit_price_cents: row.unit_price_cents,
            quantity: row.quantity,
            image_ref: row.image_ref,
            added_at: row.added_at,
        }
    }
}

/// Repository for the `carts` and `cart_lines` tables.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    pub async fn get_by_owner(&self, owner_id: &str) -> DbResult<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT owner_id, created_at, updated_at FROM carts WHERE owner_id = ?1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, CartLineRow>(
            r#"
            SELECT product_id, product_name, unit_price_cents, quantity, image_ref, added_at
            FROM cart_lines
            WHERE owner_id = ?1
            ORDER BY position
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Cart {
            owner_id: row.owner_id,
            lines: lines.into_iter().map(CartLine::from).collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    /// Replaces the stored cart of `cart.owner_id`.
    pub async fn replace(&self, cart: &Cart) -> DbResult<()> {
        debug!(owner_id = %cart.owner_id, lines = cart.lines.len(), "Saving cart");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (owner_id, created_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (owner_id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(&cart.owner_id)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart_lines WHERE owner_id = ?1")
            .bind(&cart.owner_id)
            .execute(&mut *tx)
            .await?;

        for (position, line) in cart.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cart_lines (
                    owner_id, product_id, position, product_name,
                    unit_price_cents, quantity, image_ref, added_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&cart.owner_id)
            .bind(&line.product_id)
            .bind(position as i64)
            .bind(&line.product_name)
            .bind(line.unit_price_cents)
            .bind(line.quantity)
            .bind(&line.image_ref)
            .bind(line.added_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_by_owner(&self, owner_id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cart_lines WHERE owner_id = ?1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM carts WHERE owner_id = ?1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(owner_id, "Cart deleted");
        Ok(())
    }
}

#[async_trait]
impl CartStore for CartRepository {
    async fn load(&self, owner_id: &str) -> StoreResult<Option<Cart>> {
        Ok(self.get_by_owner(owner_id).await?)
    }

    async fn save(&self, cart: &Cart) -> StoreResult<()> {
        Ok(self.replace(cart).await?)
    }

    async fn delete(&self, owner_id: &str) -> StoreResult<()> {
        Ok(self.delete_by_owner(owner_id).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use harvest_core::CatalogProduct;

    async fn repo() -> CartRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().carts()
    }

    fn product(id: &str, price: i64) -> CatalogProduct {
        CatalogProduct {
            id: id.into(),
            seller_id: "sunny-farm".into(),
            name: format!("Fresh {}", id),
            unit_price_cents: price,
            image_ref: None,
            unit: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_keeps_line_order() {
        let repo = repo().await;
        assert!(repo.load("buyer-1").await.unwrap().is_none());

        let mut cart = Cart::new("buyer-1");
        cart.add_line(&product("spinach", 399), 2).unwrap();
        cart.add_line(&product("carrots", 349), 1).unwrap();
        repo.save(&cart).await.unwrap();

        let stored = repo.load("buyer-1").await.unwrap().unwrap();
        let ids: Vec<&str> = stored.lines.iter().map(|l| l.product_id.as_str()).collect();
        assert_eq!(ids, vec!["spinach", "carrots"]);
        assert_eq!(stored.line("spinach").unwrap().unit_price_cents, 399);
    }

    #[tokio::test]
    async fn test_save_replaces_lines() {
        let repo = repo().await;
        let mut cart = Cart::new("buyer-1");
        cart.add_line(&product("spinach", 399), 2).unwrap();
        repo.save(&cart).await.unwrap();

        cart.remove_line("spinach");
        cart.add_line(&product("peppers", 449), 3).unwrap();
        repo.save(&cart).await.unwrap();

        let stored = repo.load("buyer-1").await.unwrap().unwrap();
        assert_eq!(stored.line_count(), 1);
        assert_eq!(stored.line("peppers").unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo().await;
        let mut cart = Cart::new("buyer-1");
        cart.add_line(&product("spinach", 399), 2).unwrap();
        repo.save(&cart).await.unwrap();

        repo.delete("buyer-1").await.unwrap();
        assert!(repo.load("buyer-1").await.unwrap().is_none());
        // Deleting again is fine.
        repo.delete("buyer-1").await.unwrap();
    }
}
