//! # Catalog
//!
//! The product catalog collaborator: names, prices, images.
//!
//! The engine reads it to snapshot product data into cart lines and order
//! lines. Stock lives in the [`StockStore`](crate::stock::StockStore), not here.

use async_trait::async_trait;
use dashmap::DashMap;

use harvest_core::CatalogProduct;

use crate::error::{Entity, StoreError, StoreResult};

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the current view of a product, or `None` if it is unknown.
    async fn product(&self, product_id: &str) -> StoreResult<Option<CatalogProduct>>;

    /// Inserts or replaces a product's catalog entry.
    async fn upsert(&self, product: &CatalogProduct) -> StoreResult<()>;
}

/// In-memory catalog for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    products: DashMap<String, CatalogProduct>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes a product's price in place.
    pub fn set_price(&self, product_id: &str, unit_price_cents: i64) -> StoreResult<()> {
        let mut product = self
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found(Entity::Product, product_id))?;
        product.unit_price_cents = unit_price_cents;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn product(&self, product_id: &str) -> StoreResult<Option<CatalogProduct>> {
        Ok(self.products.get(product_id).map(|p| p.clone()))
    }

    async fn upsert(&self, product: &CatalogProduct) -> StoreResult<()> {
        self.products.insert(product.id.clone(), product.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lettuce() -> CatalogProduct {
        CatalogProduct {
            id: "lettuce".into(),
            seller_id: "farm-2".into(),
            name: "Butter Lettuce".into(),
            unit_price_cents: 299,
            image_ref: None,
            unit: Some("head".into()),
            category: Some("vegetables".into()),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_read() {
        let catalog = MemoryCatalog::new();
        assert_eq!(catalog.product("lettuce").await.unwrap(), None);

        catalog.upsert(&lettuce()).await.unwrap();
        catalog.set_price("lettuce", 349).unwrap();

        let product = catalog.product("lettuce").await.unwrap().unwrap();
        assert_eq!(product.unit_price_cents, 349);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_set_price_unknown_product() {
        let catalog = MemoryCatalog::new();
        assert!(matches!(
            catalog.set_price("kale", 100),
            Err(StoreError::NotFound { entity: Entity::Product, .. })
        ));
    }
}
