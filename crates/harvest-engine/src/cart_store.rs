//! # Cart Store
//!
//! Persistence collaborator for carts. Whole-cart load and save; the
//! [`CartService`](crate::cart::CartService) serializes writers per owner.

use async_trait::async_trait;
use dashmap::DashMap;

use harvest_core::Cart;

use crate::error::StoreResult;

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn load(&self, owner_id: &str) -> StoreResult<Option<Cart>>;

    /// Replaces the stored cart of `cart.owner_id`.
    async fn save(&self, cart: &Cart) -> StoreResult<()>;

    async fn delete(&self, owner_id: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: DashMap<String, Cart>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn load(&self, owner_id: &str) -> StoreResult<Option<Cart>> {
        Ok(self.carts.get(owner_id).map(|c| c.clone()))
    }

    async fn save(&self, cart: &Cart) -> StoreResult<()> {
        self.carts.insert(cart.owner_id.clone(), cart.clone());
        Ok(())
    }

    async fn delete(&self, owner_id: &str) -> StoreResult<()> {
        self.carts.remove(owner_id);
        Ok(())
    }
}
