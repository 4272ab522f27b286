//! # Cart Service
//!
//! Per-owner cart mutations with advisory stock checks.
//!
//! ## Advisory vs Binding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  add_to_cart(tomato, 3)                                                 │
//! │      │                                                                  │
//! │      ├── catalog lookup ─────────► ProductNotFound                      │
//! │      ├── stock record unlisted ──► NotAvailable                         │
//! │      ├── peek: line qty > stock ─► InsufficientStock (nothing reserved) │
//! │      └── save cart                                                      │
//! │                                                                         │
//! │  Stock only moves in ReservationCoordinator::place_order.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation for an owner runs under that owner's keyed lock, so two
//! concurrent adds never lose each other's update.

use std::sync::Arc;

use tracing::debug;

use harvest_core::validation::{validate_identifier, validate_quantity};
use harvest_core::{Cart, CatalogProduct, CoreError, CoreResult};

use crate::cart_store::CartStore;
use crate::catalog::Catalog;
use crate::locks::KeyedLocks;
use crate::retry::RetryPolicy;
use crate::stock::StockLedger;

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn Catalog>,
    stock: StockLedger,
    locks: Arc<KeyedLocks>,
    retry: RetryPolicy,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn Catalog>,
        stock: StockLedger,
        retry: RetryPolicy,
    ) -> Self {
        CartService {
            store,
            catalog,
            stock,
            locks: Arc::new(KeyedLocks::new()),
            retry,
        }
    }

    /// Returns the owner's cart, creating an empty one on first access.
    pub async fn get(&self, owner_id: &str) -> CoreResult<Cart> {
        validate_identifier("owner_id", owner_id)?;
        let _guard = self.locks.lock(owner_id).await;

        match self.load(owner_id).await? {
            Some(cart) => Ok(cart),
            None => {
                let cart = Cart::new(owner_id);
                self.save(&cart).await?;
                debug!(owner_id, "Cart created");
                Ok(cart)
            }
        }
    }

    /// Adds `quantity` of a product, merging with an existing line.
    pub async fn add(&self, owner_id: &str, product_id: &str, quantity: i64) -> CoreResult<Cart> {
        validate_identifier("owner_id", owner_id)?;
        validate_identifier("product_id", product_id)?;
        validate_quantity(quantity)?;

        let _guard = self.locks.lock(owner_id).await;
        let product = self.catalog_product(product_id).await?;
        let record = self.stock.record(product_id).await?;
        if !record.is_listed {
            return Err(CoreError::NotAvailable {
                product_id: product_id.to_string(),
            });
        }

        let mut cart = self.load_or_new(owner_id).await?;
        let wanted = cart.resulting_quantity(product_id, quantity);
        if wanted > record.available_quantity {
            return Err(CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available: record.available_quantity,
                requested: wanted,
            });
        }

        cart.add_line(&product, quantity)?;
        self.save(&cart).await?;
        debug!(owner_id, product_id, quantity, line_quantity = wanted, "Added to cart");
        Ok(cart)
    }

    /// Sets a line's quantity. `quantity <= 0` removes the line; a product
    /// that is not in the cart leaves the cart unchanged. Raising a line for
    /// an unlisted product is `NotAvailable`, like [`add`](Self::add).
    pub async fn set_quantity(&self, owner_id: &str, product_id: &str, quantity: i64) -> CoreResult<Cart> {
        validate_identifier("owner_id", owner_id)?;
        validate_identifier("product_id", product_id)?;
        if quantity > 0 {
            validate_quantity(quantity)?;
        }

        let _guard = self.locks.lock(owner_id).await;
        let mut cart = self.load_or_new(owner_id).await?;

        if quantity > 0 && cart.line(product_id).is_some() {
            let record = self.stock.record(product_id).await?;
            if !record.is_listed {
                return Err(CoreError::NotAvailable {
                    product_id: product_id.to_string(),
                });
            }
            if quantity > record.available_quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    available: record.available_quantity,
                    requested: quantity,
                });
            }
        }

        if cart.set_quantity(product_id, quantity)? {
            self.save(&cart).await?;
            debug!(owner_id, product_id, quantity, "Cart line updated");
        }
        Ok(cart)
    }

    /// Removes a line. Removing a product that is not in the cart is a no-op.
    pub async fn remove(&self, owner_id: &str, product_id: &str) -> CoreResult<Cart> {
        validate_identifier("owner_id", owner_id)?;
        validate_identifier("product_id", product_id)?;

        let _guard = self.locks.lock(owner_id).await;
        let mut cart = self.load_or_new(owner_id).await?;
        if cart.remove_line(product_id) {
            self.save(&cart).await?;
            debug!(owner_id, product_id, "Cart line removed");
        }
        Ok(cart)
    }

    pub async fn clear(&self, owner_id: &str) -> CoreResult<()> {
        validate_identifier("owner_id", owner_id)?;
        let _guard = self.locks.lock(owner_id).await;
        self.clear_unlocked(owner_id).await
    }

    // =========================================================================
    // Coordinator access (caller holds the owner lock)
    // =========================================================================

    pub(crate) fn owner_locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub(crate) async fn load_unlocked(&self, owner_id: &str) -> CoreResult<Cart> {
        self.load_or_new(owner_id).await
    }

    pub(crate) async fn clear_unlocked(&self, owner_id: &str) -> CoreResult<()> {
        if let Some(mut cart) = self.load(owner_id).await? {
            if !cart.is_empty() {
                cart.clear();
                self.save(&cart).await?;
                debug!(owner_id, "Cart cleared");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Store helpers
    // =========================================================================

    async fn catalog_product(&self, product_id: &str) -> CoreResult<CatalogProduct> {
        self.retry
            .run("catalog_product", || self.catalog.product(product_id))
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))
    }

    async fn load(&self, owner_id: &str) -> CoreResult<Option<Cart>> {
        Ok(self.retry.run("load_cart", || self.store.load(owner_id)).await?)
    }

    async fn load_or_new(&self, owner_id: &str) -> CoreResult<Cart> {
        Ok(self
            .load(owner_id)
            .await?
            .unwrap_or_else(|| Cart::new(owner_id)))
    }

    async fn save(&self, cart: &Cart) -> CoreResult<()> {
        Ok(self.retry.run("save_cart", || self.store.save(cart)).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
