//! # Marketplace
//!
//! Transport-agnostic facade over the engine. One instance per process;
//! cloning is cheap and every clone shares the same locks and stores.
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Marketplace                                                            │
//! │   ├── CartService ─────────────┐                                        │
//! │   ├── ReservationCoordinator ──┼──► StockLedger ──► Arc<dyn StockStore> │
//! │   │        ├── Arc<dyn OrderLedger>                                     │
//! │   │        └── Arc<dyn OrderReleases> (stock back + line mark, atomic)  │
//! │   └── Arc<dyn Catalog> (shared by carts, orders and seller ops)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::info;

use harvest_core::validation::{validate_identifier, validate_price_cents, validate_product_name};
use harvest_core::{
    Caller, Cart, CatalogProduct, CoreError, CoreResult, Order, OrderDetailsUpdate, OrderStatus,
    StockRecord,
};

use crate::cart::CartService;
use crate::cart_store::{CartStore, MemoryCartStore};
use crate::catalog::{Catalog, MemoryCatalog};
use crate::config::EngineConfig;
use crate::coordinator::{OrderRequest, ReservationCoordinator};
use crate::ledger::{MemoryOrderLedger, MemoryOrderReleases, OrderLedger, OrderReleases};
use crate::stock::{MemoryStockStore, StockLedger, StockStore};

#[derive(Clone)]
pub struct Marketplace {
    catalog: Arc<dyn Catalog>,
    stock: StockLedger,
    carts: CartService,
    orders: ReservationCoordinator,
}

impl Marketplace {
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<dyn Catalog>,
        stock_store: Arc<dyn StockStore>,
        cart_store: Arc<dyn CartStore>,
        ledger: Arc<dyn OrderLedger>,
        releases: Arc<dyn OrderReleases>,
    ) -> Self {
        let retry = config.retry.policy();
        let compensation = config.compensation.policy();

        let stock = StockLedger::new(stock_store, retry, compensation)
            .with_default_max_sellable(config.stock.default_max_sellable);
        let carts = CartService::new(cart_store, catalog.clone(), stock.clone(), retry);
        let orders = ReservationCoordinator::new(
            catalog.clone(),
            stock.clone(),
            ledger,
            releases,
            carts.clone(),
            retry,
            compensation,
        );

        Marketplace {
            catalog,
            stock,
            carts,
            orders,
        }
    }

    /// Everything in memory. Used by tests and simulations.
    pub fn in_memory(config: &EngineConfig) -> Self {
        let stock: Arc<dyn StockStore> = Arc::new(MemoryStockStore::new());
        let ledger = Arc::new(MemoryOrderLedger::new());
        let releases = Arc::new(MemoryOrderReleases::new(stock.clone(), ledger.clone()));
        Self::new(
            config,
            Arc::new(MemoryCatalog::new()),
            stock,
            Arc::new(MemoryCartStore::new()),
            ledger,
            releases,
        )
    }

    // =========================================================================
    // Cart
    // =========================================================================

    pub async fn get_cart(&self, owner_id: &str) -> CoreResult<Cart> {
        self.carts.get(owner_id).await
    }

    pub async fn add_to_cart(&self, owner_id: &str, product_id: &str, quantity: i64) -> CoreResult<Cart> {
        self.carts.add(owner_id, product_id, quantity).await
    }

    pub async fn update_cart_line(&self, owner_id: &str, product_id: &str, quantity: i64) -> CoreResult<Cart> {
        self.carts.set_quantity(owner_id, product_id, quantity).await
    }

    pub async fn remove_cart_line(&self, owner_id: &str, product_id: &str) -> CoreResult<Cart> {
        self.carts.remove(owner_id, product_id).await
    }

    pub async fn clear_cart(&self, owner_id: &str) -> CoreResult<()> {
        self.carts.clear(owner_id).await
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub async fn place_order(&self, owner_id: &str, request: OrderRequest) -> CoreResult<Order> {
        self.orders.place_order(owner_id, request).await
    }

    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> CoreResult<Order> {
        self.orders.update_status(order_id, status).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> CoreResult<Order> {
        self.orders.cancel(order_id).await
    }

    pub async fn update_order_details(&self, order_id: &str, update: &OrderDetailsUpdate) -> CoreResult<Order> {
        self.orders.update_details(order_id, update).await
    }

    pub async fn get_order(&self, order_id: &str) -> CoreResult<Order> {
        self.orders.order(order_id).await
    }

    /// Admins see every order, everyone else only their own.
    pub async fn list_orders(&self, caller: &Caller) -> CoreResult<Vec<Order>> {
        if caller.is_admin() {
            self.orders.orders().await
        } else {
            self.orders.orders_by_owner(&caller.owner_id).await
        }
    }

    pub async fn list_orders_by_owner(&self, owner_id: &str) -> CoreResult<Vec<Order>> {
        self.orders.orders_by_owner(owner_id).await
    }

    pub async fn list_orders_by_status(&self, status: OrderStatus) -> CoreResult<Vec<Order>> {
        self.orders.orders_by_status(status).await
    }

    pub async fn list_orders_by_product(&self, product_id: &str) -> CoreResult<Vec<Order>> {
        self.orders.orders_by_product(product_id).await
    }

    // =========================================================================
    // Seller Operations
    // =========================================================================

    /// Publishes a product in the catalog and starts tracking its stock.
    pub async fn list_product(
        &self,
        product: CatalogProduct,
        quantity: i64,
        max_sellable: Option<i64>,
    ) -> CoreResult<StockRecord> {
        validate_catalog_product(&product)?;
        self.upsert_catalog(&product).await?;

        let record = self.stock.register(&product.id, quantity, max_sellable).await?;
        info!(
            product_id = %product.id,
            seller_id = %product.seller_id,
            price = %product.price(),
            "Product published"
        );
        Ok(record)
    }

    /// Replaces a listed product's catalog entry. Carts and committed orders
    /// keep the values they snapshotted.
    pub async fn update_product(&self, product: CatalogProduct) -> CoreResult<CatalogProduct> {
        validate_catalog_product(&product)?;
        self.stock.record(&product.id).await?;
        self.upsert_catalog(&product).await?;

        info!(product_id = %product.id, price = %product.price(), "Product updated");
        Ok(product)
    }

    pub async fn restock_product(&self, product_id: &str, quantity: i64) -> CoreResult<i64> {
        self.stock.restock(product_id, quantity).await
    }

    /// Soft removal: the product stays in the catalog and past orders.
    pub async fn unlist_product(&self, product_id: &str) -> CoreResult<StockRecord> {
        self.stock.set_listed(product_id, false).await
    }

    pub async fn relist_product(&self, product_id: &str) -> CoreResult<StockRecord> {
        self.stock.set_listed(product_id, true).await
    }

    /// Advisory read, the value may be stale by the time it is used.
    pub async fn available_quantity(&self, product_id: &str) -> CoreResult<i64> {
        self.stock.peek(product_id).await
    }

    /// Drops lock entries nobody holds. Returns how many were removed.
    pub fn prune_idle_locks(&self) -> usize {
        self.carts.owner_locks().prune_idle() + self.orders.order_locks().prune_idle()
    }

    async fn upsert_catalog(&self, product: &CatalogProduct) -> CoreResult<()> {
        self.catalog.upsert(product).await.map_err(|e| match CoreError::from(e) {
            CoreError::StoreUnavailable { message, .. } => {
                CoreError::store_unavailable(Some(&product.id), message)
            }
            other => other,
        })
    }
}

fn validate_catalog_product(product: &CatalogProduct) -> CoreResult<()> {
    validate_identifier("product_id", &product.id)?;
    validate_identifier("seller_id", &product.seller_id)?;
    validate_product_name(&product.name)?;
    validate_price_cents(product.unit_price_cents)?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{ErrorKind, LineRequest, Role};

    fn produce(id: &str, seller: &str, price: i64) -> CatalogProduct {
        CatalogProduct {
            id: id.to_string(),
            seller_id: seller.to_string(),
            name: format!("Organic {}", id),
            unit_price_cents: price,
            image_ref: Some(format!("img/{}.jpg", id)),
            unit: Some("lb".to_string()),
            category: Some("vegetables".to_string()),
        }
    }

    async fn market() -> Marketplace {
        let market = Marketplace::in_memory(&EngineConfig::default());
        market
            .list_product(produce("tomatoes", "green-acres", 499), 50, None)
            .await
            .unwrap();
        market
            .list_product(produce("kale", "sunny-farm", 299), 5, Some(5))
            .await
            .unwrap();
        market
    }

    #[tokio::test]
    async fn test_cart_to_order_to_cancel() {
        let market = market().await;

        market.add_to_cart("buyer-1", "tomatoes", 2).await.unwrap();
        market.add_to_cart("buyer-1", "kale", 1).await.unwrap();
        market.update_cart_line("buyer-1", "tomatoes", 4).await.unwrap();

        let order = market
            .place_order("buyer-1", OrderRequest::from_cart())
            .await
            .unwrap();
        assert_eq!(order.total_cents, 4 * 499 + 299);
        assert!(market.get_cart("buyer-1").await.unwrap().is_empty());
        assert_eq!(market.available_quantity("tomatoes").await.unwrap(), 46);

        let cancelled = market.cancel_order(&order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(market.available_quantity("tomatoes").await.unwrap(), 50);
        assert_eq!(market.available_quantity("kale").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_list_orders_by_role() {
        let market = market().await;
        for buyer in ["buyer-1", "buyer-2"] {
            market
                .place_order(buyer, OrderRequest::lines(vec![LineRequest::new("tomatoes", 1)]))
                .await
                .unwrap();
        }

        let buyer = Caller::new("buyer-1", Role::Buyer);
        let admin = Caller::new("ops", Role::Admin);
        assert_eq!(market.list_orders(&buyer).await.unwrap().len(), 1);
        assert_eq!(market.list_orders(&admin).await.unwrap().len(), 2);
        assert_eq!(market.list_orders_by_product("tomatoes").await.unwrap().len(), 2);
        assert_eq!(
            market
                .list_orders_by_status(OrderStatus::Pending)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_seller_operations() {
        let market = market().await;

        let err = market
            .list_product(produce("kale", "sunny-farm", 299), 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // Restock respects the ceiling.
        market
            .place_order("buyer-1", OrderRequest::lines(vec![LineRequest::new("kale", 2)]))
            .await
            .unwrap();
        assert_eq!(market.restock_product("kale", 10).await.unwrap(), 5);

        let record = market.unlist_product("kale").await.unwrap();
        assert!(!record.is_listed);
        let err = market.add_to_cart("buyer-1", "kale", 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAvailable);

        market.relist_product("kale").await.unwrap();
        market.add_to_cart("buyer-1", "kale", 1).await.unwrap();

        let err = market
            .list_product(produce("beets", "sunny-farm", -1), 3, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_update_product_keeps_snapshots() {
        let market = market().await;
        market.add_to_cart("buyer-1", "tomatoes", 1).await.unwrap();
        let order = market
            .place_order("buyer-2", OrderRequest::lines(vec![LineRequest::new("tomatoes", 1)]))
            .await
            .unwrap();

        market
            .update_product(produce("tomatoes", "green-acres", 599))
            .await
            .unwrap();

        let cart = market.get_cart("buyer-1").await.unwrap();
        assert_eq!(cart.line("tomatoes").unwrap().unit_price_cents, 499);
        assert_eq!(market.get_order(&order.id).await.unwrap().total_cents, 499);

        let err = market
            .update_product(produce("ghost", "green-acres", 100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_prune_idle_locks() {
        let market = market().await;
        market.add_to_cart("buyer-1", "tomatoes", 1).await.unwrap();
        market.add_to_cart("buyer-2", "tomatoes", 1).await.unwrap();

        assert_eq!(market.prune_idle_locks(), 2);
        assert_eq!(market.prune_idle_locks(), 0);
    }
}
