//! # Reservation Coordinator
//!
//! The single binding path from a wish list to a committed order.
//!
//! ## Placement State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Requested ──► Validating ──────────────────────────► Rejected          │
//! │                    │      empty / bad qty / unknown product             │
//! │                    ▼                                                    │
//! │                Reserving ──► PartiallyReservedRollback ──► Rejected     │
//! │                    │         (release reserved lines, newest first)     │
//! │                    ▼                                                    │
//! │                Committed  (order appended, cart cleared if FromCart)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines are reserved in ascending product id order so two orders that
//! share products always contend on them in the same sequence.
//!
//! ## Cancellation
//! ```text
//! lock(order_id)
//!   PENDING/CONFIRMED ──CAS──► CANCELLED ──► release pending lines ──► done
//!   CANCELLED with unreleased lines ───────► release pending lines ──► done
//!   CANCELLED, fully released ─────────────► no-op
//!   anything else ─────────────────────────► InvalidStatusTransition
//! ```
//!
//! Each line is released through [`OrderReleases`], which gives the stock back
//! and records the line on the order as one step. A cancellation cut short
//! by a store failure resumes where it stopped when cancelled again, and no
//! line is ever released twice.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use harvest_core::order::{normalize_lines, order_total};
use harvest_core::validation::{validate_identifier, validate_order_id};
use harvest_core::{
    CatalogProduct, CoreError, CoreResult, LineRequest, Order, OrderDetails, OrderDetailsUpdate,
    OrderLine, OrderStatus, ReserveOutcome,
};

use crate::cart::CartService;
use crate::catalog::Catalog;
use crate::ledger::{OrderLedger, OrderReleases};
use crate::locks::KeyedLocks;
use crate::retry::RetryPolicy;
use crate::stock::{stock_error, StockLedger};

// =============================================================================
// Requests
// =============================================================================

/// Where the lines of an order come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSource {
    /// An explicit line list. Duplicate product ids are merged.
    Lines(Vec<LineRequest>),
    /// The owner's current cart, cleared once the order commits.
    FromCart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub source: OrderSource,
    #[serde(default)]
    pub details: OrderDetails,
}

impl OrderRequest {
    pub fn lines(lines: Vec<LineRequest>) -> Self {
        OrderRequest {
            source: OrderSource::Lines(lines),
            details: OrderDetails::default(),
        }
    }

    pub fn from_cart() -> Self {
        OrderRequest {
            source: OrderSource::FromCart,
            details: OrderDetails::default(),
        }
    }

    pub fn with_details(mut self, details: OrderDetails) -> Self {
        self.details = details;
        self
    }
}

/// Phases of a placement, logged as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementPhase {
    Requested,
    Validating,
    Reserving,
    PartiallyReservedRollback,
    Committed,
    Rejected,
}

impl fmt::Display for PlacementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlacementPhase::Requested => "requested",
            PlacementPhase::Validating => "validating",
            PlacementPhase::Reserving => "reserving",
            PlacementPhase::PartiallyReservedRollback => "partially_reserved_rollback",
            PlacementPhase::Committed => "committed",
            PlacementPhase::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Clone)]
pub struct ReservationCoordinator {
    catalog: Arc<dyn Catalog>,
    stock: StockLedger,
    ledger: Arc<dyn OrderLedger>,
    releases: Arc<dyn OrderReleases>,
    carts: CartService,
    order_locks: Arc<KeyedLocks>,
    retry: RetryPolicy,
    compensation: RetryPolicy,
}

impl ReservationCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        stock: StockLedger,
        ledger: Arc<dyn OrderLedger>,
        releases: Arc<dyn OrderReleases>,
        carts: CartService,
        retry: RetryPolicy,
        compensation: RetryPolicy,
    ) -> Self {
        ReservationCoordinator {
            catalog,
            stock,
            ledger,
            releases,
            carts,
            order_locks: Arc::new(KeyedLocks::new()),
            retry,
            compensation,
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Places an order: all lines are reserved and the order committed, or
    /// nothing changes.
    pub async fn place_order(&self, owner_id: &str, request: OrderRequest) -> CoreResult<Order> {
        validate_identifier("owner_id", owner_id)?;
        request.details.validate()?;
        debug!(owner_id, phase = %PlacementPhase::Requested, "Order placement");

        match request.source {
            OrderSource::Lines(lines) => self.place_lines(owner_id, &lines, request.details).await,
            OrderSource::FromCart => {
                // Held until the cart is cleared so no cart edit slips in between.
                let _guard = self.carts.owner_locks().lock(owner_id).await;
                let cart = self.carts.load_unlocked(owner_id).await?;
                let order = self
                    .place_lines(owner_id, &cart.to_line_requests(), request.details)
                    .await?;

                if let Err(e) = self.carts.clear_unlocked(owner_id).await {
                    warn!(owner_id, order_id = %order.id, error = %e, "Order committed but cart was not cleared");
                }
                Ok(order)
            }
        }
    }

    async fn place_lines(
        &self,
        owner_id: &str,
        lines: &[LineRequest],
        details: OrderDetails,
    ) -> CoreResult<Order> {
        let priced = match self.validate(owner_id, lines).await {
            Ok(priced) => priced,
            Err(e) => {
                info!(owner_id, phase = %PlacementPhase::Rejected, error = %e, "Order rejected during validation");
                return Err(e);
            }
        };

        let reserved = self.reserve_all(owner_id, &priced).await?;

        let order = match Order::commit(Uuid::new_v4().to_string(), owner_id, priced, details, Utc::now()) {
            Ok(order) => order,
            Err(e) => {
                self.roll_back(owner_id, &reserved).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.retry.run("append_order", || self.ledger.append(&order)).await {
            error!(owner_id, order_id = %order.id, error = %e, "Order append failed, releasing reservations");
            self.roll_back(owner_id, &reserved).await;
            return Err(CoreError::StoreUnavailable {
                product_id: None,
                message: e.to_string(),
            });
        }

        info!(
            owner_id,
            order_id = %order.id,
            lines = order.lines.len(),
            total = %order.total(),
            phase = %PlacementPhase::Committed,
            "Order committed"
        );
        Ok(order)
    }

    /// Normalizes the lines and snapshots name and price from the catalog.
    async fn validate(&self, owner_id: &str, lines: &[LineRequest]) -> CoreResult<Vec<OrderLine>> {
        debug!(owner_id, lines = lines.len(), phase = %PlacementPhase::Validating, "Validating order");
        let requests = normalize_lines(lines)?;

        let mut priced = Vec::with_capacity(requests.len());
        for request in &requests {
            let product = self.catalog_product(&request.product_id).await?;
            priced.push(OrderLine::priced(
                &product.id,
                &product.name,
                product.price(),
                request.quantity,
            )?);
        }

        // Overflow is rejected here, before any stock moves.
        order_total(&priced)?;
        Ok(priced)
    }

    /// Reserves every line or none. Returns the reserved lines in
    /// reservation order.
    async fn reserve_all(&self, owner_id: &str, lines: &[OrderLine]) -> CoreResult<Vec<(String, i64)>> {
        let mut sorted: Vec<&OrderLine> = lines.iter().collect();
        sorted.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        debug!(owner_id, phase = %PlacementPhase::Reserving, "Reserving stock");

        let mut reserved: Vec<(String, i64)> = Vec::with_capacity(sorted.len());
        for line in sorted {
            let failure = match self.stock.try_reserve(&line.product_id, line.quantity).await {
                Ok(ReserveOutcome::Reserved { remaining }) => {
                    debug!(owner_id, product_id = %line.product_id, quantity = line.quantity, remaining, "Line reserved");
                    reserved.push((line.product_id.clone(), line.quantity));
                    continue;
                }
                Ok(ReserveOutcome::Rejected(reason)) => reason.into_error(&line.product_id, line.quantity),
                Err(e) => e,
            };

            self.roll_back(owner_id, &reserved).await;
            info!(
                owner_id,
                product_id = %line.product_id,
                phase = %PlacementPhase::Rejected,
                error = %failure,
                "Order rejected"
            );
            return Err(failure);
        }

        Ok(reserved)
    }

    /// Releases reserved lines, newest first, with the compensation policy.
    async fn roll_back(&self, owner_id: &str, reserved: &[(String, i64)]) {
        if reserved.is_empty() {
            return;
        }
        warn!(owner_id, lines = reserved.len(), phase = %PlacementPhase::PartiallyReservedRollback, "Rolling back reservations");

        for (product_id, quantity) in reserved.iter().rev() {
            if let Err(e) = self.stock.compensate(product_id, *quantity).await {
                error!(
                    owner_id,
                    product_id = %product_id,
                    quantity,
                    error = %e,
                    "Compensation failed, stock is under-counted"
                );
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Moves an order along the status table. `CANCELLED` runs [`cancel`](Self::cancel).
    pub async fn update_status(&self, order_id: &str, to: OrderStatus) -> CoreResult<Order> {
        if to == OrderStatus::Cancelled {
            return self.cancel(order_id).await;
        }
        validate_order_id(order_id)?;

        let _guard = self.order_locks.lock(order_id).await;
        let order = self.load(order_id).await?;
        order.check_transition(to)?;

        let updated = self.transition(&order, to).await?;
        info!(order_id, from = %order.status, to = %to, "Order status changed");
        Ok(updated)
    }

    /// Cancels an order and releases its stock exactly once per line.
    pub async fn cancel(&self, order_id: &str) -> CoreResult<Order> {
        validate_order_id(order_id)?;

        let _guard = self.order_locks.lock(order_id).await;
        let mut order = self.load(order_id).await?;

        if order.status != OrderStatus::Cancelled {
            order.check_transition(OrderStatus::Cancelled)?;
            order = self.transition(&order, OrderStatus::Cancelled).await?;
            info!(order_id, "Order cancelled");
        } else if order.is_fully_released() {
            debug!(order_id, "Order already cancelled, nothing to release");
            return Ok(order);
        } else {
            info!(order_id, pending = order.pending_releases().len(), "Resuming stock release");
        }

        let pending: Vec<(String, i64)> = order
            .pending_releases()
            .into_iter()
            .map(|line| (line.product_id.clone(), line.quantity))
            .collect();

        for (product_id, quantity) in pending {
            let released = self
                .compensation
                .run("release_line", || self.releases.release_line(order_id, &product_id, Utc::now()))
                .await
                .map_err(|e| {
                    error!(order_id, product_id = %product_id, quantity, error = %e, "Line release failed, cancel again to resume");
                    stock_error(&product_id, e)
                })?;
            match released.available {
                Some(available) => debug!(order_id, product_id = %product_id, quantity, available, "Line released"),
                None => debug!(order_id, product_id = %product_id, "Line was already released"),
            }
            order = released.order;
        }

        Ok(order)
    }

    /// Updates payment status, payment method, addresses or notes.
    pub async fn update_details(&self, order_id: &str, update: &OrderDetailsUpdate) -> CoreResult<Order> {
        validate_order_id(order_id)?;
        update.validate()?;

        let _guard = self.order_locks.lock(order_id).await;
        let order = self
            .retry
            .run("update_order_details", || self.ledger.update_details(order_id, update, Utc::now()))
            .await?;

        debug!(order_id, payment_status = %order.payment_status, "Order details updated");
        Ok(order)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn order(&self, order_id: &str) -> CoreResult<Order> {
        validate_order_id(order_id)?;
        self.load(order_id).await
    }

    pub async fn orders(&self) -> CoreResult<Vec<Order>> {
        Ok(self.retry.run("list_orders", || self.ledger.list_all()).await?)
    }

    pub async fn orders_by_owner(&self, owner_id: &str) -> CoreResult<Vec<Order>> {
        validate_identifier("owner_id", owner_id)?;
        Ok(self
            .retry
            .run("list_orders_by_owner", || self.ledger.list_by_owner(owner_id))
            .await?)
    }

    pub async fn orders_by_status(&self, status: OrderStatus) -> CoreResult<Vec<Order>> {
        Ok(self
            .retry
            .run("list_orders_by_status", || self.ledger.list_by_status(status))
            .await?)
    }

    pub async fn orders_by_product(&self, product_id: &str) -> CoreResult<Vec<Order>> {
        validate_identifier("product_id", product_id)?;
        Ok(self
            .retry
            .run("list_orders_by_product", || self.ledger.list_by_product(product_id))
            .await?)
    }

    pub(crate) fn order_locks(&self) -> &KeyedLocks {
        &self.order_locks
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn load(&self, order_id: &str) -> CoreResult<Order> {
        self.retry
            .run("get_order", || self.ledger.get(order_id))
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()))
    }

    async fn catalog_product(&self, product_id: &str) -> CoreResult<CatalogProduct> {
        self.retry
            .run("catalog_product", || self.catalog.product(product_id))
            .await
            .map_err(|e| match CoreError::from(e) {
                CoreError::StoreUnavailable { message, .. } => {
                    CoreError::store_unavailable(Some(product_id), message)
                }
                other => other,
            })?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))
    }

    /// Compare-and-set on the stored status.
    async fn transition(&self, order: &Order, to: OrderStatus) -> CoreResult<Order> {
        let moved = self
            .retry
            .run("transition_status", || {
                self.ledger.transition_status(&order.id, order.status, to, Utc::now())
            })
            .await?;

        match moved {
            Some(updated) => Ok(updated),
            None => {
                // Another writer on the same store got there first.
                let current = self.load(&order.id).await?;
                Err(CoreError::InvalidStatusTransition {
                    order_id: order.id.clone(),
                    from: current.status,
                    to,
                })
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart_store::MemoryCartStore;
    use crate::catalog::MemoryCatalog;
    use crate::error::{StoreError, StoreResult};
    use crate::ledger::{LineRelease, MemoryOrderLedger, MemoryOrderReleases};
    use crate::stock::{MemoryStockStore, StockStore};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use harvest_core::{ErrorKind, PaymentStatus, StockRecord};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Stock store that fails the next N calls of chosen operations.
    #[derive(Default)]
    struct FlakyStockStore {
        inner: MemoryStockStore,
        fail_decrements_for: std::sync::Mutex<Option<String>>,
        failing_increments: AtomicU32,
    }

    impl FlakyStockStore {
        fn fail_decrements_of(&self, product_id: &str) {
            *self.fail_decrements_for.lock().unwrap() = Some(product_id.to_string());
        }

        fn fail_next_increments(&self, n: u32) {
            self.failing_increments.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StockStore for FlakyStockStore {
        async fn try_decrement(&self, product_id: &str, quantity: i64) -> StoreResult<ReserveOutcome> {
            let failing = self.fail_decrements_for.lock().unwrap().as_deref() == Some(product_id);
            if failing {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.try_decrement(product_id, quantity).await
        }

        async fn increment(&self, product_id: &str, quantity: i64) -> StoreResult<i64> {
            let left = self.failing_increments.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_increments.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("database is locked".into()));
            }
            self.inner.increment(product_id, quantity).await
        }

        async fn stock(&self, product_id: &str) -> StoreResult<Option<StockRecord>> {
            self.inner.stock(product_id).await
        }

        async fn register(&self, record: &StockRecord) -> StoreResult<()> {
            self.inner.register(record).await
        }

        async fn set_listed(&self, product_id: &str, listed: bool) -> StoreResult<StockRecord> {
            self.inner.set_listed(product_id, listed).await
        }
    }

    /// Releases that apply in the store, then lose the next N acknowledgements.
    struct LostAckReleases {
        inner: MemoryOrderReleases,
        lost_acks: AtomicU32,
    }

    impl LostAckReleases {
        fn lose_next_acks(&self, n: u32) {
            self.lost_acks.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OrderReleases for LostAckReleases {
        async fn release_line(&self, order_id: &str, product_id: &str, at: DateTime<Utc>) -> StoreResult<LineRelease> {
            let released = self.inner.release_line(order_id, product_id, at).await?;
            let left = self.lost_acks.load(Ordering::SeqCst);
            if left > 0 {
                self.lost_acks.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset after commit".into()));
            }
            Ok(released)
        }
    }

    struct Fixture {
        coordinator: ReservationCoordinator,
        carts: CartService,
        catalog: Arc<MemoryCatalog>,
        stock: StockLedger,
        flaky: Arc<FlakyStockStore>,
        releases: Arc<LostAckReleases>,
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    async fn fixture(products: &[(&str, i64, i64)]) -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let flaky = Arc::new(FlakyStockStore::default());
        let stock = StockLedger::new(flaky.clone(), policy(2), policy(4));
        for (id, price, qty) in products {
            catalog
                .upsert(&CatalogProduct {
                    id: id.to_string(),
                    seller_id: "farm-1".to_string(),
                    name: format!("Fresh {}", id),
                    unit_price_cents: *price,
                    image_ref: None,
                    unit: None,
                    category: None,
                })
                .await
                .unwrap();
            stock.register(id, *qty, None).await.unwrap();
        }
        let carts = CartService::new(
            Arc::new(MemoryCartStore::new()),
            catalog.clone(),
            stock.clone(),
            policy(2),
        );
        let ledger = Arc::new(MemoryOrderLedger::new());
        let releases = Arc::new(LostAckReleases {
            inner: MemoryOrderReleases::new(flaky.clone(), ledger.clone()),
            lost_acks: AtomicU32::new(0),
        });
        let coordinator = ReservationCoordinator::new(
            catalog.clone(),
            stock.clone(),
            ledger,
            releases.clone(),
            carts.clone(),
            policy(2),
            policy(4),
        );
        Fixture {
            coordinator,
            carts,
            catalog,
            stock,
            flaky,
            releases,
        }
    }

    fn lines(items: &[(&str, i64)]) -> OrderRequest {
        OrderRequest::lines(items.iter().map(|(id, q)| LineRequest::new(*id, *q)).collect())
    }

    #[tokio::test]
    async fn test_place_order_commits_snapshot_totals() {
        let f = fixture(&[("tomato", 499, 10), ("kale", 299, 5)]).await;

        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 3), ("kale", 2)]))
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.total_cents, 3 * 499 + 2 * 299);
        assert_eq!(order.lines[0].product_name, "Fresh tomato");
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 7);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 3);
        assert_eq!(f.coordinator.order(&order.id).await.unwrap(), order);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_buyers_race_for_last_units() {
        let f = fixture(&[("tomato", 499, 5)]).await;

        let a = {
            let c = f.coordinator.clone();
            tokio::spawn(async move { c.place_order("buyer-a", lines(&[("tomato", 3)])).await })
        };
        let b = {
            let c = f.coordinator.clone();
            tokio::spawn(async move { c.place_order("buyer-b", lines(&[("tomato", 3)])).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        let committed: Vec<&Order> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].total_cents, 3 * 499);

        let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(
            rejected,
            &CoreError::InsufficientStock {
                product_id: "tomato".into(),
                available: 2,
                requested: 3,
            }
        );
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rejection_leaves_all_stock_untouched() {
        let f = fixture(&[("apple", 100, 10), ("kale", 299, 10), ("plum", 150, 1)]).await;

        // apple and kale reserve first, plum fails, both are rolled back.
        let err = f
            .coordinator
            .place_order("buyer-1", lines(&[("plum", 2), ("kale", 4), ("apple", 5)]))
            .await
            .unwrap_err();

        assert_eq!(err.product_id(), Some("plum"));
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(f.stock.peek("apple").await.unwrap(), 10);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 10);
        assert_eq!(f.stock.peek("plum").await.unwrap(), 1);
        assert!(f.coordinator.orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_reservation() {
        let f = fixture(&[("kale", 299, 10)]).await;

        let err = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", 2), ("durian", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::ProductNotFound("durian".into()));

        let err = f.coordinator.place_order("buyer-1", lines(&[])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", -1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(f.stock.peek("kale").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_merged() {
        let f = fixture(&[("kale", 299, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", 2), ("kale", 3)]))
            .await
            .unwrap();

        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 5);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unlisted_product_is_not_available() {
        let f = fixture(&[("kale", 299, 10)]).await;
        f.stock.set_listed("kale", false).await.unwrap();

        let err = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::NotAvailable { product_id: "kale".into() });
    }

    #[tokio::test]
    async fn test_price_change_does_not_touch_committed_order() {
        let f = fixture(&[("berries", 699, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("berries", 2)]))
            .await
            .unwrap();

        f.catalog.set_price("berries", 999).unwrap();

        let stored = f.coordinator.order(&order.id).await.unwrap();
        assert_eq!(stored.total_cents, 1398);
        assert_eq!(stored.lines[0].unit_price_cents, 699);
    }

    #[tokio::test]
    async fn test_order_from_cart_uses_current_price_and_clears_cart() {
        let f = fixture(&[("tomato", 499, 10)]).await;
        f.carts.add("buyer-1", "tomato", 2).await.unwrap();
        f.catalog.set_price("tomato", 549).unwrap();

        let order = f
            .coordinator
            .place_order("buyer-1", OrderRequest::from_cart())
            .await
            .unwrap();

        assert_eq!(order.total_cents, 2 * 549);
        assert!(f.carts.get("buyer-1").await.unwrap().is_empty());
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_failed_order_from_cart_keeps_cart() {
        let f = fixture(&[("tomato", 499, 3)]).await;
        f.carts.add("buyer-1", "tomato", 3).await.unwrap();
        f.coordinator
            .place_order("buyer-2", lines(&[("tomato", 2)]))
            .await
            .unwrap();

        let err = f
            .coordinator
            .place_order("buyer-1", OrderRequest::from_cart())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(f.carts.get("buyer-1").await.unwrap().line_count(), 1);

        let err = f
            .coordinator
            .place_order("buyer-3", OrderRequest::from_cart())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_status_table_is_enforced() {
        let f = fixture(&[("kale", 299, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", 1)]))
            .await
            .unwrap();

        let err = f
            .coordinator
            .update_status(&order.id, OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStatusTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
                ..
            }
        ));

        for next in [OrderStatus::Confirmed, OrderStatus::Shipped, OrderStatus::Delivered] {
            let updated = f.coordinator.update_status(&order.id, next).await.unwrap();
            assert_eq!(updated.status, next);
        }

        let err = f.coordinator.cancel(&order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStatusTransition);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_once() {
        let f = fixture(&[("tomato", 499, 10), ("kale", 299, 5)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 4), ("kale", 5)]))
            .await
            .unwrap();
        f.coordinator
            .update_status(&order.id, OrderStatus::Confirmed)
            .await
            .unwrap();

        let cancelled = f
            .coordinator
            .update_status(&order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.is_fully_released());
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 5);

        let again = f.coordinator.cancel(&order.id).await.unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cancels_release_once() {
        let f = fixture(&[("tomato", 499, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 4)]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = f.coordinator.clone();
            let id = order.id.clone();
            handles.push(tokio::spawn(async move { c.cancel(&id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_interrupted_cancel_resumes() {
        let f = fixture(&[("apple", 100, 10), ("kale", 299, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("apple", 2), ("kale", 3)]))
            .await
            .unwrap();

        let coordinator = f.coordinator.clone();
        let id = order.id.clone();

        // kale goes first and exhausts all four compensation attempts.
        f.flaky.fail_next_increments(4);
        let err = coordinator.cancel(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.product_id(), Some("kale"));

        let stored = coordinator.order(&id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert!(!stored.is_fully_released());
        assert_eq!(f.stock.peek("kale").await.unwrap(), 7);

        let done = coordinator.cancel(&id).await.unwrap();
        assert!(done.is_fully_released());
        assert_eq!(f.stock.peek("apple").await.unwrap(), 10);
        assert_eq!(f.stock.peek("kale").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_cancel_retries_with_compensation_policy() {
        let f = fixture(&[("tomato", 499, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 4)]))
            .await
            .unwrap();

        // More failures than the normal policy allows, fewer than compensation.
        f.flaky.fail_next_increments(3);
        let cancelled = f.coordinator.cancel(&order.id).await.unwrap();
        assert!(cancelled.is_fully_released());
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_lost_release_ack_never_double_releases() {
        let f = fixture(&[("tomato", 499, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 4)]))
            .await
            .unwrap();

        // The retry sees the line already released and leaves stock alone.
        f.releases.lose_next_acks(1);
        let cancelled = f.coordinator.cancel(&order.id).await.unwrap();
        assert!(cancelled.is_fully_released());
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_failed_cancel_then_cancel_again_restores_stock_once() {
        let f = fixture(&[("tomato", 499, 10)]).await;
        let order = f
            .coordinator
            .place_order("buyer-1", lines(&[("tomato", 4)]))
            .await
            .unwrap();

        // Every attempt applies in the store but no acknowledgement arrives.
        f.releases.lose_next_acks(4);
        let err = f.coordinator.cancel(&order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.product_id(), Some("tomato"));
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);

        let again = f.coordinator.cancel(&order.id).await.unwrap();
        assert_eq!(again.status, OrderStatus::Cancelled);
        assert!(again.is_fully_released());
        assert_eq!(f.stock.peek("tomato").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_transient_failure_is_compensated() {
        let f = fixture(&[("apple", 100, 10), ("kale", 299, 10)]).await;
        f.flaky.fail_decrements_of("kale");
        // Compensation survives a couple of hiccups of its own.
        f.flaky.fail_next_increments(2);

        let err = f
            .coordinator
            .place_order("buyer-1", lines(&[("apple", 2), ("kale", 3)]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.product_id(), Some("kale"));
        assert_eq!(f.stock.peek("apple").await.unwrap(), 10);
        assert!(f.coordinator.orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_details_keeps_lines() {
        let f = fixture(&[("kale", 299, 10)]).await;
        let order = f
            .coordinator
            .place_order(
                "buyer-1",
                lines(&[("kale", 2)]).with_details(OrderDetails {
                    shipping_address: Some("4 Mill Road".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        let updated = f
            .coordinator
            .update_details(
                &order.id,
                &OrderDetailsUpdate {
                    payment_status: Some(PaymentStatus::Paid),
                    payment_method: Some("card".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.payment_status, PaymentStatus::Paid);
        assert_eq!(updated.payment_method.as_deref(), Some("card"));
        assert_eq!(updated.shipping_address.as_deref(), Some("4 Mill Road"));
        assert_eq!(updated.lines, order.lines);
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let f = fixture(&[]).await;
        let id = Uuid::new_v4().to_string();
        assert_eq!(
            f.coordinator.order(&id).await.unwrap_err(),
            CoreError::OrderNotFound(id.clone())
        );
        assert_eq!(f.coordinator.cancel(&id).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            f.coordinator.order("not-a-uuid").await.unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_listing_queries() {
        let f = fixture(&[("kale", 299, 10), ("tomato", 499, 10)]).await;
        let first = f
            .coordinator
            .place_order("buyer-1", lines(&[("kale", 1)]))
            .await
            .unwrap();
        f.coordinator
            .place_order("buyer-2", lines(&[("tomato", 1), ("kale", 1)]))
            .await
            .unwrap();
        f.coordinator
            .update_status(&first.id, OrderStatus::Confirmed)
            .await
            .unwrap();

        assert_eq!(f.coordinator.orders().await.unwrap().len(), 2);
        assert_eq!(f.coordinator.orders_by_owner("buyer-1").await.unwrap().len(), 1);
        assert_eq!(f.coordinator.orders_by_product("kale").await.unwrap().len(), 2);
        assert_eq!(f.coordinator.orders_by_product("tomato").await.unwrap().len(), 1);
        assert_eq!(
            f.coordinator
                .orders_by_status(OrderStatus::Confirmed)
                .await
                .unwrap()[0]
                .id,
            first.id
        );
    }
}
