//! # Order Ledger
//!
//! Append-only record of committed orders.
//!
//! ## What Can Change After Append
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Order                                                                  │
//! │  ├── lines, total, owner, created_at     frozen forever                │
//! │  ├── status                              transition_status (CAS)       │
//! │  ├── payment / addresses / notes         update_details                │
//! │  ├── released_product_ids                OrderReleases::release_line   │
//! │  └── updated_at                          every mutation                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Releasing A Line
//! Giving a line's stock back and marking the line released happen as one
//! step, so a line can never be released twice:
//! ```text
//! line already released ──► no stock change
//! otherwise             ──► stock += quantity (capped) AND mark line, or neither
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use harvest_core::{Order, OrderDetailsUpdate, OrderStatus};

use crate::error::{Entity, StoreError, StoreResult};
use crate::stock::StockStore;

#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Stores a new order. `Conflict` if the id is taken.
    async fn append(&self, order: &Order) -> StoreResult<()>;

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>>;

    /// All orders, oldest first.
    async fn list_all(&self) -> StoreResult<Vec<Order>>;

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Order>>;

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>>;

    /// Orders with at least one line for `product_id`.
    async fn list_by_product(&self, product_id: &str) -> StoreResult<Vec<Order>>;

    /// Moves the order from `from` to `to` if it is still in `from`.
    ///
    /// Returns `None` when the stored status is no longer `from`.
    async fn transition_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    async fn update_details(
        &self,
        order_id: &str,
        update: &OrderDetailsUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<Order>;
}

/// Outcome of [`OrderReleases::release_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRelease {
    pub order: Order,
    /// Available quantity after the increment. `None` when the line had
    /// already been released and stock was left alone.
    pub available: Option<i64>,
}

/// Returns one order line's stock and records it on the order, both or
/// neither.
///
/// Calling it again for a released line changes nothing, so a retry after a
/// lost acknowledgement is safe.
#[async_trait]
pub trait OrderReleases: Send + Sync {
    async fn release_line(&self, order_id: &str, product_id: &str, at: DateTime<Utc>) -> StoreResult<LineRelease>;
}

// =============================================================================
// In-Memory Ledger
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryOrderLedger {
    orders: DashMap<String, Order>,
}

impl MemoryOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(&self, filter: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        orders
    }

    fn modify(&self, order_id: &str, f: impl FnOnce(&mut Order)) -> StoreResult<Order> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::not_found(Entity::Order, order_id))?;
        f(order.value_mut());
        Ok(order.clone())
    }

    fn mark_released(&self, order_id: &str, product_id: &str, at: DateTime<Utc>) -> StoreResult<Order> {
        self.modify(order_id, |order| {
            order.mark_released(product_id);
            order.updated_at = at;
        })
    }
}

#[async_trait]
impl OrderLedger for MemoryOrderLedger {
    async fn append(&self, order: &Order) -> StoreResult<()> {
        match self.orders.entry(order.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: Entity::Order,
                id: order.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, order_id: &str) -> StoreResult<Option<Order>> {
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }

    async fn list_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.collect(|_| true))
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<Order>> {
        Ok(self.collect(|o| o.owner_id == owner_id))
    }

    async fn list_by_status(&self, status: OrderStatus) -> StoreResult<Vec<Order>> {
        Ok(self.collect(|o| o.status == status))
    }

    async fn list_by_product(&self, product_id: &str) -> StoreResult<Vec<Order>> {
        Ok(self.collect(|o| o.contains_product(product_id)))
    }

    async fn transition_status(
        &self,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::not_found(Entity::Order, order_id))?;

        if order.status != from {
            return Ok(None);
        }
        order.status = to;
        order.updated_at = at;
        Ok(Some(order.clone()))
    }

    async fn update_details(
        &self,
        order_id: &str,
        update: &OrderDetailsUpdate,
        at: DateTime<Utc>,
    ) -> StoreResult<Order> {
        self.modify(order_id, |order| order.apply_details(update, at))
    }
}

// =============================================================================
// In-Memory Releases
// =============================================================================

/// Releases over a [`MemoryOrderLedger`] and any [`StockStore`].
///
/// The increment is the only step that can fail. Marking the line in the
/// in-memory ledger cannot, so a failed call leaves both sides untouched.
/// Callers serialize releases of one order (the coordinator holds the order
/// lock), which keeps the released check and the mark together.
#[derive(Clone)]
pub struct MemoryOrderReleases {
    stock: Arc<dyn StockStore>,
    orders: Arc<MemoryOrderLedger>,
}

impl MemoryOrderReleases {
    pub fn new(stock: Arc<dyn StockStore>, orders: Arc<MemoryOrderLedger>) -> Self {
        MemoryOrderReleases { stock, orders }
    }
}

#[async_trait]
impl OrderReleases for MemoryOrderReleases {
    async fn release_line(&self, order_id: &str, product_id: &str, at: DateTime<Utc>) -> StoreResult<LineRelease> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| StoreError::not_found(Entity::Order, order_id))?;

        if order.is_stock_released(product_id) {
            return Ok(LineRelease { order, available: None });
        }
        let quantity = order
            .lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map(|line| line.quantity)
            .ok_or_else(|| StoreError::not_found(Entity::Product, product_id))?;

        let available = self.stock.increment(product_id, quantity).await?;
        let order = self.orders.mark_released(order_id, product_id, at)?;
        Ok(LineRelease {
            order,
            available: Some(available),
        })
    }
}
