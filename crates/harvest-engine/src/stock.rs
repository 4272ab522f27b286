//! # Stock Ledger
//!
//! Owns every product's available-quantity counter.
//!
//! ## Per-Product Critical Section
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  task A: try_reserve(tomato, 3) ──┐                                     │
//! │                                   ├──► [tomato] read, check, decrement  │
//! │  task B: try_reserve(tomato, 3) ──┘     one caller at a time            │
//! │                                                                         │
//! │  task C: try_reserve(kale, 1) ─────► [kale]   independent of tomato     │
//! │                                                                         │
//! │  MemoryStockStore: DashMap shard write lock held for one synchronous    │
//! │                    read-check-write, never across an await              │
//! │  SQLite:           UPDATE ... WHERE available_quantity >= ?             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `available_quantity` never goes negative. Unlisted products keep their
//! counter but refuse reservations. Releases never exceed `max_sellable`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use harvest_core::validation::{validate_identifier, validate_quantity, validate_stock_quantity};
use harvest_core::{CoreError, CoreResult, ReserveOutcome, StockRecord};

use crate::error::{Entity, StoreError, StoreResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Storage Trait
// =============================================================================

/// Atomic primitives over stock records.
///
/// Each method is indivisible with respect to other calls on the same
/// product id. Unknown products are `StoreError::NotFound`.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Decrements by `quantity` if the product is listed and has enough stock.
    async fn try_decrement(&self, product_id: &str, quantity: i64) -> StoreResult<ReserveOutcome>;

    /// Increments by `quantity`, capped at `max_sellable`. Returns the new quantity.
    async fn increment(&self, product_id: &str, quantity: i64) -> StoreResult<i64>;

    async fn stock(&self, product_id: &str) -> StoreResult<Option<StockRecord>>;

    /// Starts tracking a product. `Conflict` if it is already tracked.
    async fn register(&self, record: &StockRecord) -> StoreResult<()>;

    async fn set_listed(&self, product_id: &str, listed: bool) -> StoreResult<StockRecord>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Sharded in-memory stock table.
#[derive(Debug, Default)]
pub struct MemoryStockStore {
    records: DashMap<String, StockRecord>,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockStore for MemoryStockStore {
    async fn try_decrement(&self, product_id: &str, quantity: i64) -> StoreResult<ReserveOutcome> {
        let mut record = self
            .records
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found(Entity::Product, product_id))?;

        Ok(match record.check_reserve(quantity) {
            Ok(()) => {
                record.available_quantity -= quantity;
                ReserveOutcome::Reserved {
                    remaining: record.available_quantity,
                }
            }
            Err(reason) => ReserveOutcome::Rejected(reason),
        })
    }

    async fn increment(&self, product_id: &str, quantity: i64) -> StoreResult<i64> {
        let mut record = self
            .records
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found(Entity::Product, product_id))?;

        record.available_quantity = record.capped_increment(quantity);
        Ok(record.available_quantity)
    }

    async fn stock(&self, product_id: &str) -> StoreResult<Option<StockRecord>> {
        Ok(self.records.get(product_id).map(|r| r.clone()))
    }

    async fn register(&self, record: &StockRecord) -> StoreResult<()> {
        match self.records.entry(record.product_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: Entity::Product,
                id: record.product_id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn set_listed(&self, product_id: &str, listed: bool) -> StoreResult<StockRecord> {
        let mut record = self
            .records
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found(Entity::Product, product_id))?;

        record.is_listed = listed;
        Ok(record.clone())
    }
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Validated, retrying front of a [`StockStore`].
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
    retry: RetryPolicy,
    compensation: RetryPolicy,
    default_max_sellable: Option<i64>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn StockStore>, retry: RetryPolicy, compensation: RetryPolicy) -> Self {
        StockLedger {
            store,
            retry,
            compensation,
            default_max_sellable: None,
        }
    }

    /// Ceiling used by `register` when the caller brings none.
    pub fn with_default_max_sellable(mut self, cap: Option<i64>) -> Self {
        self.default_max_sellable = cap;
        self
    }

    /// Atomically reserves `quantity` units.
    ///
    /// ## Outcomes
    /// - `Reserved { remaining }`: stock was decremented
    /// - `Rejected(NotAvailable)`: the product is unlisted
    /// - `Rejected(InsufficientStock { available })`: not enough units
    /// - `Err(ProductNotFound)` / `Err(StoreUnavailable)`
    pub async fn try_reserve(&self, product_id: &str, quantity: i64) -> CoreResult<ReserveOutcome> {
        validate_identifier("product_id", product_id)?;
        validate_quantity(quantity)?;

        let outcome = self
            .retry
            .run("try_reserve", || self.store.try_decrement(product_id, quantity))
            .await
            .map_err(|e| stock_error(product_id, e))?;

        debug!(product_id, quantity, ?outcome, "Reservation attempt");
        Ok(outcome)
    }

    /// Gives `quantity` units back. Returns the new available quantity.
    pub async fn release(&self, product_id: &str, quantity: i64) -> CoreResult<i64> {
        self.increment_with(self.retry, "release", product_id, quantity).await
    }

    /// Like [`release`](Self::release), with the compensation retry policy.
    ///
    /// Used to undo reservations of an order that did not commit.
    pub async fn compensate(&self, product_id: &str, quantity: i64) -> CoreResult<i64> {
        self.increment_with(self.compensation, "compensate", product_id, quantity)
            .await
    }

    /// Adds seller stock. Honors `max_sellable` like a release.
    pub async fn restock(&self, product_id: &str, quantity: i64) -> CoreResult<i64> {
        validate_stock_quantity(quantity)?;
        let available = self.increment_with(self.retry, "restock", product_id, quantity).await?;
        info!(product_id, quantity, available, "Product restocked");
        Ok(available)
    }

    /// Advisory read of the available quantity.
    pub async fn peek(&self, product_id: &str) -> CoreResult<i64> {
        Ok(self.record(product_id).await?.available_quantity)
    }

    /// Full stock record of a product.
    pub async fn record(&self, product_id: &str) -> CoreResult<StockRecord> {
        validate_identifier("product_id", product_id)?;
        self.retry
            .run("stock", || self.store.stock(product_id))
            .await
            .map_err(|e| stock_error(product_id, e))?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))
    }

    /// Starts tracking a listed product.
    pub async fn register(
        &self,
        product_id: &str,
        quantity: i64,
        max_sellable: Option<i64>,
    ) -> CoreResult<StockRecord> {
        validate_identifier("product_id", product_id)?;
        validate_stock_quantity(quantity)?;
        let max_sellable = max_sellable.or(self.default_max_sellable);
        if let Some(cap) = max_sellable {
            validate_stock_quantity(cap)?;
        }

        let record = StockRecord::new(product_id, quantity, max_sellable);
        self.retry
            .run("register", || self.store.register(&record))
            .await
            .map_err(|e| stock_error(product_id, e))?;

        info!(product_id, quantity, ?max_sellable, "Product listed");
        Ok(record)
    }

    /// Lists or unlists a product. Unlisting freezes stock, it deletes nothing.
    pub async fn set_listed(&self, product_id: &str, listed: bool) -> CoreResult<StockRecord> {
        validate_identifier("product_id", product_id)?;
        let record = self
            .retry
            .run("set_listed", || self.store.set_listed(product_id, listed))
            .await
            .map_err(|e| stock_error(product_id, e))?;

        info!(product_id, listed, "Product listing changed");
        Ok(record)
    }

    async fn increment_with(
        &self,
        policy: RetryPolicy,
        operation: &'static str,
        product_id: &str,
        quantity: i64,
    ) -> CoreResult<i64> {
        validate_identifier("product_id", product_id)?;
        validate_stock_quantity(quantity)?;

        let available = policy
            .run(operation, || self.store.increment(product_id, quantity))
            .await
            .map_err(|e| stock_error(product_id, e))?;

        debug!(product_id, quantity, available, operation, "Stock incremented");
        Ok(available)
    }
}

/// Maps a store failure to a caller-facing error naming the product.
pub(crate) fn stock_error(product_id: &str, err: StoreError) -> CoreError {
    match err {
        StoreError::Unavailable(message) | StoreError::Corrupt(message) => CoreError::StoreUnavailable {
            product_id: Some(product_id.to_string()),
            message,
        },
        other => other.into(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
