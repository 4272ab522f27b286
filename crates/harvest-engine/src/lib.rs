//! # harvest-engine: Reservation Engine for Harvest
//!
//! Keeps stock counters, buyer carts and committed orders consistent while
//! many tasks hit them at once.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   Marketplace (facade, cheap to clone)           │  │
//! │  └───────────┬──────────────────────┬───────────────────────────────┘  │
//! │              ▼                      ▼                                   │
//! │  ┌────────────────────┐  ┌──────────────────────────┐                  │
//! │  │    CartService     │  │  ReservationCoordinator  │                  │
//! │  │                    │  │                          │                  │
//! │  │ owner-keyed locks  │  │ validate → reserve →     │                  │
//! │  │ advisory peek only │  │ commit, or roll back     │                  │
//! │  └─────────┬──────────┘  │ order-keyed locks        │                  │
//! │            │             └──────┬──────────┬────────┘                  │
//! │            ▼                    ▼          ▼                            │
//! │  ┌────────────────────────────────────┐  ┌─────────────────────────┐   │
//! │  │            StockLedger             │  │      OrderLedger        │   │
//! │  │ try_reserve / release / peek       │  │ append-only, CAS status │   │
//! │  │ bounded retry, compensation policy │  │                         │   │
//! │  └─────────────────┬──────────────────┘  └─────────────────────────┘   │
//! │                    ▼                                                    │
//! │  STORAGE TRAITS: StockStore, CartStore, OrderLedger, OrderReleases,    │
//! │                  Catalog                                                │
//! │  • Memory* implementations here                                        │
//! │  • SQLite implementations in harvest-db                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`marketplace`] - The facade callers use
//! - [`coordinator`] - Order placement saga, status changes, cancellation
//! - [`cart`] - Per-owner cart mutations
//! - [`stock`] - Stock ledger and the `StockStore` trait
//! - [`ledger`] - `OrderLedger` and `OrderReleases` traits, in-memory implementations
//! - [`catalog`], [`cart_store`] - Remaining collaborator traits
//! - [`config`] - TOML configuration with environment overrides
//! - [`retry`] - Exponential backoff for transient store failures
//! - [`locks`] - Keyed async mutexes
//! - [`error`] - Store and setup errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harvest_engine::{EngineConfig, Marketplace, OrderRequest};
//!
//! let config = EngineConfig::load_or_default(None);
//! let market = Marketplace::in_memory(&config);
//!
//! market.add_to_cart("buyer-1", "tomatoes", 2).await?;
//! let order = market.place_order("buyer-1", OrderRequest::from_cart()).await?;
//! println!("Order {} total {}", order.id, order.total());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod cart_store;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod marketplace;
pub mod retry;
pub mod stock;

// =============================================================================
// Re-exports
// =============================================================================

pub use cart::CartService;
pub use cart_store::{CartStore, MemoryCartStore};
pub use catalog::{Catalog, MemoryCatalog};
pub use config::{EngineConfig, RetrySettings, StockSettings};
pub use coordinator::{OrderRequest, OrderSource, PlacementPhase, ReservationCoordinator};
pub use error::{EngineError, EngineResult, Entity, StoreError, StoreResult};
pub use ledger::{LineRelease, MemoryOrderLedger, MemoryOrderReleases, OrderLedger, OrderReleases};
pub use locks::KeyedLocks;
pub use marketplace::Marketplace;
pub use retry::RetryPolicy;
pub use stock::{MemoryStockStore, StockLedger, StockStore};
