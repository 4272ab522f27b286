//! # harvest-db: Database Layer for Harvest
//!
//! SQLite storage for the reservation engine, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Harvest Data Flow                               │
//! │                                                                         │
//! │  Marketplace::place_order                                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    harvest-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │  │   │
//! │  │   │               │    │ ProductRepo    │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ OrderRepo      │   │ 001_initial  │  │   │
//! │  │   │ WAL, FKs      │    │ CartRepo       │   │              │  │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (harvest.db)                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and their mapping to `StoreError`
//! - [`repository`] - Product/stock, order and cart repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harvest_db::{Database, DbConfig};
//! use harvest_engine::EngineConfig;
//!
//! let db = Database::new(DbConfig::new("harvest.db")).await?;
//! let market = db.marketplace(&EngineConfig::load_or_default(None));
//! let cart = market.add_to_cart("buyer-1", "tomatoes", 2).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cart::CartRepository;
pub use repository::order::OrderRepository;
pub use repository::product::ProductRepository;
