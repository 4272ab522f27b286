//! # Repository Module
//!
//! SQLite implementations of the engine's storage traits.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Marketplace / ReservationCoordinator                                  │
//! │       │                                                                 │
//! │       │  Arc<dyn StockStore>, Arc<dyn OrderLedger>, ...                │
//! │       ▼                                                                 │
//! │  ProductRepository ── impl Catalog + StockStore                        │
//! │  OrderRepository   ── impl OrderLedger                                 │
//! │  CartRepository    ── impl CartStore                                   │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each repository also exposes its SQL operations directly, returning
//! [`DbResult`](crate::error::DbResult), for tooling such as the seed binary.

pub mod cart;
pub mod order;
pub mod product;
