//! # harvest-core: Pure Domain Logic for Harvest
//!
//! This crate holds the domain model of the reservation engine as plain data
//! and pure functions. Nothing here locks, awaits or touches storage.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harvest Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Transport (HTTP, CLI, ...) - not in this repo      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 harvest-engine (Marketplace)                    │   │
//! │  │    StockLedger, CartService, ReservationCoordinator            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ harvest-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   cart    │  │   order   │  │   │
//! │  │   │  Status   │  │   Money   │  │   Cart    │  │   Order   │  │   │
//! │  │   │  Stock    │  │  (cents)  │  │ CartLine  │  │ OrderLine │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO LOCKS • NO RUNTIME • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Roles, stock records, catalog snapshots, order status enums
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`cart`] - Advisory shopping cart
//! - [`order`] - Committed orders and their pure total computation
//! - [`error`] - Domain error taxonomy
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use harvest_core::order::OrderLine;
//! use harvest_core::Money;
//!
//! let line = OrderLine::priced("tomato-01", "Organic Tomatoes", Money::from_cents(499), 3).unwrap();
//! assert_eq!(line.line_total().cents(), 1497);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod money;
pub mod order;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartLine};
pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use money::Money;
pub use order::{LineRequest, Order, OrderDetails, OrderDetailsUpdate, OrderLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines allowed in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single product in a cart line or order line.
///
/// ## Business Reason
/// Stops typos such as 1000 instead of 10 before they reach the stock ledger.
pub const MAX_LINE_QUANTITY: i64 = 999;

/// Maximum length of free-text order metadata (addresses, notes).
pub const MAX_TEXT_FIELD_LEN: usize = 500;
