//! # Domain Types
//!
//! Core domain types used throughout Harvest.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockRecord    │   │ CatalogProduct  │   │     Caller      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  product_id     │   │  id, seller_id  │   │  owner_id       │       │
//! │  │  available_qty  │   │  name           │   │  role           │       │
//! │  │  is_listed      │   │  unit_price     │   └─────────────────┘       │
//! │  │  max_sellable   │   │  image_ref      │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  OrderStatus    │   │ PaymentStatus   │   │ ReserveOutcome  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Pending        │   │  Pending        │   │  Reserved       │       │
//! │  │  Confirmed      │   │  Paid           │   │  Rejected       │       │
//! │  │  Shipped        │   │  Failed         │   └─────────────────┘       │
//! │  │  Delivered      │   │  Refunded       │                             │
//! │  │  Cancelled      │   └─────────────────┘                             │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order Status Table
//! ```text
//!   PENDING ──► CONFIRMED ──► SHIPPED ──► DELIVERED
//!      │            │
//!      └─────┬──────┘
//!            ▼
//!        CANCELLED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, ValidationError};
use crate::money::Money;

// =============================================================================
// Identity
// =============================================================================

/// Role issued by the identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl FromStr for Role {
    type Err = ValidationError;

    /// Accepts the marketplace aliases `customer` and `farmer` as well.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" | "customer" => Ok(Role::Buyer),
            "seller" | "farmer" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            _ => Err(ValidationError::NotAllowed {
                field: "role".to_string(),
                allowed: vec!["buyer".into(), "seller".into(), "admin".into()],
            }),
        }
    }
}

/// An authenticated caller, trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub owner_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(owner_id: impl Into<String>, role: Role) -> Self {
        Caller {
            owner_id: owner_id.into(),
            role,
        }
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// =============================================================================
// Stock
// =============================================================================

/// The authoritative stock counter of one product.
///
/// `available_quantity` never goes negative. `is_listed = false` freezes the
/// counter against further reservations without deleting the product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: String,
    pub available_quantity: i64,
    pub is_listed: bool,
    /// Ceiling applied by release and restock when set.
    pub max_sellable: Option<i64>,
}

impl StockRecord {
    pub fn new(product_id: impl Into<String>, available_quantity: i64, max_sellable: Option<i64>) -> Self {
        StockRecord {
            product_id: product_id.into(),
            available_quantity,
            is_listed: true,
            max_sellable,
        }
    }

    /// Classifies a reservation attempt against this record without mutating it.
    pub fn check_reserve(&self, quantity: i64) -> Result<(), RejectionReason> {
        if !self.is_listed {
            return Err(RejectionReason::NotAvailable);
        }
        if self.available_quantity < quantity {
            return Err(RejectionReason::InsufficientStock {
                available: self.available_quantity,
            });
        }
        Ok(())
    }

    /// Quantity after adding `quantity` back, honoring `max_sellable`.
    ///
    /// A counter already above its ceiling is never pushed down by a release.
    pub fn capped_increment(&self, quantity: i64) -> i64 {
        let raised = self.available_quantity.saturating_add(quantity);
        match self.max_sellable {
            Some(cap) => self.available_quantity.max(raised.min(cap)),
            None => raised,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// The catalog collaborator's view of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub seller_id: String,
    pub name: String,
    /// Current price in cents. Orders snapshot it at placement time.
    pub unit_price_cents: i64,
    pub image_ref: Option<String>,
    /// Selling unit, e.g. "lb" or "bunch".
    pub unit: Option<String>,
    pub category: Option<String>,
}

impl CatalogProduct {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of a committed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true if `self → to` is in the transition table.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Confirmed, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    #[inline]
    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: OrderStatus::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Payment state recorded on an order. Capture itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reservation Outcome
// =============================================================================

/// Why a reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    InsufficientStock { available: i64 },
    NotAvailable,
}

impl RejectionReason {
    /// Turns the reason into the error a caller sees.
    pub fn into_error(self, product_id: &str, requested: i64) -> CoreError {
        match self {
            RejectionReason::InsufficientStock { available } => CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available,
                requested,
            },
            RejectionReason::NotAvailable => CoreError::NotAvailable {
                product_id: product_id.to_string(),
            },
        }
    }
}

/// Result of a single `try_reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveOutcome {
    /// Stock was decremented; `remaining` is the new available quantity.
    Reserved { remaining: i64 },
    Rejected(RejectionReason),
}

impl ReserveOutcome {
    #[inline]
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveOutcome::Reserved { .. })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
