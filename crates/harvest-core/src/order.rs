//! # Orders
//!
//! Committed orders, their line items and the pure total computation.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Vec<LineRequest> ──► normalize_lines() ──► merged, validated requests  │
//! │                                                  │                      │
//! │                          catalog snapshot ──► OrderLine::priced()       │
//! │                                                  │                      │
//! │                                        Order::commit() computes total   │
//! │                                                  │                      │
//! │                                                  ▼                      │
//! │           PENDING ──► CONFIRMED ──► SHIPPED ──► DELIVERED               │
//! │              └───────────┴──► CANCELLED (stock released per line)       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Line items never change after commit. There are no setters for line
//! quantity, price or total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{OrderStatus, PaymentStatus};
use crate::validation::{
    validate_identifier, validate_quantity, validate_text_field, ValidationResult,
};
use crate::MAX_LINE_QUANTITY;

// =============================================================================
// Line Requests
// =============================================================================

/// A requested (product, quantity) pair, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
}

impl LineRequest {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        LineRequest {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Validates a line list and merges duplicate product ids.
///
/// ## Rules
/// - The list must not be empty
/// - Every product id is a valid identifier
/// - Every quantity is in `1..=MAX_LINE_QUANTITY`, and so is each merged sum
///
/// Merged lines keep the position of the first occurrence.
pub fn normalize_lines(lines: &[LineRequest]) -> ValidationResult<Vec<LineRequest>> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    let mut merged: Vec<LineRequest> = Vec::with_capacity(lines.len());
    for line in lines {
        validate_identifier("product_id", &line.product_id)?;
        validate_quantity(line.quantity)?;

        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .filter(|q| *q <= MAX_LINE_QUANTITY)
                    .ok_or_else(|| ValidationError::OutOfRange {
                        field: "quantity".to_string(),
                        min: 1,
                        max: MAX_LINE_QUANTITY,
                    })?;
            }
            None => merged.push(line.clone()),
        }
    }

    Ok(merged)
}

// =============================================================================
// Order Line
// =============================================================================

/// An immutable line of a committed order.
///
/// Uses the snapshot pattern: name and unit price are frozen at validation
/// time so later catalog changes never alter the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl OrderLine {
    /// Builds a line and computes its total.
    ///
    /// ## Example
    /// ```rust
    /// use harvest_core::{Money, OrderLine};
    ///
    /// let line = OrderLine::priced("kale", "Curly Kale", Money::from_cents(299), 2).unwrap();
    /// assert_eq!(line.line_total_cents, 598);
    /// ```
    pub fn priced(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: i64,
    ) -> ValidationResult<OrderLine> {
        validate_quantity(quantity)?;
        let line_total = unit_price
            .checked_mul_quantity(quantity)
            .ok_or_else(|| ValidationError::Overflow {
                field: "line_total".to_string(),
            })?;

        Ok(OrderLine {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price_cents: unit_price.cents(),
            line_total_cents: line_total.cents(),
        })
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }
}

/// Σ line totals, rejecting overflow.
pub fn order_total(lines: &[OrderLine]) -> ValidationResult<Money> {
    lines
        .iter()
        .try_fold(Money::zero(), |acc, line| acc.checked_add(line.line_total()))
        .ok_or_else(|| ValidationError::Overflow {
            field: "total".to_string(),
        })
}

// =============================================================================
// Order Metadata
// =============================================================================

/// Buyer-supplied metadata captured at placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
}

impl OrderDetails {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_text_field("shipping_address", self.shipping_address.as_deref())?;
        validate_text_field("billing_address", self.billing_address.as_deref())?;
        validate_text_field("payment_method", self.payment_method.as_deref())?;
        validate_text_field("notes", self.notes.as_deref())
    }
}

/// A partial update of order metadata. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetailsUpdate {
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
}

impl OrderDetailsUpdate {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_text_field("shipping_address", self.shipping_address.as_deref())?;
        validate_text_field("billing_address", self.billing_address.as_deref())?;
        validate_text_field("payment_method", self.payment_method.as_deref())?;
        validate_text_field("notes", self.notes.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.payment_status.is_none()
            && self.payment_method.is_none()
            && self.shipping_address.is_none()
            && self.billing_address.is_none()
            && self.notes.is_none()
    }
}

// =============================================================================
// Order
// =============================================================================

/// A committed order.
///
/// ## Release Tracking
/// `released_product_ids` lists the lines whose stock has already been given
/// back by a cancellation. A cancellation that stops halfway leaves the
/// order `CANCELLED` with some lines still pending, and cancelling again
/// finishes the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub owner_id: String,
    pub lines: Vec<OrderLine>,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub released_product_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `PENDING` order and computes its total from the lines.
    pub fn commit(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        lines: Vec<OrderLine>,
        details: OrderDetails,
        now: DateTime<Utc>,
    ) -> ValidationResult<Order> {
        if lines.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            });
        }
        let total = order_total(&lines)?;

        Ok(Order {
            id: id.into(),
            owner_id: owner_id.into(),
            lines,
            total_cents: total.cents(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: details.payment_method,
            shipping_address: details.shipping_address,
            billing_address: details.billing_address,
            notes: details.notes,
            released_product_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    pub fn contains_product(&self, product_id: &str) -> bool {
        self.lines.iter().any(|l| l.product_id == product_id)
    }

    pub fn is_stock_released(&self, product_id: &str) -> bool {
        self.released_product_ids.iter().any(|id| id == product_id)
    }

    /// Lines whose stock has not been released yet, last line first.
    pub fn pending_releases(&self) -> Vec<&OrderLine> {
        self.lines
            .iter()
            .rev()
            .filter(|l| !self.is_stock_released(&l.product_id))
            .collect()
    }

    pub fn is_fully_released(&self) -> bool {
        self.lines.iter().all(|l| self.is_stock_released(&l.product_id))
    }

    /// Records that a line's stock went back to the ledger. Idempotent.
    pub fn mark_released(&mut self, product_id: &str) {
        if !self.is_stock_released(product_id) {
            self.released_product_ids.push(product_id.to_string());
        }
    }

    /// Fails with `InvalidStatusTransition` unless `status → to` is allowed.
    pub fn check_transition(&self, to: OrderStatus) -> CoreResult<()> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidStatusTransition {
                order_id: self.id.clone(),
                from: self.status,
                to,
            })
        }
    }

    /// Applies a metadata update. Line items are untouched.
    pub fn apply_details(&mut self, update: &OrderDetailsUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.payment_status {
            self.payment_status = status;
        }
        if let Some(method) = &update.payment_method {
            self.payment_method = Some(method.clone());
        }
        if let Some(address) = &update.shipping_address {
            self.shipping_address = Some(address.clone());
        }
        if let Some(address) = &update.billing_address {
            self.billing_address = Some(address.clone());
        }
        if let Some(notes) = &update.notes {
            self.notes = Some(notes.clone());
        }
        self.updated_at = now;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, price: i64, qty: i64) -> OrderLine {
        OrderLine::priced(id, format!("Produce {}", id), Money::from_cents(price), qty).unwrap()
    }

    #[test]
    fn test_normalize_merges_duplicates() {
        let merged = normalize_lines(&[
            LineRequest::new("tomato", 2),
            LineRequest::new("kale", 1),
            LineRequest::new("tomato", 3),
        ])
        .unwrap();

        assert_eq!(
            merged,
            vec![LineRequest::new("tomato", 5), LineRequest::new("kale", 1)]
        );
    }

    #[test]
    fn test_normalize_rejects_bad_input() {
        assert!(matches!(
            normalize_lines(&[]),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            normalize_lines(&[LineRequest::new("tomato", 0)]),
            Err(ValidationError::MustBePositive { .. })
        ));
        assert!(normalize_lines(&[LineRequest::new("", 1)]).is_err());
        assert!(matches!(
            normalize_lines(&[LineRequest::new("tomato", 600), LineRequest::new("tomato", 600)]),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_priced_line_overflow() {
        let err = OrderLine::priced("gold", "Gold", Money::from_cents(i64::MAX / 2), 3).unwrap_err();
        assert!(matches!(err, ValidationError::Overflow { .. }));
    }

    #[test]
    fn test_commit_computes_total() {
        let order = Order::commit(
            "o-1",
            "buyer-1",
            vec![line("tomato", 499, 3), line("kale", 299, 2)],
            OrderDetails {
                shipping_address: Some("12 Orchard Lane".to_string()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.total().cents(), 1497 + 598);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.shipping_address.as_deref(), Some("12 Orchard Lane"));
        assert!(order.released_product_ids.is_empty());
    }

    #[test]
    fn test_commit_rejects_total_overflow() {
        let lines = vec![
            line("a", i64::MAX / 999, 999),
            line("b", i64::MAX / 999, 999),
        ];
        let err = Order::commit("o-1", "buyer-1", lines, OrderDetails::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::Overflow { .. }));
    }

    #[test]
    fn test_release_tracking() {
        let mut order = Order::commit(
            "o-1",
            "buyer-1",
            vec![line("a", 100, 1), line("b", 100, 1), line("c", 100, 1)],
            OrderDetails::default(),
            Utc::now(),
        )
        .unwrap();

        let pending: Vec<_> = order.pending_releases().iter().map(|l| l.product_id.clone()).collect();
        assert_eq!(pending, vec!["c", "b", "a"]);

        order.mark_released("c");
        order.mark_released("c");
        assert_eq!(order.released_product_ids, vec!["c"]);
        assert_eq!(order.pending_releases().len(), 2);
        assert!(!order.is_fully_released());

        order.mark_released("b");
        order.mark_released("a");
        assert!(order.is_fully_released());
    }

    #[test]
    fn test_check_transition() {
        let order = Order::commit(
            "o-1",
            "buyer-1",
            vec![line("a", 100, 1)],
            OrderDetails::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(order.check_transition(OrderStatus::Confirmed).is_ok());
        let err = order.check_transition(OrderStatus::Delivered).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidStatusTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
                ..
            }
        ));
    }

    #[test]
    fn test_apply_details_leaves_lines_alone() {
        let mut order = Order::commit(
            "o-1",
            "buyer-1",
            vec![line("a", 100, 2)],
            OrderDetails::default(),
            Utc::now(),
        )
        .unwrap();
        let update = OrderDetailsUpdate {
            payment_status: Some(PaymentStatus::Paid),
            notes: Some("ring twice".to_string()),
            ..Default::default()
        };

        order.apply_details(&update, Utc::now());

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.notes.as_deref(), Some("ring twice"));
        assert_eq!(order.total_cents, 200);
        assert!(!update.is_empty());
        assert!(OrderDetailsUpdate::default().is_empty());
    }
}
