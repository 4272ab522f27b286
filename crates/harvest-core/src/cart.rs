//! # Cart
//!
//! A buyer's advisory shopping cart.
//!
//! A cart never holds stock. Its lines are a wish list that the reservation
//! coordinator re-validates at order time, so the snapshot price shown here
//! may differ from the price the order is committed at.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Operations                                      │
//! │                                                                         │
//! │  Buyer Action             Engine Call              Cart Change          │
//! │  ────────────             ───────────              ───────────          │
//! │                                                                         │
//! │  Add product ────────────► add_to_cart() ────────► add_line()           │
//! │                                                                         │
//! │  Change quantity ────────► update_cart_line() ───► set_quantity()       │
//! │                                                                         │
//! │  Click remove ───────────► remove_cart_line() ───► remove_line()        │
//! │                                                                         │
//! │  Click clear ────────────► clear_cart() ─────────► clear()              │
//! │                                                                         │
//! │  Place order ────────────► place_order(FromCart) ► clear() on success   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::Money;
use crate::order::LineRequest;
use crate::types::CatalogProduct;
use crate::validation::{validate_cart_size, validate_quantity, ValidationResult};
use crate::MAX_LINE_QUANTITY;

/// A line in the cart.
///
/// Name, price and image are frozen when the product is first added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub image_ref: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// Creates a line from the catalog's current view of a product.
    pub fn from_product(product: &CatalogProduct, quantity: i64, now: DateTime<Utc>) -> Self {
        CartLine {
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            unit_price_cents: product.unit_price_cents,
            quantity,
            image_ref: product.image_ref.clone(),
            added_at: now,
        }
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Snapshot price × quantity, `None` on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price().checked_mul_quantity(self.quantity)
    }
}

/// The shopping cart of one owner.
///
/// ## Invariants
/// - Lines are unique by `product_id` (adding the same product increases quantity)
/// - Every line has `quantity >= 1`; a line set to 0 is removed
/// - At most `MAX_CART_LINES` lines, each at most `MAX_LINE_QUANTITY`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub owner_id: String,
    pub lines: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new(owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Cart {
            owner_id: owner_id.into(),
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a product or increases the quantity of its existing line.
    ///
    /// An existing line keeps the snapshot taken when it was first added.
    pub fn add_line(&mut self, product: &CatalogProduct, quantity: i64) -> ValidationResult<&CartLine> {
        validate_quantity(quantity)?;
        let now = Utc::now();

        let index = match self.lines.iter().position(|l| l.product_id == product.id) {
            Some(index) => {
                let line = &mut self.lines[index];
                line.quantity = checked_line_quantity(line.quantity, quantity)?;
                index
            }
            None => {
                validate_cart_size(self.lines.len())?;
                self.lines.push(CartLine::from_product(product, quantity, now));
                self.lines.len() - 1
            }
        };

        self.updated_at = now;
        Ok(&self.lines[index])
    }

    /// Quantity the line for `product_id` would have after adding `quantity`.
    pub fn resulting_quantity(&self, product_id: &str, quantity: i64) -> i64 {
        self.line(product_id)
            .map_or(0, |l| l.quantity)
            .saturating_add(quantity)
    }

    /// Sets the quantity of an existing line.
    ///
    /// ## Behavior
    /// - `quantity <= 0` removes the line
    /// - A product that is not in the cart is left alone
    ///
    /// Returns whether the cart changed.
    pub fn set_quantity(&mut self, product_id: &str, quantity: i64) -> ValidationResult<bool> {
        if quantity <= 0 {
            return Ok(self.remove_line(product_id));
        }
        validate_quantity(quantity)?;

        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = quantity;
                self.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes the line for `product_id`. Returns whether one was removed.
    pub fn remove_line(&mut self, product_id: &str) -> bool {
        let initial_len = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);

        let removed = self.lines.len() != initial_len;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.updated_at = Utc::now();
    }

    pub fn line(&self, product_id: &str) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Sum of snapshot line totals, `None` on overflow. Display only.
    pub fn subtotal(&self) -> Option<Money> {
        self.lines
            .iter()
            .try_fold(Money::zero(), |acc, l| acc.checked_add(l.line_total()?))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The cart's lines as an order request, in cart order.
    pub fn to_line_requests(&self) -> Vec<LineRequest> {
        self.lines
            .iter()
            .map(|l| LineRequest::new(l.product_id.clone(), l.quantity))
            .collect()
    }
}

fn checked_line_quantity(current: i64, added: i64) -> ValidationResult<i64> {
    match current.checked_add(added) {
        Some(total) if total <= MAX_LINE_QUANTITY => Ok(total),
        _ => Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY,
        }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
