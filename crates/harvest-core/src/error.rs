//! # Error Types
//!
//! Domain error taxonomy for Harvest.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  harvest-core errors (this file)                                       │
//! │  ├── CoreError        - Everything a caller of the engine can observe  │
//! │  ├── ValidationError  - Input validation failures (InvalidInput)       │
//! │  └── ErrorKind        - Flat classification of CoreError               │
//! │                                                                         │
//! │  harvest-engine errors                                                 │
//! │  └── StoreError       - Backing store failures (mapped to CoreError)   │
//! │                                                                         │
//! │  harvest-db errors                                                     │
//! │  └── DbError          - SQLite failures (mapped to StoreError)         │
//! │                                                                         │
//! │  Flow: DbError → StoreError → CoreError → caller                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Stock rejections always name the failing product
//! 3. Errors are enum variants, never String

use thiserror::Error;

use crate::types::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Errors surfaced by every engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Product id is unknown to the catalog or the stock ledger.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Order id is unknown to the order ledger.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Not enough units left to satisfy a reservation.
    ///
    /// ## User Workflow
    /// ```text
    /// Place order (tomatoes x3)
    ///      │
    ///      ▼
    /// try_reserve: available=2
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: "tomato-01", available: 2, requested: 3 }
    ///      │
    ///      ▼
    /// UI shows: "Only 2 left"
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Product was unlisted by its seller; its stock is frozen.
    #[error("Product {product_id} is not available for sale")]
    NotAvailable { product_id: String },

    /// Requested order status change is not in the transition table.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Backing store kept failing after retries.
    ///
    /// Any reservation taken before the failure has already been
    /// compensated by the time this error is returned.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        product_id: Option<String>,
        message: String,
    },

    /// Malformed input (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Flat classification of [`CoreError`], one entry per taxonomy bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    InsufficientStock,
    NotAvailable,
    InvalidStatusTransition,
    StoreUnavailable,
}

impl CoreError {
    /// Creates a StoreUnavailable error tied to a product.
    pub fn store_unavailable(product_id: Option<&str>, message: impl Into<String>) -> Self {
        CoreError::StoreUnavailable {
            product_id: product_id.map(str::to_string),
            message: message.into(),
        }
    }

    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ProductNotFound(_) | CoreError::OrderNotFound(_) => ErrorKind::NotFound,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::NotAvailable { .. } => ErrorKind::NotAvailable,
            CoreError::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            CoreError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            CoreError::Validation(_) => ErrorKind::InvalidInput,
        }
    }

    /// Returns the product this error is about, if it is about one.
    pub fn product_id(&self) -> Option<&str> {
        match self {
            CoreError::ProductNotFound(id) => Some(id),
            CoreError::InsufficientStock { product_id, .. }
            | CoreError::NotAvailable { product_id } => Some(product_id),
            CoreError::StoreUnavailable { product_id, .. } => product_id.as_deref(),
            _ => None,
        }
    }

    /// Returns true if repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Detected before any stock mutation, so they never have side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Duplicate value (e.g., product listed twice).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Arithmetic on a monetary amount overflowed.
    #[error("{field} is too large to compute")]
    Overflow { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "tomato-01".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for tomato-01: available 2, requested 3"
        );

        let err = CoreError::InvalidStatusTransition {
            order_id: "o-1".to_string(),
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered,
        };
        assert_eq!(err.to_string(), "Order o-1 cannot move from PENDING to DELIVERED");
    }

    #[test]
    fn test_kind_and_product() {
        let err = CoreError::NotAvailable {
            product_id: "kale".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotAvailable);
        assert_eq!(err.product_id(), Some("kale"));

        let err = CoreError::OrderNotFound("o-1".to_string());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.product_id(), None);
    }

    #[test]
    fn test_only_store_failures_are_retryable() {
        assert!(CoreError::store_unavailable(Some("kale"), "timeout").is_retryable());
        assert!(!CoreError::ProductNotFound("kale".into()).is_retryable());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "lines".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert_eq!(core_err.kind(), ErrorKind::InvalidInput);
        assert_eq!(core_err.to_string(), "Validation error: lines is required");
    }
}
