//! # Engine Error Types
//!
//! Errors raised by storage collaborators and by engine setup.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────┐  │
//! │  │  StoreError (collaborators) │  │  EngineError (setup)            │  │
//! │  │                             │  │                                 │  │
//! │  │  Unavailable  (transient)   │  │  InvalidConfig                  │  │
//! │  │  NotFound                   │  │  ConfigLoadFailed               │  │
//! │  │  Conflict                   │  │                                 │  │
//! │  │  Corrupt                    │  │                                 │  │
//! │  └──────────────┬──────────────┘  └─────────────────────────────────┘  │
//! │                 │                                                       │
//! │                 ▼  From<StoreError> for CoreError                       │
//! │           CoreError (what callers of the engine see)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use harvest_core::{CoreError, ValidationError};
use thiserror::Error;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for engine setup.
pub type EngineResult<T> = Result<T, EngineError>;

/// Which kind of record a store error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Product,
    Order,
    Cart,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Product => write!(f, "product"),
            Entity::Order => write!(f, "order"),
            Entity::Cart => write!(f, "cart"),
        }
    }
}

// =============================================================================
// Store Error
// =============================================================================

/// Error returned by `StockStore`, `CartStore`, `OrderLedger` and `Catalog`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Transient failure (timeout, busy database, lost connection).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// A record with this key already exists.
    #[error("{entity} already exists: {id}")]
    Conflict { entity: Entity, id: String },

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - `Unavailable` only. Everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: Entity::Product,
                id,
            } => CoreError::ProductNotFound(id),
            StoreError::NotFound {
                entity: Entity::Order,
                id,
            } => CoreError::OrderNotFound(id),
            StoreError::Conflict { entity, id } => CoreError::Validation(ValidationError::Duplicate {
                field: format!("{}_id", entity),
                value: id,
            }),
            other => CoreError::StoreUnavailable {
                product_id: None,
                message: other.to_string(),
            },
        }
    }
}

// =============================================================================
// Engine Error
// =============================================================================

/// Errors raised while building an engine from configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(StoreError::Unavailable("database is locked".into()).is_retryable());
        assert!(!StoreError::not_found(Entity::Product, "kale").is_retryable());
        assert!(!StoreError::Corrupt("bad status".into()).is_retryable());
    }

    #[test]
    fn test_maps_to_core_error() {
        let err: CoreError = StoreError::not_found(Entity::Order, "o-1").into();
        assert_eq!(err, CoreError::OrderNotFound("o-1".into()));

        let err: CoreError = StoreError::not_found(Entity::Product, "kale").into();
        assert_eq!(err, CoreError::ProductNotFound("kale".into()));

        let err: CoreError = StoreError::Conflict {
            entity: Entity::Product,
            id: "kale".into(),
        }
        .into();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::Duplicate { ref field, .. }) if field == "product_id"
        ));

        let err: CoreError = StoreError::Unavailable("timeout".into()).into();
        assert!(err.is_retryable());
    }
}
