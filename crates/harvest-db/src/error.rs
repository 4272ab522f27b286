//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (harvest-engine) ← Unavailable is retried with backoff     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CoreError ← What callers of the Marketplace see                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use harvest_engine::{Entity, StoreError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Listing the same product twice
    /// - Appending an order id that already exists
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A CHECK constraint rejected the write (e.g. negative stock).
    #[error("Constraint violation: {0}")]
    CheckViolation(String),

    /// Another connection holds the write lock (SQLITE_BUSY / SQLITE_LOCKED).
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether retrying the same statement later can succeed.
    ///
    /// A busy or locked SQLite statement did not execute, so retrying a
    /// conditional decrement cannot apply it twice.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Busy(_) | DbError::PoolExhausted | DbError::ConnectionFailed(_)
        )
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze code/message for constraint or lock
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::Io             → DbError::ConnectionFailed
/// Decode errors               → DbError::Decode
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::Internal("expected row was not returned".to_string()),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let code = db_err.code();
                let code = code.as_deref().unwrap_or("");

                // SQLITE_BUSY is 5, SQLITE_LOCKED is 6; extended codes keep
                // the primary code in the low byte.
                let primary = code.parse::<i32>().map(|c| c & 0xff).unwrap_or(-1);
                if primary == 5 || primary == 6 || msg.contains("database is locked") {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("CHECK constraint failed") {
                    DbError::CheckViolation(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),

            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
                DbError::Decode(err.to_string())
            }

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Convert database errors to the engine's store error.
///
/// ## Error Mapping
/// ```text
/// Busy, PoolExhausted, ConnectionFailed → StoreError::Unavailable (retried)
/// NotFound                              → StoreError::NotFound
/// UniqueViolation                       → StoreError::Conflict
/// everything else                       → StoreError::Corrupt (not retried)
/// ```
impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            e if e.is_transient() => StoreError::Unavailable(e.to_string()),
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => StoreError::Conflict {
                entity: entity_for_field(&field),
                id: value,
            },
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

/// Maps `table.column` from a constraint message to the entity it guards.
fn entity_for_field(field: &str) -> Entity {
    match field.split('.').next().unwrap_or("") {
        "orders" | "order_lines" => Entity::Order,
        "carts" | "cart_lines" => Entity::Cart,
        _ => Entity::Product,
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_become_unavailable() {
        let store: StoreError = DbError::Busy("database is locked".into()).into();
        assert!(store.is_retryable());

        let store: StoreError = DbError::PoolExhausted.into();
        assert!(store.is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let store: StoreError = DbError::CheckViolation("stock".into()).into();
        assert!(matches!(store, StoreError::Corrupt(_)));
        assert!(!store.is_retryable());

        let store: StoreError = DbError::not_found(Entity::Order, "o-1").into();
        assert_eq!(store, StoreError::not_found(Entity::Order, "o-1"));
    }

    #[test]
    fn test_unique_violation_names_entity() {
        let store: StoreError = DbError::duplicate("orders.id", "o-1").into();
        assert_eq!(
            store,
            StoreError::Conflict {
                entity: Entity::Order,
                id: "o-1".into()
            }
        );

        let store: StoreError = DbError::duplicate("stock.product_id", "kale").into();
        assert!(matches!(store, StoreError::Conflict { entity: Entity::Product, .. }));
    }
}
