//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.marketplace(&config) ← Repositories wired into the engine          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode so readers never block the single writer.
//! Writers still serialize; a writer that cannot get the lock within
//! `busy_timeout` fails with `SQLITE_BUSY`, which the engine retries.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use harvest_engine::{EngineConfig, Marketplace};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cart::CartRepository;
use crate::repository::order::OrderRepository;
use crate::repository::product::ProductRepository;

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/harvest.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long a statement waits for the write lock before `SQLITE_BUSY`.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let db = Database::new(DbConfig::in_memory()).await?;
    /// // Database is isolated, perfect for tests
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(MEMORY_PATH),
            max_connections: 1, // Each connection would get its own database
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(MEMORY_PATH)
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Memory)
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                // NORMAL is durable under WAL, may lose the last commit on power loss
                .synchronous(SqliteSynchronous::Normal)
        };

        // SQLite ships with foreign keys disabled
        Ok(options.foreign_keys(true).busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite (WAL, NORMAL synchronous, foreign keys, busy timeout)
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_options = config.connect_options()?;
        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(max_connections = config.max_connections, "Database pool created");

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Applies pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Catalog and stock tables.
    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    pub fn carts(&self) -> CartRepository {
        CartRepository::new(self.pool.clone())
    }

    /// Builds a [`Marketplace`] whose every collaborator is backed by this
    /// database.
    pub fn marketplace(&self, config: &EngineConfig) -> Marketplace {
        let products = Arc::new(self.products());
        let orders = Arc::new(self.orders());
        Marketplace::new(
            config,
            products.clone(),
            products,
            Arc::new(self.carts()),
            orders.clone(),
            orders,
        )
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DbConfig::in_memory();
        assert!(config.is_in_memory());

        let db = Database::new(config).await.unwrap();
        assert!(db.health_check().await);

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_marketplace_over_sqlite() {
        use harvest_core::{CatalogProduct, CoreError, LineRequest, OrderStatus};
        use harvest_engine::OrderRequest;

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let market = db.marketplace(&EngineConfig::default());
        market
            .list_product(
                CatalogProduct {
                    id: "strawberries".into(),
                    seller_id: "berry-hill".into(),
                    name: "Strawberries".into(),
                    unit_price_cents: 699,
                    image_ref: None,
                    unit: Some("pint".into()),
                    category: Some("fruit".into()),
                },
                5,
                None,
            )
            .await
            .unwrap();

        let place = |buyer: &'static str| {
            let market = market.clone();
            tokio::spawn(async move {
                market
                    .place_order(buyer, OrderRequest::lines(vec![LineRequest::new("strawberries", 3)]))
                    .await
            })
        };
        let (a, b) = (place("buyer-a"), place("buyer-b"));
        let results = [a.await.unwrap(), b.await.unwrap()];

        let committed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].total_cents, 3 * 699);
        let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(
            rejected,
            &CoreError::InsufficientStock {
                product_id: "strawberries".into(),
                available: 2,
                requested: 3,
            }
        );
        assert_eq!(market.available_quantity("strawberries").await.unwrap(), 2);

        let cancelled = market.cancel_order(&committed[0].id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.is_fully_released());
        assert_eq!(market.available_quantity("strawberries").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_interrupted_release_rolls_back_stock() {
        use harvest_core::{CatalogProduct, ErrorKind, LineRequest, OrderStatus};
        use harvest_engine::OrderRequest;

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let market = db.marketplace(&EngineConfig::default());
        market
            .list_product(
                CatalogProduct {
                    id: "tomatoes".into(),
                    seller_id: "green-acres".into(),
                    name: "Heirloom Tomatoes".into(),
                    unit_price_cents: 499,
                    image_ref: None,
                    unit: Some("lb".into()),
                    category: Some("vegetables".into()),
                },
                10,
                None,
            )
            .await
            .unwrap();
        let order = market
            .place_order("buyer-1", OrderRequest::lines(vec![LineRequest::new("tomatoes", 4)]))
            .await
            .unwrap();

        // Fails the line mark after the stock row was already updated.
        sqlx::query(
            r#"
            CREATE TRIGGER interrupt_release BEFORE UPDATE OF released_at ON order_lines
            BEGIN
                SELECT RAISE(ABORT, 'line release interrupted');
            END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = market.cancel_order(&order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert_eq!(err.product_id(), Some("tomatoes"));
        assert_eq!(market.available_quantity("tomatoes").await.unwrap(), 6);

        let stored = market.get_order(&order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert!(!stored.is_fully_released());

        sqlx::query("DROP TRIGGER interrupt_release")
            .execute(db.pool())
            .await
            .unwrap();

        let resumed = market.cancel_order(&order.id).await.unwrap();
        assert!(resumed.is_fully_released());
        assert_eq!(market.available_quantity("tomatoes").await.unwrap(), 10);

        market.cancel_order(&order.id).await.unwrap();
        assert_eq!(market.available_quantity("tomatoes").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/harvest-test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250))
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert!(!config.run_migrations);
        assert!(!config.is_in_memory());
    }
}
