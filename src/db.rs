pub mod transaction;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    /// Every pooled connection to `sqlite::memory:` would open its own empty
    /// database, so in-memory URLs are pinned to a single connection.
    fn effective_pool_size(&self) -> (u32, u32) {
        if self.url.contains(":memory:") || self.url.contains("mode=memory") {
            (1, 1)
        } else {
            (self.max_connections, self.min_connections)
        }
    }
}

/// Establishes a connection pool to the database
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let (max_connections, min_connections) = config.effective_pool_size();
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    info!(
        "Connecting to database with max_connections={}",
        max_connections
    );

    Database::connect(opt).await.map_err(|e| {
        error!("Failed to connect to database: {}", e);
        ServiceError::db_error(e)
    })
}

/// Establishes a connection pool using the layered application configuration
pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DbPool, ServiceError> {
    let pool = establish_connection_with_config(&config.db_config()).await?;
    if config.auto_migrate {
        run_migrations(&pool).await?;
    }
    Ok(pool)
}

/// Applies all pending schema migrations
pub async fn run_migrations(db: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    Migrator::up(db, None).await.map_err(|e| {
        error!("Migration failed: {}", e);
        ServiceError::db_error(e)
    })?;
    info!("Database migrations complete");
    Ok(())
}

/// Whether the backend understands `SELECT ... FOR UPDATE`. SQLite serializes
/// writers at the database level instead.
pub fn supports_row_locks(backend: DbBackend) -> bool {
    matches!(backend, DbBackend::Postgres | DbBackend::MySql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sqlite_uses_single_connection() {
        let config = DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 8,
            min_connections: 2,
            ..Default::default()
        };
        assert_eq!(config.effective_pool_size(), (1, 1));

        let config = DbConfig {
            url: "postgres://localhost/inventory".into(),
            max_connections: 8,
            min_connections: 2,
            ..Default::default()
        };
        assert_eq!(config.effective_pool_size(), (8, 2));
    }

    #[tokio::test]
    async fn migrations_apply_on_in_memory_sqlite() {
        let pool = establish_connection("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(Migrator::get_pending_migrations(&pool).await.unwrap().is_empty());
    }

    #[test]
    fn row_locks_only_on_server_backends() {
        assert!(supports_row_locks(DbBackend::Postgres));
        assert!(!supports_row_locks(DbBackend::Sqlite));
    }
}
