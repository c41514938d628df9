use crate::config::AppConfig;
use crate::errors::ServiceError;
use migrations::Migrator;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Log every statement through sqlx
    pub sqlx_logging: bool,
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
            sqlx_logging: false,
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: cfg.log_level.eq_ignore_ascii_case("trace"),
        }
    }
}

/// Establishes a connection pool with default tuning.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns `ServiceError::DatabaseError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(config.sqlx_logging);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs all pending migrations from the `migrations` crate.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = Migrator::up(pool, None)
        .await
        .map_err(|e| ServiceError::MigrationError(e.to_string()));

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<Duration, ServiceError> {
    let start = Instant::now();
    pool.ping().await.map_err(|e| {
        error!("Database connection check failed: {}", e);
        ServiceError::DatabaseError(e)
    })?;
    let elapsed = start.elapsed();
    debug!("Database connection check successful in {:?}", elapsed);
    Ok(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_memory_pool_migrates_and_pings() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();
        assert!(check_connection(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn sqlite_schema_round_trips_money() {
        use crate::entities::funding_pool;
        use rust_decimal::Decimal;
        use sea_orm::{ActiveModelTrait, EntityTrait, Set};

        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();

        let now = chrono::Utc::now();
        funding_pool::ActiveModel {
            id: Set("precision".into()),
            balance: Set(Decimal::new(12_345_675, 2)),
            committed: Set(Decimal::ZERO),
            in_flight: Set(Decimal::new(25, 2)),
            balance_refreshed_at: Set(None),
            updated_at: Set(now),
            version: Set(1),
        }
        .insert(&pool)
        .await
        .unwrap();

        let row = funding_pool::Entity::find_by_id("precision".to_string())
            .one(&pool)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.balance, Decimal::new(12_345_675, 2));
        assert_eq!(row.in_flight, Decimal::new(25, 2));
    }

    #[test]
    fn db_config_follows_app_config() {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.db_max_connections = 7;
        cfg.db_acquire_timeout_secs = 3;
        let db: DbConfig = (&cfg).into();
        assert_eq!(db.max_connections, 7);
        assert_eq!(db.acquire_timeout, Duration::from_secs(3));
        assert_eq!(db.url, "sqlite::memory:");
    }
}
