//! Database connection pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::metrics::record_pool_metrics;
use crate::MIGRATOR;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Creates a PostgreSQL connection pool and applies pending migrations.
pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    MIGRATOR.run(&pool).await?;
    record_pool_metrics(&pool);
    tracing::info!(
        max_connections = config.max_connections,
        "Database pool ready, migrations applied"
    );

    Ok(pool)
}

/// Returns true if the database answers a trivial query.
pub async fn ping(pool: &PgPool) -> bool {
    let result = sqlx::query("SELECT 1").execute(pool).await;
    record_pool_metrics(pool);
    result.is_ok()
}
