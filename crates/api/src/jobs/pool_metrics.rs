//! Connection pool gauges for the PostgreSQL backend.

use sqlx::PgPool;

use super::scheduler::{Job, JobFrequency};

/// Refreshes the `database_connections_*` gauges between scrapes.
pub struct PoolMetricsJob {
    pool: PgPool,
}

impl PoolMetricsJob {
    const INTERVAL_SECS: u64 = 15;

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(Self::INTERVAL_SECS)
    }

    async fn execute(&self) -> Result<(), String> {
        if self.pool.is_closed() {
            return Err("database pool is closed".to_string());
        }
        persistence::metrics::record_pool_metrics(&self.pool);
        Ok(())
    }
}
