//! Query and connection pool metrics.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

pub fn record_query_duration(query: &'static str, duration_secs: f64) {
    histogram!("database_query_duration_seconds", "query" => query).record(duration_secs);
}

/// Pool gauges, refreshed on startup, on every ping and by the pool metrics job.
pub fn record_pool_metrics(pool: &PgPool) {
    let total = pool.size() as usize;
    let idle = pool.num_idle();

    gauge!("database_connections_active").set(total.saturating_sub(idle) as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(total as f64);
}

/// Times one repository query.
///
/// ```ignore
/// let timer = QueryTimer::new("find_lesson_by_id");
/// let result = sqlx::query_as::<_, LessonEntity>(..).fetch_optional(&self.pool).await;
/// timer.finish(&result);
/// ```
pub struct QueryTimer {
    query: &'static str,
    started: Instant,
}

impl QueryTimer {
    pub fn new(query: &'static str) -> Self {
        Self {
            query,
            started: Instant::now(),
        }
    }

    pub fn record(self) {
        record_query_duration(self.query, self.started.elapsed().as_secs_f64());
    }

    /// Records the duration and counts the query as failed when `result` is an error.
    pub fn finish<T>(self, result: &Result<T, sqlx::Error>) {
        if result.is_err() {
            counter!("database_query_errors_total", "query" => self.query).increment(1);
        }
        self.record();
    }
}
