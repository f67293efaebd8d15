//! Re-issues refunds the payment provider could not accept earlier.

use domain::services::BookingEngine;
use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};

pub struct RefundRetryJob {
    engine: Arc<BookingEngine>,
    batch_size: i64,
    interval_secs: u64,
}

impl RefundRetryJob {
    pub fn new(engine: Arc<BookingEngine>, batch_size: i64, interval_secs: u64) -> Self {
        Self {
            engine,
            batch_size,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for RefundRetryJob {
    fn name(&self) -> &'static str {
        "refund_retry"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self
            .engine
            .retry_pending_refunds(self.batch_size)
            .await
            .map_err(|e| format!("Failed to list pending refunds: {}", e))?;

        if summary.attempted == 0 {
            return Ok(());
        }

        tracing::info!(
            attempted = summary.attempted,
            issued = summary.issued,
            failed = summary.failed,
            still_pending = summary.still_pending,
            "Refund retry pass"
        );
        if summary.failed > 0 {
            tracing::warn!(
                failed = summary.failed,
                "Refunds exhausted their attempts and need manual handling"
            );
        }
        Ok(())
    }
}
