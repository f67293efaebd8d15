//! Sweeps bookings whose checkout has not been settled yet.

use domain::services::BookingEngine;
use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};

/// Reconciles a batch of bookings still awaiting payment on every pass.
pub struct PaymentReconciliationJob {
    engine: Arc<BookingEngine>,
    batch_size: i64,
    interval_secs: u64,
}

impl PaymentReconciliationJob {
    pub fn new(engine: Arc<BookingEngine>, batch_size: i64, interval_secs: u64) -> Self {
        Self {
            engine,
            batch_size,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for PaymentReconciliationJob {
    fn name(&self) -> &'static str {
        "payment_reconciliation"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self
            .engine
            .reconcile_pending(self.batch_size)
            .await
            .map_err(|e| format!("Failed to list pending payments: {}", e))?;

        metrics::counter!("payment_reconciliations_total", "outcome" => "paid")
            .increment(summary.paid as u64);
        metrics::counter!("payment_reconciliations_total", "outcome" => "duplicate_refunded")
            .increment(summary.duplicate as u64);
        metrics::counter!("payment_reconciliations_total", "outcome" => "expired")
            .increment(summary.expired as u64);
        metrics::counter!("payment_reconciliations_total", "outcome" => "failed")
            .increment(summary.failed as u64);

        if summary.checked > 0 {
            tracing::info!(
                checked = summary.checked,
                paid = summary.paid,
                already_paid = summary.already_paid,
                duplicate = summary.duplicate,
                expired = summary.expired,
                pending = summary.pending,
                failed = summary.failed,
                "Payment reconciliation pass"
            );
        }
        Ok(())
    }
}
