//! Background job scheduler and job implementations.

mod payment_reconciliation;
mod pool_metrics;
mod refund_retry;
mod scheduler;

pub use payment_reconciliation::PaymentReconciliationJob;
pub use pool_metrics::PoolMetricsJob;
pub use refund_retry::RefundRetryJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
