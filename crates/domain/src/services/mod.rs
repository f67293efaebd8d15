//! Domain services for SkiMonitor.
//!
//! The pure algorithms (recurrence, refund policy, revenue) sit beside the
//! storage and provider ports and the engine that drives them.

pub mod engine;
pub mod memory;
pub mod payment;
pub mod ports;
pub mod recurrence;
pub mod refund_policy;
pub mod revenue;

pub use engine::{
    BookingEngine, EngineSettings, LessonCancellationReport, ReconciliationSummary,
    RefundRetrySummary,
};
pub use memory::InMemoryStore;
pub use payment::{MockPaymentProvider, MockRefund, PollPolicy};
pub use ports::{
    BookingStore, LessonCancellation, LessonStore, NewBooking, PaymentCapture, PaymentProvider,
    ProviderError, RefundStore,
};
pub use recurrence::{expand_template, occurrence_count, ExpansionError};
pub use refund_policy::{refund_tier, refund_tier_at};
pub use revenue::{commission_cents, compute_revenue_stats, DEFAULT_COMMISSION_RATE_BPS};
