//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod booking;
pub mod lesson;
pub mod payment_session;
pub mod refund;

pub use booking::{BookingEntity, BookingWithLessonEntity, RevenueLineEntity, BOOKING_COLUMNS};
pub use lesson::{LessonEntity, LESSON_COLUMNS};
pub use payment_session::{PaymentSessionEntity, PAYMENT_SESSION_COLUMNS};
pub use refund::RefundEntity;
