//! Repository implementations for database operations.
//!
//! Each repository implements one of the domain storage ports.

pub mod booking;
pub mod lesson;
pub mod refund;

pub use booking::BookingRepository;
pub use lesson::LessonRepository;
pub use refund::RefundRepository;

use domain::StoreError;

/// PostgreSQL SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Maps a database error onto the storage port error.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Conflict(err.to_string());
    }
    tracing::error!(error = %err, "Database query failed");
    StoreError::Backend(err.to_string())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}
