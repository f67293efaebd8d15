//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors reported by storage ports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("lesson {0} is cancelled")]
    AlreadyCancelled(Uuid),

    #[error("lesson {lesson_id} has {remaining} seat(s) left, {requested} requested")]
    InsufficientCapacity {
        lesson_id: Uuid,
        requested: i32,
        remaining: i32,
    },

    #[error("requester already holds an active booking on lesson {0}")]
    DuplicateBooking(Uuid),

    #[error("invariant violated on lesson {lesson_id}: {detail}")]
    InvariantViolation { lesson_id: Uuid, detail: String },

    #[error("state conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn lesson_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "lesson",
            id: id.to_string(),
        }
    }

    pub fn booking_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "booking",
            id: id.to_string(),
        }
    }

    pub fn session_not_found(session_ref: &str) -> Self {
        StoreError::NotFound {
            entity: "payment session",
            id: session_ref.to_string(),
        }
    }
}

/// Errors returned by engine operations.
///
/// Business outcomes (capacity, cancellation state) are ordinary variants
/// and must be surfaced to the caller as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already cancelled: {0}")]
    AlreadyCancelled(String),

    #[error("Insufficient capacity: {requested} requested, {remaining} remaining")]
    InsufficientCapacity { requested: i32, remaining: i32 },

    #[error("Duplicate booking on lesson {0}")]
    DuplicateBooking(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payment provider unavailable: {0}")]
    ExternalProviderUnavailable(String),

    #[error("Invariant violation on lesson {lesson_id}: {detail}")]
    InvariantViolation { lesson_id: Uuid, detail: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => {
                BookingError::NotFound(format!("{} {}", entity, id))
            }
            StoreError::AlreadyCancelled(id) => {
                BookingError::AlreadyCancelled(format!("lesson {}", id))
            }
            StoreError::InsufficientCapacity {
                requested,
                remaining,
                ..
            } => BookingError::InsufficientCapacity {
                requested,
                remaining,
            },
            StoreError::DuplicateBooking(id) => BookingError::DuplicateBooking(id),
            StoreError::InvariantViolation { lesson_id, detail } => {
                BookingError::InvariantViolation { lesson_id, detail }
            }
            StoreError::Conflict(msg) => BookingError::Validation(msg),
            StoreError::Backend(msg) => BookingError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_maps_to_booking_error() {
        let id = Uuid::new_v4();
        assert_eq!(
            BookingError::from(StoreError::InsufficientCapacity {
                lesson_id: id,
                requested: 2,
                remaining: 1,
            }),
            BookingError::InsufficientCapacity {
                requested: 2,
                remaining: 1
            }
        );
        assert!(matches!(
            BookingError::from(StoreError::lesson_not_found(id)),
            BookingError::NotFound(msg) if msg.starts_with("lesson ")
        ));
        assert!(matches!(
            BookingError::from(StoreError::AlreadyCancelled(id)),
            BookingError::AlreadyCancelled(_)
        ));
        assert!(matches!(
            BookingError::from(StoreError::Backend("down".into())),
            BookingError::Storage(_)
        ));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            BookingError::InsufficientCapacity {
                requested: 1,
                remaining: 0
            }
            .to_string(),
            "Insufficient capacity: 1 requested, 0 remaining"
        );
        assert_eq!(
            StoreError::booking_not_found(Uuid::nil()).to_string(),
            "booking 00000000-0000-0000-0000-000000000000 not found"
        );
    }
}
