//! Domain layer for the SkiMonitor backend.
//!
//! This crate contains:
//! - Domain models (LessonInstance, Booking, RefundRecord)
//! - Business logic services (recurrence expansion, refund policy,
//!   revenue aggregation, the booking engine)
//! - Storage and payment provider ports with in-memory/mock implementations
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;

pub use error::{BookingError, StoreError};
