//! HTTP route handlers.

pub mod admin;
pub mod bookings;
pub mod health;
pub mod lessons;
pub mod payments;
