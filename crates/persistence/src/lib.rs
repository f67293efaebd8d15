//! Persistence layer for the SkiMonitor backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations of the domain storage ports
//! - SQL migrations and query metrics

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;

pub use repositories::{BookingRepository, LessonRepository, RefundRepository};

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./src/migrations");
