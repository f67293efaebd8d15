//! Engine wiring and external service integrations.

pub mod backend;
pub mod payment_provider;

pub use backend::{build_backend, Backend, StartupError};
pub use payment_provider::HttpPaymentProvider;
