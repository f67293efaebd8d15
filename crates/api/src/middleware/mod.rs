//! HTTP middleware components.

pub mod logging;
pub mod metrics;
pub mod trace_id;
pub mod user_auth;

pub use self::metrics::{init_metrics, metrics_handler, metrics_middleware};
pub use trace_id::{trace_id, REQUEST_ID_HEADER};
pub use user_auth::{require_admin, require_user_auth};
