//! Payment session entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{PaymentSession, PaymentSessionState};
use sqlx::FromRow;
use uuid::Uuid;

pub const PAYMENT_SESSION_COLUMNS: &str =
    "session_ref, booking_id, amount_cents, state, created_at, settled_at";

/// Database row mapping for the payment_sessions table.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentSessionEntity {
    pub session_ref: String,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<PaymentSessionEntity> for PaymentSession {
    fn from(entity: PaymentSessionEntity) -> Self {
        Self {
            session_ref: entity.session_ref,
            booking_id: entity.booking_id,
            amount_cents: entity.amount_cents,
            state: entity
                .state
                .parse::<PaymentSessionState>()
                .unwrap_or(PaymentSessionState::Open),
            created_at: entity.created_at,
            settled_at: entity.settled_at,
        }
    }
}
