//! Refund entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{RefundRecord, RefundRecordStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the refunds table.
#[derive(Debug, Clone, FromRow)]
pub struct RefundEntity {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub session_ref: String,
    pub percent: i16,
    pub amount_cents: i64,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RefundEntity> for RefundRecord {
    fn from(entity: RefundEntity) -> Self {
        Self {
            id: entity.id,
            booking_id: entity.booking_id,
            session_ref: entity.session_ref,
            percent: entity.percent,
            amount_cents: entity.amount_cents,
            status: entity
                .status
                .parse::<RefundRecordStatus>()
                .unwrap_or(RefundRecordStatus::Pending),
            attempts: entity.attempts,
            last_error: entity.last_error,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
