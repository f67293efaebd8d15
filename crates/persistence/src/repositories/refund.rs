//! Refund repository for database operations.

use domain::models::RefundRecord;
use domain::services::RefundStore;
use domain::StoreError;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::store_error;
use crate::entities::RefundEntity;
use crate::metrics::QueryTimer;

/// Repository for refund follow-up records.
#[derive(Clone)]
pub struct RefundRepository {
    pool: PgPool,
}

impl RefundRepository {
    /// Creates a new RefundRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Inserts a refund record on a pool or inside an open transaction.
pub(crate) async fn insert_refund_row<'e, E>(
    executor: E,
    refund: &RefundRecord,
) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO refunds (id, booking_id, session_ref, percent, amount_cents, status,
                             attempts, last_error, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(refund.id)
    .bind(refund.booking_id)
    .bind(&refund.session_ref)
    .bind(refund.percent)
    .bind(refund.amount_cents)
    .bind(refund.status.as_str())
    .bind(refund.attempts)
    .bind(&refund.last_error)
    .bind(refund.created_at)
    .bind(refund.updated_at)
    .execute(executor)
    .await
    .map_err(store_error)?;
    Ok(())
}

#[async_trait::async_trait]
impl RefundStore for RefundRepository {
    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        insert_refund_row(&self.pool, refund).await
    }

    async fn update_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refunds
            SET status = $2, attempts = $3, last_error = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(refund.id)
        .bind(refund.status.as_str())
        .bind(refund.attempts)
        .bind(&refund.last_error)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "refund",
                id: refund.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<RefundRecord>, StoreError> {
        let timer = QueryTimer::new("list_pending_refunds");
        let result = sqlx::query_as::<_, RefundEntity>(
            r#"
            SELECT id, booking_id, session_ref, percent, amount_cents, status, attempts,
                   last_error, created_at, updated_at
            FROM refunds
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn list_refunds_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<RefundRecord>, StoreError> {
        let result = sqlx::query_as::<_, RefundEntity>(
            r#"
            SELECT id, booking_id, session_ref, percent, amount_cents, status, attempts,
                   last_error, created_at, updated_at
            FROM refunds
            WHERE booking_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.into_iter().map(Into::into).collect())
    }
}
