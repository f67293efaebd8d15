//! Booking repository for database operations.
//!
//! Every seat-affecting write runs in a transaction that holds the lesson
//! row lock first and the booking row lock second. Payment captures lock the
//! payment session row first and the booking row second.

use chrono::{DateTime, NaiveDate, Utc};
use domain::models::{
    Booking, CancellationActor, LessonInstance, PaymentSession, PaymentSessionState, RevenueLine,
};
use domain::services::{BookingStore, NewBooking, PaymentCapture};
use domain::StoreError;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::lesson::{lock_lesson, store_seats};
use super::refund::insert_refund_row;
use super::{is_unique_violation, store_error};
use crate::entities::{
    BookingEntity, BookingWithLessonEntity, PaymentSessionEntity, RevenueLineEntity,
    BOOKING_COLUMNS, PAYMENT_SESSION_COLUMNS,
};
use crate::metrics::QueryTimer;

/// Repository for bookings.
#[derive(Clone)]
pub struct BookingRepository {
    pool: PgPool,
}

impl BookingRepository {
    /// Creates a new BookingRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<BookingEntity>, sqlx::Error> {
        sqlx::query_as::<_, BookingEntity>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }
}

async fn lock_booking(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Booking, StoreError> {
    let entity = sqlx::query_as::<_, BookingEntity>(&format!(
        "SELECT {} FROM bookings WHERE id = $1 FOR UPDATE",
        BOOKING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(store_error)?
    .ok_or_else(|| StoreError::booking_not_found(id))?;
    Ok(entity.into())
}

async fn lock_session(
    tx: &mut Transaction<'_, Postgres>,
    session_ref: &str,
) -> Result<PaymentSession, StoreError> {
    let entity = sqlx::query_as::<_, PaymentSessionEntity>(&format!(
        "SELECT {} FROM payment_sessions WHERE session_ref = $1 FOR UPDATE",
        PAYMENT_SESSION_COLUMNS
    ))
    .bind(session_ref)
    .fetch_optional(&mut **tx)
    .await
    .map_err(store_error)?
    .ok_or_else(|| StoreError::session_not_found(session_ref))?;
    Ok(entity.into())
}

async fn store_session_state(
    tx: &mut Transaction<'_, Postgres>,
    session: &PaymentSession,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE payment_sessions
        SET state = $2, settled_at = $3
        WHERE session_ref = $1
        "#,
    )
    .bind(&session.session_ref)
    .bind(session.state.as_str())
    .bind(session.settled_at)
    .execute(&mut **tx)
    .await
    .map_err(store_error)?;
    Ok(())
}

#[async_trait::async_trait]
impl BookingStore for BookingRepository {
    async fn admit(&self, request: NewBooking) -> Result<(Booking, LessonInstance), StoreError> {
        let timer = QueryTimer::new("admit_booking");
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut lesson = lock_lesson(&mut tx, request.lesson_id).await?;

        let duplicate: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE lesson_id = $1 AND requester_id = $2
                  AND reservation_status <> 'cancelled'
            )
            "#,
        )
        .bind(request.lesson_id)
        .bind(request.requester_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;
        if duplicate.0 {
            return Err(StoreError::DuplicateBooking(request.lesson_id));
        }

        lesson.reserve_seats(request.participants)?;
        let updated = sqlx::query(
            r#"
            UPDATE lessons
            SET occupied = occupied + $2,
                status = CASE WHEN occupied + $2 = capacity THEN 'full' ELSE 'available' END,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'cancelled' AND occupied + $2 <= capacity
            "#,
        )
        .bind(lesson.id)
        .bind(request.participants)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        if updated.rows_affected() != 1 {
            return Err(StoreError::InvariantViolation {
                lesson_id: lesson.id,
                detail: "locked lesson row rejected a validated reservation".to_string(),
            });
        }

        let booking = request.into_booking(lesson.price_cents);
        let inserted = sqlx::query(
            r#"
            INSERT INTO bookings (id, lesson_id, requester_id, participants, reservation_status,
                                  payment_status, amount_cents, refunded_cents,
                                  awaiting_payment_confirmation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, false, $8)
            "#,
        )
        .bind(booking.id)
        .bind(booking.lesson_id)
        .bind(booking.requester_id)
        .bind(booking.participants)
        .bind(booking.reservation_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.amount_cents)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(StoreError::DuplicateBooking(booking.lesson_id));
            }
            return Err(store_error(err));
        }

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok((booking, lesson))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let timer = QueryTimer::new("find_booking_by_id");
        let result = self.find_by_id(id).await;
        timer.finish(&result);
        Ok(result.map_err(store_error)?.map(Into::into))
    }

    async fn find_payment_session(
        &self,
        session_ref: &str,
    ) -> Result<Option<PaymentSession>, StoreError> {
        let timer = QueryTimer::new("find_payment_session");
        let result = sqlx::query_as::<_, PaymentSessionEntity>(&format!(
            "SELECT {} FROM payment_sessions WHERE session_ref = $1",
            PAYMENT_SESSION_COLUMNS
        ))
        .bind(session_ref)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result.map_err(store_error)?.map(Into::into))
    }

    async fn list_for_requester(&self, requester_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let timer = QueryTimer::new("list_bookings_for_requester");
        let result = sqlx::query_as::<_, BookingEntity>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE requester_id = $1
            ORDER BY created_at DESC
            "#,
            BOOKING_COLUMNS
        ))
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn list_active_for_lesson(&self, lesson_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let timer = QueryTimer::new("list_active_bookings_for_lesson");
        let result = sqlx::query_as::<_, BookingEntity>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE lesson_id = $1 AND reservation_status <> 'cancelled'
            ORDER BY created_at
            "#,
            BOOKING_COLUMNS
        ))
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn cancel_booking(
        &self,
        id: Uuid,
        actor: CancellationActor,
        refund_percent: i16,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let lesson_id = self
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .map(|b| b.lesson_id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;

        let timer = QueryTimer::new("cancel_booking");
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut lesson = lock_lesson(&mut tx, lesson_id).await?;
        let mut booking = lock_booking(&mut tx, id).await?;

        if booking.is_cancelled() {
            return Ok(None);
        }
        lesson.check_invariants()?;

        booking.apply_cancellation(actor, refund_percent, now);
        sqlx::query(
            r#"
            UPDATE bookings
            SET reservation_status = $2, payment_status = $3, refunded_cents = $4,
                refund_percent = $5, cancelled_by = $6, cancelled_at = $7
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.reservation_status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.refunded_cents)
        .bind(booking.refund_percent)
        .bind(booking.cancelled_by.map(|a| a.as_str()))
        .bind(booking.cancelled_at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        if lesson.release_seats(booking.participants)? {
            store_seats(&mut tx, &lesson).await?;
        }

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok(Some(booking))
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_ref: &str,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        let timer = QueryTimer::new("attach_payment_session");
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let updated = sqlx::query_as::<_, BookingEntity>(&format!(
            r#"
            UPDATE bookings
            SET payment_session_ref = $2, awaiting_payment_confirmation = true
            WHERE id = $1 AND reservation_status <> 'cancelled' AND payment_status = 'unpaid'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(session_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        let Some(entity) = updated else {
            return match self.find_by_id(id).await.map_err(store_error)? {
                Some(_) => Err(StoreError::Conflict(format!(
                    "booking {} is not awaiting payment",
                    id
                ))),
                None => Err(StoreError::booking_not_found(id)),
            };
        };

        sqlx::query(
            r#"
            INSERT INTO payment_sessions (session_ref, booking_id, amount_cents, state, created_at)
            VALUES ($1, $2, $3, 'open', $4)
            "#,
        )
        .bind(session_ref)
        .bind(id)
        .bind(amount_cents)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok(entity.into())
    }

    async fn mark_paid(
        &self,
        session_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentCapture, StoreError> {
        let timer = QueryTimer::new("mark_booking_paid");
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut session = lock_session(&mut tx, session_ref).await?;
        if session.state.is_captured() {
            return Ok(PaymentCapture::AlreadyApplied);
        }
        let mut booking = lock_booking(&mut tx, session.booking_id).await?;

        let capture = PaymentCapture::apply(&mut session, &mut booking, now);
        if matches!(capture, PaymentCapture::Settled { .. }) {
            sqlx::query(
                r#"
                UPDATE bookings
                SET payment_status = $2, payment_session_ref = $3, paid_at = $4,
                    awaiting_payment_confirmation = false, refunded_cents = $5,
                    refund_percent = $6
                WHERE id = $1 AND payment_status = 'unpaid'
                "#,
            )
            .bind(booking.id)
            .bind(booking.payment_status.as_str())
            .bind(&booking.payment_session_ref)
            .bind(booking.paid_at)
            .bind(booking.refunded_cents)
            .bind(booking.refund_percent)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }
        store_session_state(&mut tx, &session).await?;
        if let Some(refund) = capture.refund() {
            insert_refund_row(&mut *tx, refund).await?;
        }

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok(capture)
    }

    async fn close_session(&self, session_ref: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut session = lock_session(&mut tx, session_ref).await?;
        if session.state != PaymentSessionState::Open {
            return Ok(());
        }
        session.state = PaymentSessionState::Expired;
        store_session_state(&mut tx, &session).await?;

        sqlx::query(
            r#"
            UPDATE bookings
            SET awaiting_payment_confirmation = false
            WHERE id = $1 AND payment_session_ref = $2 AND payment_status = 'unpaid'
            "#,
        )
        .bind(session.booking_id)
        .bind(session_ref)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        Ok(())
    }

    async fn set_awaiting_confirmation(&self, id: Uuid, awaiting: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET awaiting_payment_confirmation = $2
            WHERE id = $1 AND payment_status = 'unpaid'
            "#,
        )
        .bind(id)
        .bind(awaiting)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn list_open_sessions(&self, limit: i64) -> Result<Vec<PaymentSession>, StoreError> {
        let timer = QueryTimer::new("list_open_payment_sessions");
        let result = sqlx::query_as::<_, PaymentSessionEntity>(&format!(
            r#"
            SELECT {}
            FROM payment_sessions
            WHERE state = 'open'
            ORDER BY created_at, session_ref
            LIMIT $1
            "#,
            PAYMENT_SESSION_COLUMNS
        ))
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

    async fn list_paid_revenue_lines(&self) -> Result<Vec<RevenueLine>, StoreError> {
        let timer = QueryTimer::new("list_paid_revenue_lines");
        let result = sqlx::query_as::<_, RevenueLineEntity>(
            r#"
            SELECT b.id AS booking_id, l.price_cents AS unit_price_cents, b.participants
            FROM bookings b
            JOIN lessons l ON l.id = b.lesson_id
            WHERE b.payment_status = 'paid'
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn count_active(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) as count
            FROM bookings
            WHERE reservation_status <> 'cancelled'
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(count.0)
    }

    async fn list_active_with_lessons_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(Booking, LessonInstance)>, StoreError> {
        let timer = QueryTimer::new("list_active_bookings_with_lessons");
        let result = sqlx::query_as::<_, BookingWithLessonEntity>(
            r#"
            SELECT b.id, b.lesson_id, b.requester_id, b.participants, b.reservation_status,
                   b.payment_status, b.payment_session_ref, b.amount_cents, b.refunded_cents,
                   b.refund_percent, b.cancelled_by, b.awaiting_payment_confirmation,
                   b.created_at, b.paid_at, b.cancelled_at,
                   l.id AS l_id, l.owner_id AS l_owner_id, l.kind AS l_kind,
                   l.title AS l_title, l.description AS l_description,
                   l.lesson_date AS l_lesson_date, l.start_time AS l_start_time,
                   l.end_time AS l_end_time, l.capacity AS l_capacity,
                   l.occupied AS l_occupied, l.price_cents AS l_price_cents,
                   l.status AS l_status, l.recurrence_group_id AS l_recurrence_group_id,
                   l.created_at AS l_created_at, l.updated_at AS l_updated_at
            FROM bookings b
            JOIN lessons l ON l.id = b.lesson_id
            WHERE b.reservation_status <> 'cancelled'
              AND l.status <> 'cancelled'
              AND l.lesson_date BETWEEN $1 AND $2
            ORDER BY l.lesson_date, l.start_time, b.created_at
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}
