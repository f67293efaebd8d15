//! Booking entity (database row mapping).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use domain::models::{
    Booking, CancellationActor, LessonInstance, PaymentStatus, ReservationStatus,
};
use sqlx::FromRow;
use uuid::Uuid;

use super::lesson::LessonEntity;

/// Column list shared by every booking query.
pub const BOOKING_COLUMNS: &str = "id, lesson_id, requester_id, participants, \
     reservation_status, payment_status, payment_session_ref, amount_cents, refunded_cents, \
     refund_percent, cancelled_by, awaiting_payment_confirmation, created_at, paid_at, \
     cancelled_at";

/// Database row mapping for the bookings table.
#[derive(Debug, Clone, FromRow)]
pub struct BookingEntity {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub requester_id: Uuid,
    pub participants: i32,
    pub reservation_status: String,
    pub payment_status: String,
    pub payment_session_ref: Option<String>,
    pub amount_cents: i64,
    pub refunded_cents: i64,
    pub refund_percent: Option<i16>,
    pub cancelled_by: Option<String>,
    pub awaiting_payment_confirmation: bool,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<BookingEntity> for Booking {
    fn from(entity: BookingEntity) -> Self {
        Self {
            id: entity.id,
            lesson_id: entity.lesson_id,
            requester_id: entity.requester_id,
            participants: entity.participants,
            reservation_status: entity
                .reservation_status
                .parse::<ReservationStatus>()
                .unwrap_or(ReservationStatus::Confirmed),
            payment_status: entity
                .payment_status
                .parse::<PaymentStatus>()
                .unwrap_or(PaymentStatus::Unpaid),
            payment_session_ref: entity.payment_session_ref,
            amount_cents: entity.amount_cents,
            refunded_cents: entity.refunded_cents,
            refund_percent: entity.refund_percent,
            cancelled_by: entity
                .cancelled_by
                .and_then(|actor| actor.parse::<CancellationActor>().ok()),
            awaiting_payment_confirmation: entity.awaiting_payment_confirmation,
            created_at: entity.created_at,
            paid_at: entity.paid_at,
            cancelled_at: entity.cancelled_at,
        }
    }
}

/// Paid booking joined with its lesson's unit price.
#[derive(Debug, Clone, FromRow)]
pub struct RevenueLineEntity {
    pub booking_id: Uuid,
    pub unit_price_cents: i64,
    pub participants: i32,
}

impl From<RevenueLineEntity> for domain::models::RevenueLine {
    fn from(entity: RevenueLineEntity) -> Self {
        Self {
            booking_id: entity.booking_id,
            unit_price_cents: entity.unit_price_cents,
            participants: entity.participants,
        }
    }
}

/// Booking row joined with its lesson, lesson columns prefixed `l_`.
#[derive(Debug, Clone, FromRow)]
pub struct BookingWithLessonEntity {
    #[sqlx(flatten)]
    pub booking: BookingEntity,
    pub l_id: Uuid,
    pub l_owner_id: Uuid,
    pub l_kind: String,
    pub l_title: String,
    pub l_description: String,
    pub l_lesson_date: NaiveDate,
    pub l_start_time: NaiveTime,
    pub l_end_time: NaiveTime,
    pub l_capacity: i32,
    pub l_occupied: i32,
    pub l_price_cents: i64,
    pub l_status: String,
    pub l_recurrence_group_id: Option<Uuid>,
    pub l_created_at: DateTime<Utc>,
    pub l_updated_at: DateTime<Utc>,
}

impl From<BookingWithLessonEntity> for (Booking, LessonInstance) {
    fn from(entity: BookingWithLessonEntity) -> Self {
        let lesson = LessonEntity {
            id: entity.l_id,
            owner_id: entity.l_owner_id,
            kind: entity.l_kind,
            title: entity.l_title,
            description: entity.l_description,
            lesson_date: entity.l_lesson_date,
            start_time: entity.l_start_time,
            end_time: entity.l_end_time,
            capacity: entity.l_capacity,
            occupied: entity.l_occupied,
            price_cents: entity.l_price_cents,
            status: entity.l_status,
            recurrence_group_id: entity.l_recurrence_group_id,
            created_at: entity.l_created_at,
            updated_at: entity.l_updated_at,
        };
        (entity.booking.into(), lesson.into())
    }
}
