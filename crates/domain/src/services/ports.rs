//! Storage and payment provider ports used by the booking engine.
//!
//! Both the PostgreSQL repositories and the in-memory store implement the
//! storage traits. Every lesson capacity mutation is a per-lesson atomic
//! read-modify-write inside the implementation.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Booking, CancellationActor, CheckoutRequest, CheckoutSession, LessonFilter, LessonInstance,
    PaymentSession, PaymentSessionState, RefundRecord, RevenueLine, SessionStatus,
};

/// A booking about to be admitted. The amount is priced from the lesson
/// inside the admission critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub lesson_id: Uuid,
    pub requester_id: Uuid,
    pub participants: i32,
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn into_booking(self, unit_price_cents: i64) -> Booking {
        Booking::new(
            self.lesson_id,
            self.requester_id,
            self.participants,
            unit_price_cents,
            self.created_at,
        )
    }
}

/// Result of cancelling a lesson instance.
#[derive(Debug, Clone)]
pub struct LessonCancellation {
    pub lesson: LessonInstance,
    /// False when the lesson was already cancelled.
    pub newly_cancelled: bool,
    /// Bookings still holding seats at the time of cancellation.
    pub active_bookings: Vec<Booking>,
}

/// Result of applying a provider capture to the session ledger.
///
/// Any refund the capture calls for is recorded in the same write and
/// handed back for issuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCapture {
    /// The session settled its booking. A booking cancelled before the
    /// money arrived is stored as refunded, never as paid.
    Settled {
        booking: Booking,
        refund: Option<RefundRecord>,
    },
    /// The booking was already settled by another session.
    Duplicate {
        booking: Booking,
        refund: Option<RefundRecord>,
    },
    /// A capture on this session was applied earlier.
    AlreadyApplied,
}

impl PaymentCapture {
    /// Applies a capture on `session` to its booking, both held under the
    /// caller's lock.
    pub fn apply(session: &mut PaymentSession, booking: &mut Booking, now: DateTime<Utc>) -> Self {
        if session.state.is_captured() {
            return PaymentCapture::AlreadyApplied;
        }
        session.settled_at = Some(now);

        if booking.apply_payment(&session.session_ref, now) {
            session.state = PaymentSessionState::Paid;
            let refund = (booking.refunded_cents > 0).then(|| {
                RefundRecord::pending(
                    booking.id,
                    session.session_ref.clone(),
                    100,
                    booking.refunded_cents,
                    now,
                )
            });
            PaymentCapture::Settled {
                booking: booking.clone(),
                refund,
            }
        } else {
            session.state = PaymentSessionState::Duplicate;
            let refund = (session.amount_cents > 0).then(|| {
                RefundRecord::pending(
                    booking.id,
                    session.session_ref.clone(),
                    100,
                    session.amount_cents,
                    now,
                )
            });
            PaymentCapture::Duplicate {
                booking: booking.clone(),
                refund,
            }
        }
    }

    /// Refund recorded together with the capture.
    pub fn refund(&self) -> Option<&RefundRecord> {
        match self {
            PaymentCapture::Settled { refund, .. } | PaymentCapture::Duplicate { refund, .. } => {
                refund.as_ref()
            }
            PaymentCapture::AlreadyApplied => None,
        }
    }
}

/// Lesson instance storage; sole authority over capacity and status.
#[async_trait::async_trait]
pub trait LessonStore: Send + Sync {
    /// Persists freshly expanded lesson instances.
    async fn insert_lessons(&self, lessons: &[LessonInstance]) -> Result<(), StoreError>;

    async fn get_lesson(&self, id: Uuid) -> Result<Option<LessonInstance>, StoreError>;

    /// Lessons matching the filter, ordered by date then start time.
    async fn list_lessons(&self, filter: &LessonFilter) -> Result<Vec<LessonInstance>, StoreError>;

    /// Atomically takes `count` seats.
    async fn reserve(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError>;

    /// Gives back `count` seats, floored at zero. No-op on cancelled lessons.
    async fn release(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError>;

    /// Marks the lesson cancelled. Idempotent.
    async fn cancel(&self, id: Uuid) -> Result<LessonCancellation, StoreError>;

    /// Lessons on or after `from` that still accept bookings.
    async fn count_bookable(&self, from: NaiveDate) -> Result<i64, StoreError>;
}

/// Booking storage.
#[async_trait::async_trait]
pub trait BookingStore: Send + Sync {
    /// Reserves seats on the lesson and records the booking in one
    /// per-lesson critical section.
    ///
    /// Fails with `DuplicateBooking` if the requester already holds seats on
    /// the lesson; nothing is committed on any failure.
    async fn admit(&self, booking: NewBooking) -> Result<(Booking, LessonInstance), StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn find_payment_session(
        &self,
        session_ref: &str,
    ) -> Result<Option<PaymentSession>, StoreError>;

    /// Requester's bookings, newest first.
    async fn list_for_requester(&self, requester_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    /// Bookings on a lesson that still hold seats.
    async fn list_active_for_lesson(&self, lesson_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    /// Marks the booking cancelled with the given refund percentage and
    /// releases its seats, atomically.
    ///
    /// Returns `None` when the booking was already cancelled.
    async fn cancel_booking(
        &self,
        id: Uuid,
        actor: CancellationActor,
        refund_percent: i16,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError>;

    /// Records a new open checkout session for an unpaid, active booking,
    /// makes it the booking's current session and flags the booking as
    /// awaiting confirmation.
    ///
    /// Sessions opened earlier for the booking stay in the ledger.
    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_ref: &str,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError>;

    /// Applies a capture on `session_ref` in one critical section over the
    /// session and its booking.
    ///
    /// The first capture for an unpaid booking settles it. A capture on a
    /// booking already settled by another session is a duplicate and gets a
    /// full refund of that session's amount. Fails with `NotFound` for an
    /// unknown session.
    async fn mark_paid(
        &self,
        session_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentCapture, StoreError>;

    /// Marks an open session expired. Clears the booking's awaiting flag
    /// when this was its current session and the booking is still unpaid.
    async fn close_session(&self, session_ref: &str) -> Result<(), StoreError>;

    async fn set_awaiting_confirmation(&self, id: Uuid, awaiting: bool) -> Result<(), StoreError>;

    /// Open sessions, current or superseded, oldest first.
    async fn list_open_sessions(&self, limit: i64) -> Result<Vec<PaymentSession>, StoreError>;

    /// Unit price and participants of every paid booking.
    async fn list_paid_revenue_lines(&self) -> Result<Vec<RevenueLine>, StoreError>;

    async fn count_active(&self) -> Result<i64, StoreError>;

    /// Active bookings on non-cancelled lessons dated within `[from, to]`.
    async fn list_active_with_lessons_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(Booking, LessonInstance)>, StoreError>;
}

/// Refund follow-up storage.
#[async_trait::async_trait]
pub trait RefundStore: Send + Sync {
    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError>;

    async fn update_refund(&self, refund: &RefundRecord) -> Result<(), StoreError>;

    /// Pending refunds, oldest first.
    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<RefundRecord>, StoreError>;

    async fn list_refunds_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<RefundRecord>, StoreError>;
}

/// Errors reported by a payment provider client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport failure, timeout or 5xx. Worth retrying.
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("payment provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

/// External payment provider contract.
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Opens a checkout session for a booking.
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Current status of a session.
    async fn get_session_status(&self, session_ref: &str) -> Result<SessionStatus, ProviderError>;

    /// Refunds `percent` of the session's payment.
    async fn refund(
        &self,
        session_ref: &str,
        percent: i16,
        amount_cents: i64,
    ) -> Result<(), ProviderError>;
}
