//! In-memory store for development and tests.
//!
//! Each lesson sits behind its own async mutex, so capacity mutations on one
//! lesson are serialized while different lessons proceed in parallel. Lock
//! order is always lesson, then bookings, then payment sessions, then
//! refunds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Booking, CancellationActor, LessonFilter, LessonInstance, PaymentSession,
    PaymentSessionState, PaymentStatus, RefundRecord, RefundRecordStatus, RevenueLine,
};
use crate::services::ports::{
    BookingStore, LessonCancellation, LessonStore, NewBooking, PaymentCapture, RefundStore,
};

type LessonHandle = Arc<Mutex<LessonInstance>>;

/// Process-local implementation of every storage port.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    lessons: RwLock<HashMap<Uuid, LessonHandle>>,
    bookings: Mutex<HashMap<Uuid, Booking>>,
    sessions: Mutex<HashMap<String, PaymentSession>>,
    refunds: Mutex<HashMap<Uuid, RefundRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lesson_handle(&self, id: Uuid) -> Result<LessonHandle, StoreError> {
        self.lessons
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::lesson_not_found(id))
    }

    async fn snapshot_lessons(&self) -> Vec<LessonInstance> {
        let handles: Vec<LessonHandle> = self.lessons.read().await.values().cloned().collect();
        let mut lessons = Vec::with_capacity(handles.len());
        for handle in handles {
            lessons.push(handle.lock().await.clone());
        }
        lessons
    }

    /// Overwrites a lesson's seat counters. Test hook for invariant checks.
    #[doc(hidden)]
    pub async fn corrupt_lesson(&self, id: Uuid, occupied: i32) -> Result<(), StoreError> {
        let handle = self.lesson_handle(id).await?;
        handle.lock().await.occupied = occupied;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LessonStore for InMemoryStore {
    async fn insert_lessons(&self, lessons: &[LessonInstance]) -> Result<(), StoreError> {
        let mut map = self.lessons.write().await;
        if let Some(existing) = lessons.iter().find(|l| map.contains_key(&l.id)) {
            return Err(StoreError::Conflict(format!(
                "lesson {} already exists",
                existing.id
            )));
        }
        for lesson in lessons {
            map.insert(lesson.id, Arc::new(Mutex::new(lesson.clone())));
        }
        Ok(())
    }

    async fn get_lesson(&self, id: Uuid) -> Result<Option<LessonInstance>, StoreError> {
        match self.lesson_handle(id).await {
            Ok(handle) => Ok(Some(handle.lock().await.clone())),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_lessons(&self, filter: &LessonFilter) -> Result<Vec<LessonInstance>, StoreError> {
        let mut lessons: Vec<LessonInstance> = self
            .snapshot_lessons()
            .await
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();
        lessons.sort_by_key(|l| (l.date, l.start_time, l.created_at));
        lessons.truncate(filter.effective_limit() as usize);
        Ok(lessons)
    }

    async fn reserve(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError> {
        let handle = self.lesson_handle(id).await?;
        let mut lesson = handle.lock().await;
        lesson.reserve_seats(count)?;
        Ok(lesson.clone())
    }

    async fn release(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError> {
        let handle = self.lesson_handle(id).await?;
        let mut lesson = handle.lock().await;
        lesson.release_seats(count)?;
        Ok(lesson.clone())
    }

    async fn cancel(&self, id: Uuid) -> Result<LessonCancellation, StoreError> {
        let handle = self.lesson_handle(id).await?;
        let mut lesson = handle.lock().await;
        let newly_cancelled = lesson.mark_cancelled();

        let bookings = self.bookings.lock().await;
        let mut active_bookings: Vec<Booking> = bookings
            .values()
            .filter(|b| b.lesson_id == id && b.holds_seats())
            .cloned()
            .collect();
        active_bookings.sort_by_key(|b| b.created_at);

        Ok(LessonCancellation {
            lesson: lesson.clone(),
            newly_cancelled,
            active_bookings,
        })
    }

    async fn count_bookable(&self, from: NaiveDate) -> Result<i64, StoreError> {
        let count = self
            .snapshot_lessons()
            .await
            .iter()
            .filter(|l| l.date >= from && l.is_bookable())
            .count();
        Ok(count as i64)
    }
}

#[async_trait::async_trait]
impl BookingStore for InMemoryStore {
    async fn admit(&self, booking: NewBooking) -> Result<(Booking, LessonInstance), StoreError> {
        let handle = self.lesson_handle(booking.lesson_id).await?;
        let mut lesson = handle.lock().await;
        let mut bookings = self.bookings.lock().await;

        let duplicate = bookings.values().any(|b| {
            b.lesson_id == booking.lesson_id
                && b.requester_id == booking.requester_id
                && b.holds_seats()
        });
        if duplicate {
            return Err(StoreError::DuplicateBooking(booking.lesson_id));
        }

        lesson.reserve_seats(booking.participants)?;
        let booking = booking.into_booking(lesson.price_cents);
        bookings.insert(booking.id, booking.clone());

        Ok((booking, lesson.clone()))
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.lock().await.get(&id).cloned())
    }

    async fn find_payment_session(
        &self,
        session_ref: &str,
    ) -> Result<Option<PaymentSession>, StoreError> {
        Ok(self.sessions.lock().await.get(session_ref).cloned())
    }

    async fn list_for_requester(&self, requester_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| b.requester_id == requester_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn list_active_for_lesson(&self, lesson_id: Uuid) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| b.lesson_id == lesson_id && b.holds_seats())
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn cancel_booking(
        &self,
        id: Uuid,
        actor: CancellationActor,
        refund_percent: i16,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let lesson_id = self
            .bookings
            .lock()
            .await
            .get(&id)
            .map(|b| b.lesson_id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;

        let handle = self.lesson_handle(lesson_id).await?;
        let mut lesson = handle.lock().await;
        let mut bookings = self.bookings.lock().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;

        if booking.is_cancelled() {
            return Ok(None);
        }
        lesson.check_invariants()?;

        booking.apply_cancellation(actor, refund_percent, now);
        lesson.release_seats(booking.participants)?;
        Ok(Some(booking.clone()))
    }

    async fn attach_payment_session(
        &self,
        id: Uuid,
        session_ref: &str,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        let mut bookings = self.bookings.lock().await;
        let mut sessions = self.sessions.lock().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;

        if booking.is_cancelled() || booking.payment_status != PaymentStatus::Unpaid {
            return Err(StoreError::Conflict(format!(
                "booking {} is not awaiting payment",
                id
            )));
        }
        if sessions.contains_key(session_ref) {
            return Err(StoreError::Conflict(format!(
                "payment session {} already recorded",
                session_ref
            )));
        }

        sessions.insert(
            session_ref.to_string(),
            PaymentSession::open(session_ref.to_string(), id, amount_cents, now),
        );
        booking.payment_session_ref = Some(session_ref.to_string());
        booking.awaiting_payment_confirmation = true;
        Ok(booking.clone())
    }

    async fn mark_paid(
        &self,
        session_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentCapture, StoreError> {
        let mut bookings = self.bookings.lock().await;
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_ref)
            .ok_or_else(|| StoreError::session_not_found(session_ref))?;
        if session.state.is_captured() {
            return Ok(PaymentCapture::AlreadyApplied);
        }
        let booking = bookings
            .get_mut(&session.booking_id)
            .ok_or_else(|| StoreError::booking_not_found(session.booking_id))?;

        let capture = PaymentCapture::apply(session, booking, now);
        if let Some(refund) = capture.refund() {
            self.refunds.lock().await.insert(refund.id, refund.clone());
        }
        Ok(capture)
    }

    async fn close_session(&self, session_ref: &str) -> Result<(), StoreError> {
        let mut bookings = self.bookings.lock().await;
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_ref)
            .ok_or_else(|| StoreError::session_not_found(session_ref))?;
        if session.state != PaymentSessionState::Open {
            return Ok(());
        }
        session.state = PaymentSessionState::Expired;

        if let Some(booking) = bookings.get_mut(&session.booking_id) {
            if booking.payment_status == PaymentStatus::Unpaid
                && booking.payment_session_ref.as_deref() == Some(session_ref)
            {
                booking.awaiting_payment_confirmation = false;
            }
        }
        Ok(())
    }

    async fn set_awaiting_confirmation(&self, id: Uuid, awaiting: bool) -> Result<(), StoreError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::booking_not_found(id))?;
        if booking.payment_status == PaymentStatus::Unpaid {
            booking.awaiting_payment_confirmation = awaiting;
        }
        Ok(())
    }

    async fn list_open_sessions(&self, limit: i64) -> Result<Vec<PaymentSession>, StoreError> {
        let mut sessions: Vec<PaymentSession> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| s.state == PaymentSessionState::Open)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_ref.cmp(&b.session_ref))
        });
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn list_paid_revenue_lines(&self) -> Result<Vec<RevenueLine>, StoreError> {
        let paid: Vec<Booking> = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| b.payment_status == PaymentStatus::Paid)
            .cloned()
            .collect();

        let mut lines = Vec::with_capacity(paid.len());
        for booking in paid {
            let lesson = self.lesson_handle(booking.lesson_id).await?;
            let unit_price_cents = lesson.lock().await.price_cents;
            lines.push(RevenueLine {
                booking_id: booking.id,
                unit_price_cents,
                participants: booking.participants,
            });
        }
        Ok(lines)
    }

    async fn count_active(&self) -> Result<i64, StoreError> {
        let count = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| b.holds_seats())
            .count();
        Ok(count as i64)
    }

    async fn list_active_with_lessons_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(Booking, LessonInstance)>, StoreError> {
        let lessons: HashMap<Uuid, LessonInstance> = self
            .snapshot_lessons()
            .await
            .into_iter()
            .filter(|l| !l.is_cancelled() && l.date >= from && l.date <= to)
            .map(|l| (l.id, l))
            .collect();

        let mut pairs: Vec<(Booking, LessonInstance)> = self
            .bookings
            .lock()
            .await
            .values()
            .filter(|b| b.holds_seats())
            .filter_map(|b| lessons.get(&b.lesson_id).map(|l| (b.clone(), l.clone())))
            .collect();
        pairs.sort_by_key(|(b, l)| (l.date, l.start_time, b.created_at));
        Ok(pairs)
    }
}

#[async_trait::async_trait]
impl RefundStore for InMemoryStore {
    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        self.refunds.lock().await.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn update_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        let mut refunds = self.refunds.lock().await;
        match refunds.get_mut(&refund.id) {
            Some(existing) => {
                *existing = refund.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "refund",
                id: refund.id.to_string(),
            }),
        }
    }

    async fn list_pending_refunds(&self, limit: i64) -> Result<Vec<RefundRecord>, StoreError> {
        let mut refunds: Vec<RefundRecord> = self
            .refunds
            .lock()
            .await
            .values()
            .filter(|r| r.status == RefundRecordStatus::Pending)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        refunds.truncate(limit.max(0) as usize);
        Ok(refunds)
    }

    async fn list_refunds_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<RefundRecord>, StoreError> {
        let mut refunds: Vec<RefundRecord> = self
            .refunds
            .lock()
            .await
            .values()
            .filter(|r| r.booking_id == booking_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }
}
