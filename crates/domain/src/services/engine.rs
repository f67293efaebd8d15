//! Booking engine.
//!
//! Entry point for every lesson, booking and payment operation. Capacity
//! mutations go through the storage ports; payment provider calls are
//! bounded by timeouts and attempt counts and never happen while a lesson
//! is locked.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use metrics::counter;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BookingError, StoreError};
use crate::models::{
    Booking, CancellationActor, CheckoutRequest, CheckoutSession, LessonDraft, LessonFilter,
    LessonInstance, LessonTemplate, PaymentSession, PaymentStatus, PlatformStats, Principal,
    ProviderNotification, ReconciliationOutcome, RefundOutcome, RefundRecord,
    RefundRecordStatus, RevenueStats, SessionStatus,
};
use crate::services::payment::PollPolicy;
use crate::services::ports::{
    BookingStore, LessonStore, NewBooking, PaymentCapture, PaymentProvider, ProviderError,
    RefundStore,
};
use crate::services::recurrence::expand_template;
use crate::services::refund_policy::refund_tier_at;
use crate::services::revenue::{compute_revenue_stats, DEFAULT_COMMISSION_RATE_BPS};

/// Tunables of the booking engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_occurrences_per_template: usize,
    pub commission_rate_bps: u32,
    /// Offset in which lesson dates and times are read.
    pub schedule_offset: FixedOffset,
    pub currency: String,
    /// Polling bounds for background reconciliation.
    pub poll_policy: PollPolicy,
    /// Attempts before a refund is marked failed.
    pub refund_max_attempts: i32,
    pub webhook_secret: Option<String>,
    /// Appended to the caller's origin to build provider redirect URLs.
    pub success_path: String,
    pub cancel_path: String,
    pub reminder_window: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_occurrences_per_template: 52,
            commission_rate_bps: DEFAULT_COMMISSION_RATE_BPS,
            schedule_offset: Utc.fix(),
            currency: "eur".to_string(),
            poll_policy: PollPolicy::default(),
            refund_max_attempts: 5,
            webhook_secret: None,
            success_path: "/payment-success?session_id={CHECKOUT_SESSION_ID}".to_string(),
            cancel_path: "/booking-cancelled".to_string(),
            reminder_window: Duration::hours(24),
        }
    }
}

/// Result of cancelling a lesson instance.
#[derive(Debug, Clone, Serialize)]
pub struct LessonCancellationReport {
    pub lesson: LessonInstance,
    pub refunds: Vec<RefundOutcome>,
}

/// Totals of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub checked: u32,
    pub paid: u32,
    pub already_paid: u32,
    /// Captures on sessions whose booking was already settled.
    pub duplicate: u32,
    pub expired: u32,
    pub pending: u32,
    pub failed: u32,
}

/// Totals of one refund retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefundRetrySummary {
    pub attempted: u32,
    pub issued: u32,
    pub failed: u32,
    pub still_pending: u32,
}

/// Lesson scheduling and booking consistency engine.
pub struct BookingEngine {
    lessons: Arc<dyn LessonStore>,
    bookings: Arc<dyn BookingStore>,
    refunds: Arc<dyn RefundStore>,
    payments: Arc<dyn PaymentProvider>,
    settings: EngineSettings,
    /// Lessons on which an invariant violation was detected.
    quarantined: RwLock<HashSet<Uuid>>,
}

impl std::fmt::Debug for BookingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BookingEngine {
    pub fn new(
        lessons: Arc<dyn LessonStore>,
        bookings: Arc<dyn BookingStore>,
        refunds: Arc<dyn RefundStore>,
        payments: Arc<dyn PaymentProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            lessons,
            bookings,
            refunds,
            payments,
            settings,
            quarantined: RwLock::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------

    /// Expands a template without persisting anything.
    pub fn expand_template(
        &self,
        template: &LessonTemplate,
    ) -> Result<Vec<LessonDraft>, BookingError> {
        expand_template(template, self.settings.max_occurrences_per_template)
            .map_err(|e| BookingError::Validation(e.to_string()))
    }

    /// Expands a template and persists every resulting instance.
    pub async fn create_lesson_instances(
        &self,
        template: &LessonTemplate,
    ) -> Result<Vec<LessonInstance>, BookingError> {
        let drafts = self.expand_template(template)?;
        let now = Utc::now();
        let lessons: Vec<LessonInstance> = drafts
            .into_iter()
            .map(|draft| LessonInstance::from_draft(draft, now))
            .collect();

        self.lessons
            .insert_lessons(&lessons)
            .await
            .map_err(|e| self.store_failure(e))?;

        counter!("lessons_created_total").increment(lessons.len() as u64);
        tracing::info!(
            owner_id = %template.owner_id,
            count = lessons.len(),
            recurrence_group_id = ?lessons.first().and_then(|l| l.recurrence_group_id),
            "Lesson instances created"
        );

        Ok(lessons)
    }

    pub async fn get_lesson(&self, id: Uuid) -> Result<LessonInstance, BookingError> {
        self.lessons
            .get_lesson(id)
            .await
            .map_err(|e| self.store_failure(e))?
            .ok_or_else(|| StoreError::lesson_not_found(id).into())
    }

    pub async fn list_lessons(
        &self,
        filter: &LessonFilter,
    ) -> Result<Vec<LessonInstance>, BookingError> {
        self.lessons
            .list_lessons(filter)
            .await
            .map_err(|e| self.store_failure(e))
    }

    /// An owner's lessons with the bookings still holding seats on each.
    pub async fn list_owner_lessons(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<(LessonInstance, Vec<Booking>)>, BookingError> {
        let filter = LessonFilter {
            instructor_id: Some(owner_id),
            limit: Some(LessonFilter::MAX_LIMIT),
            ..Default::default()
        };
        let lessons = self.list_lessons(&filter).await?;

        let mut result = Vec::with_capacity(lessons.len());
        for lesson in lessons {
            let bookings = self
                .bookings
                .list_active_for_lesson(lesson.id)
                .await
                .map_err(|e| self.store_failure(e))?;
            result.push((lesson, bookings));
        }
        Ok(result)
    }

    /// Cancels a lesson instance and refunds every booking on it in full.
    ///
    /// Idempotent: cancelling a cancelled lesson reports no refunds.
    pub async fn cancel_lesson_instance(
        &self,
        lesson_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LessonCancellationReport, BookingError> {
        self.ensure_not_quarantined(lesson_id)?;

        let cancellation = self
            .lessons
            .cancel(lesson_id)
            .await
            .map_err(|e| self.store_failure(e))?;

        if cancellation.newly_cancelled {
            tracing::info!(
                lesson_id = %lesson_id,
                active_bookings = cancellation.active_bookings.len(),
                "Lesson instance cancelled"
            );
        }

        let starts_at = cancellation.lesson.starts_at(self.settings.schedule_offset);
        let mut refunds = Vec::with_capacity(cancellation.active_bookings.len());
        for booking in &cancellation.active_bookings {
            let tier = refund_tier_at(CancellationActor::Instructor, starts_at, now);
            let outcome = self
                .apply_cancellation(booking, CancellationActor::Instructor, tier.percent(), now)
                .await?;
            refunds.push(outcome);
        }

        Ok(LessonCancellationReport {
            lesson: cancellation.lesson,
            refunds,
        })
    }

    /// Cancels a lesson on behalf of `principal`, who must own it or be an admin.
    pub async fn cancel_lesson_as(
        &self,
        lesson_id: Uuid,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<LessonCancellationReport, BookingError> {
        let lesson = self.get_lesson(lesson_id).await?;
        if lesson.owner_id != principal.user_id && !principal.is_admin() {
            return Err(BookingError::Forbidden(
                "only the lesson owner can cancel this lesson".to_string(),
            ));
        }
        self.cancel_lesson_instance(lesson_id, now).await
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    /// Admits a booking against the lesson's capacity.
    ///
    /// Capacity exhaustion is a normal outcome and is never retried.
    pub async fn create_booking(
        &self,
        lesson_id: Uuid,
        requester_id: Uuid,
        participants: i32,
    ) -> Result<Booking, BookingError> {
        if participants < 1 {
            record_booking_rejected("validation");
            return Err(BookingError::Validation(
                "participant count must be at least 1".to_string(),
            ));
        }
        self.ensure_not_quarantined(lesson_id)?;

        let request = NewBooking {
            lesson_id,
            requester_id,
            participants,
            created_at: Utc::now(),
        };

        match self.bookings.admit(request).await {
            Ok((booking, lesson)) => {
                counter!("bookings_created_total").increment(1);
                tracing::info!(
                    booking_id = %booking.id,
                    lesson_id = %lesson_id,
                    requester_id = %requester_id,
                    participants,
                    occupied = lesson.occupied,
                    capacity = lesson.capacity,
                    "Booking admitted"
                );
                Ok(booking)
            }
            Err(err) => {
                record_booking_rejected(rejection_reason(&err));
                tracing::info!(
                    lesson_id = %lesson_id,
                    requester_id = %requester_id,
                    participants,
                    reason = %err,
                    "Booking rejected"
                );
                Err(self.store_failure(err))
            }
        }
    }

    pub async fn get_booking(&self, id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(id)
            .await
            .map_err(|e| self.store_failure(e))?
            .ok_or_else(|| StoreError::booking_not_found(id).into())
    }

    /// A booking visible to its requester, the lesson owner or an admin.
    pub async fn get_booking_for(
        &self,
        id: Uuid,
        principal: &Principal,
    ) -> Result<Booking, BookingError> {
        let booking = self.get_booking(id).await?;
        if booking.requester_id == principal.user_id || principal.is_admin() {
            return Ok(booking);
        }
        let lesson = self.get_lesson(booking.lesson_id).await?;
        if lesson.owner_id == principal.user_id {
            return Ok(booking);
        }
        Err(BookingError::Forbidden(
            "booking belongs to another client".to_string(),
        ))
    }

    pub async fn list_bookings_for_requester(
        &self,
        requester_id: Uuid,
    ) -> Result<Vec<Booking>, BookingError> {
        self.bookings
            .list_for_requester(requester_id)
            .await
            .map_err(|e| self.store_failure(e))
    }

    /// Cancels a booking as of now.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor: CancellationActor,
    ) -> Result<RefundOutcome, BookingError> {
        self.cancel_booking_at(booking_id, actor, Utc::now()).await
    }

    /// Cancels a booking, computing the refund tier as of `now`.
    ///
    /// Cancelling an already cancelled booking returns the recorded outcome.
    pub async fn cancel_booking_at(
        &self,
        booking_id: Uuid,
        actor: CancellationActor,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, BookingError> {
        let booking = self.get_booking(booking_id).await?;
        if let Some(outcome) = booking.refund_outcome() {
            tracing::debug!(booking_id = %booking_id, "Booking already cancelled");
            return Ok(outcome);
        }
        self.ensure_not_quarantined(booking.lesson_id)?;

        let lesson = self.get_lesson(booking.lesson_id).await?;
        let starts_at = lesson.starts_at(self.settings.schedule_offset);
        let tier = refund_tier_at(actor, starts_at, now);

        self.apply_cancellation(&booking, actor, tier.percent(), now)
            .await
    }

    /// Cancels a booking on behalf of `principal`, deriving the actor.
    ///
    /// The requester cancels as client, the lesson owner as instructor and
    /// an admin as the platform.
    pub async fn cancel_booking_as(
        &self,
        booking_id: Uuid,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, BookingError> {
        let booking = self.get_booking(booking_id).await?;
        let actor = if booking.requester_id == principal.user_id {
            CancellationActor::Client
        } else if principal.is_admin() {
            CancellationActor::System
        } else {
            let lesson = self.get_lesson(booking.lesson_id).await?;
            if lesson.owner_id != principal.user_id {
                return Err(BookingError::Forbidden(
                    "booking belongs to another client".to_string(),
                ));
            }
            CancellationActor::Instructor
        };
        self.cancel_booking_at(booking_id, actor, now).await
    }

    async fn apply_cancellation(
        &self,
        booking: &Booking,
        actor: CancellationActor,
        refund_percent: i16,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, BookingError> {
        let cancelled = self
            .bookings
            .cancel_booking(booking.id, actor, refund_percent, now)
            .await
            .map_err(|e| self.store_failure(e))?;

        let cancelled = match cancelled {
            Some(cancelled) => cancelled,
            None => {
                // A concurrent cancellation won; report what it recorded.
                let current = self.get_booking(booking.id).await?;
                return recorded_outcome(&current);
            }
        };

        counter!("bookings_cancelled_total", "actor" => actor.as_str()).increment(1);
        tracing::info!(
            booking_id = %cancelled.id,
            lesson_id = %cancelled.lesson_id,
            actor = %actor,
            refund_percent,
            payment_status = %cancelled.payment_status,
            "Booking cancelled"
        );

        if cancelled.refunded_cents > 0 {
            self.schedule_refund(&cancelled, refund_percent, now).await;
        }

        recorded_outcome(&cancelled)
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// Opens a provider checkout session for the requester's booking.
    pub async fn start_checkout(
        &self,
        booking_id: Uuid,
        requester_id: Uuid,
        origin_url: &str,
    ) -> Result<CheckoutSession, BookingError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.requester_id != requester_id {
            return Err(BookingError::Forbidden(
                "only the client who booked can pay".to_string(),
            ));
        }
        if booking.is_cancelled() {
            return Err(BookingError::AlreadyCancelled(format!("booking {}", booking_id)));
        }
        if booking.payment_status != PaymentStatus::Unpaid {
            return Err(BookingError::Validation(format!(
                "booking {} is already paid",
                booking_id
            )));
        }

        let lesson = self.get_lesson(booking.lesson_id).await?;
        let origin = origin_url.trim_end_matches('/');
        let request = CheckoutRequest {
            booking_id,
            amount_cents: lesson.price_cents * i64::from(booking.participants),
            currency: self.settings.currency.clone(),
            description: format!("{} - {}", lesson.title, lesson.date),
            success_url: format!("{}{}", origin, self.settings.success_path),
            cancel_url: format!("{}{}", origin, self.settings.cancel_path),
        };

        let session = self
            .call_provider("create_session", || self.payments.create_session(&request))
            .await
            .map_err(|e| BookingError::ExternalProviderUnavailable(e.to_string()))?;

        self.bookings
            .attach_payment_session(
                booking_id,
                &session.session_ref,
                request.amount_cents,
                Utc::now(),
            )
            .await
            .map_err(|e| self.store_failure(e))?;

        tracing::info!(
            booking_id = %booking_id,
            session_ref = %session.session_ref,
            amount_cents = request.amount_cents,
            "Checkout session started"
        );

        Ok(session)
    }

    /// Reconciles a session with the configured polling bounds.
    pub async fn reconcile_payment(
        &self,
        session_ref: &str,
    ) -> Result<ReconciliationOutcome, BookingError> {
        let policy = self.settings.poll_policy;
        self.reconcile_payment_with(session_ref, &policy).await
    }

    /// Polls the provider until a terminal status or the attempt budget is
    /// spent, then applies the result at most once.
    ///
    /// Exhausting the budget is not an error: the booking stays flagged as
    /// awaiting confirmation and `PendingPayment` is returned.
    ///
    /// Any session ever opened for a booking can be reconciled, including
    /// one superseded by a later checkout.
    pub async fn reconcile_payment_with(
        &self,
        session_ref: &str,
        policy: &PollPolicy,
    ) -> Result<ReconciliationOutcome, BookingError> {
        let session = self.find_payment_session(session_ref).await?;
        if session.state.is_captured() {
            record_reconciliation(ReconciliationOutcome::AlreadyPaid);
            return Ok(ReconciliationOutcome::AlreadyPaid);
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut failures = 0u32;

        for attempt in 1..=max_attempts {
            let polled = match tokio::time::timeout(
                policy.request_timeout,
                self.payments.get_session_status(session_ref),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Unavailable(
                    "session status query timed out".to_string(),
                )),
            };

            match polled {
                Ok(status) if status.is_terminal() => {
                    return self.apply_session_status(&session, status).await;
                }
                Ok(_) => {
                    failures = 0;
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.interval).await;
                    }
                }
                Err(ProviderError::Rejected(msg)) => {
                    tracing::warn!(
                        session_ref = %session_ref,
                        error = %msg,
                        "Payment provider rejected status query"
                    );
                    return Err(BookingError::ExternalProviderUnavailable(msg));
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        session_ref = %session_ref,
                        attempt,
                        error = %err,
                        "Payment status query failed"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.backoff(failures)).await;
                    }
                }
            }
        }

        self.bookings
            .set_awaiting_confirmation(session.booking_id, true)
            .await
            .map_err(|e| self.store_failure(e))?;

        let outcome = ReconciliationOutcome::PendingPayment {
            attempts: max_attempts,
        };
        record_reconciliation(outcome);
        tracing::info!(
            booking_id = %session.booking_id,
            session_ref = %session_ref,
            attempts = max_attempts,
            "Payment still pending after polling"
        );
        Ok(outcome)
    }

    /// Single status query on behalf of the paying client, as issued when
    /// the client returns from the checkout page.
    ///
    /// Returns the outcome along with the booking as stored afterwards.
    pub async fn check_payment_status(
        &self,
        session_ref: &str,
        principal: &Principal,
    ) -> Result<(ReconciliationOutcome, Booking), BookingError> {
        let session = self.find_payment_session(session_ref).await?;
        let booking = self.get_booking(session.booking_id).await?;
        if booking.requester_id != principal.user_id && !principal.is_admin() {
            return Err(BookingError::Forbidden(
                "payment session belongs to another client".to_string(),
            ));
        }

        let policy = PollPolicy::single(self.settings.poll_policy.request_timeout);
        let outcome = self.reconcile_payment_with(session_ref, &policy).await?;
        let booking = self.get_booking(booking.id).await?;
        Ok((outcome, booking))
    }

    /// Verifies and applies a payment provider notification.
    ///
    /// The signature is a hex HMAC-SHA256 of the raw body with the webhook
    /// secret.
    pub async fn handle_provider_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ReconciliationOutcome, BookingError> {
        let secret = self.settings.webhook_secret.as_deref().ok_or_else(|| {
            BookingError::Validation("webhook secret is not configured".to_string())
        })?;

        if !shared::crypto::verify_hmac_sha256(secret, payload, signature) {
            tracing::warn!("Rejected payment notification with invalid signature");
            return Err(BookingError::Validation(
                "invalid notification signature".to_string(),
            ));
        }

        let notification: ProviderNotification = serde_json::from_slice(payload)
            .map_err(|e| BookingError::Validation(format!("malformed notification: {}", e)))?;

        let session = self.find_payment_session(&notification.session_ref).await?;
        self.apply_session_status(&session, notification.session)
            .await
    }

    async fn apply_session_status(
        &self,
        session: &PaymentSession,
        status: SessionStatus,
    ) -> Result<ReconciliationOutcome, BookingError> {
        let outcome = if status.is_paid() {
            self.apply_paid(&session.session_ref).await?
        } else if status.is_terminal() {
            self.bookings
                .close_session(&session.session_ref)
                .await
                .map_err(|e| self.store_failure(e))?;
            tracing::info!(
                booking_id = %session.booking_id,
                session_ref = %session.session_ref,
                "Payment session ended unpaid, reservation kept"
            );
            ReconciliationOutcome::Expired
        } else {
            ReconciliationOutcome::Unpaid
        };

        record_reconciliation(outcome);
        Ok(outcome)
    }

    /// Applies a capture on `session_ref` and issues any refund the store
    /// recorded alongside it.
    async fn apply_paid(&self, session_ref: &str) -> Result<ReconciliationOutcome, BookingError> {
        let capture = self
            .bookings
            .mark_paid(session_ref, Utc::now())
            .await
            .map_err(|e| self.store_failure(e))?;

        let (outcome, refund) = match capture {
            PaymentCapture::AlreadyApplied => return Ok(ReconciliationOutcome::AlreadyPaid),
            PaymentCapture::Settled { booking, refund } => {
                tracing::info!(
                    booking_id = %booking.id,
                    session_ref = %session_ref,
                    amount_cents = booking.amount_cents,
                    payment_status = %booking.payment_status,
                    "Booking paid"
                );
                if refund.is_some() {
                    tracing::warn!(
                        booking_id = %booking.id,
                        "Payment arrived after cancellation, refunding in full"
                    );
                }
                (ReconciliationOutcome::Paid, refund)
            }
            PaymentCapture::Duplicate { booking, refund } => {
                tracing::warn!(
                    booking_id = %booking.id,
                    session_ref = %session_ref,
                    settled_by = ?booking.payment_session_ref,
                    "Second capture on a settled booking, refunding in full"
                );
                (ReconciliationOutcome::DuplicateRefunded, refund)
            }
        };

        if let Some(refund) = refund {
            self.issue_refund(refund).await;
        }
        Ok(outcome)
    }

    /// Reconciles a batch of open payment sessions, oldest first.
    ///
    /// Sessions superseded by a later checkout are polled too, so a payment
    /// made on an abandoned session is still applied or refunded.
    pub async fn reconcile_pending(
        &self,
        batch_size: i64,
    ) -> Result<ReconciliationSummary, BookingError> {
        let open = self
            .bookings
            .list_open_sessions(batch_size)
            .await
            .map_err(|e| self.store_failure(e))?;

        let mut summary = ReconciliationSummary::default();
        for session in open {
            summary.checked += 1;

            match self.reconcile_payment(&session.session_ref).await {
                Ok(ReconciliationOutcome::Paid) => summary.paid += 1,
                Ok(ReconciliationOutcome::AlreadyPaid) => summary.already_paid += 1,
                Ok(ReconciliationOutcome::DuplicateRefunded) => summary.duplicate += 1,
                Ok(ReconciliationOutcome::Expired) => summary.expired += 1,
                Ok(ReconciliationOutcome::Unpaid)
                | Ok(ReconciliationOutcome::PendingPayment { .. }) => summary.pending += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(
                        booking_id = %session.booking_id,
                        session_ref = %session.session_ref,
                        error = %err,
                        "Reconciliation failed"
                    );
                }
            }
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Refunds
    // ------------------------------------------------------------------

    /// Records a refund and tries to issue it once.
    ///
    /// The local cancellation is already durable; failures here only leave
    /// the refund pending for the retry job.
    async fn schedule_refund(&self, booking: &Booking, percent: i16, now: DateTime<Utc>) {
        let Some(session_ref) = booking.payment_session_ref.clone() else {
            tracing::error!(
                booking_id = %booking.id,
                "Paid booking has no payment session, refund needs manual handling"
            );
            return;
        };

        let refund = RefundRecord::pending(
            booking.id,
            session_ref,
            percent,
            booking.refunded_cents,
            now,
        );
        if let Err(err) = self.refunds.insert_refund(&refund).await {
            tracing::error!(
                booking_id = %booking.id,
                error = %err,
                "Failed to record refund"
            );
            return;
        }

        self.issue_refund(refund).await;
    }

    async fn issue_refund(&self, mut refund: RefundRecord) -> RefundRecordStatus {
        let result = self
            .call_provider_once(
                self.settings.poll_policy.request_timeout,
                self.payments
                    .refund(&refund.session_ref, refund.percent, refund.amount_cents),
            )
            .await;

        let now = Utc::now();
        match result {
            Ok(()) => {
                refund.mark_issued(now);
                counter!("refunds_issued_total", "result" => "issued").increment(1);
                tracing::info!(
                    booking_id = %refund.booking_id,
                    refund_id = %refund.id,
                    amount_cents = refund.amount_cents,
                    "Refund issued"
                );
            }
            Err(err) => {
                refund.mark_attempt_failed(
                    err.to_string(),
                    self.settings.refund_max_attempts,
                    now,
                );
                if refund.status == RefundRecordStatus::Failed {
                    counter!("refunds_issued_total", "result" => "failed").increment(1);
                    tracing::error!(
                        booking_id = %refund.booking_id,
                        refund_id = %refund.id,
                        attempts = refund.attempts,
                        error = %err,
                        "Refund failed permanently, manual handling required"
                    );
                } else {
                    tracing::warn!(
                        booking_id = %refund.booking_id,
                        refund_id = %refund.id,
                        attempts = refund.attempts,
                        error = %err,
                        "Refund attempt failed, will retry"
                    );
                }
            }
        }

        if let Err(err) = self.refunds.update_refund(&refund).await {
            tracing::error!(refund_id = %refund.id, error = %err, "Failed to update refund");
        }
        refund.status
    }

    /// Retries a batch of pending refunds.
    pub async fn retry_pending_refunds(
        &self,
        batch_size: i64,
    ) -> Result<RefundRetrySummary, BookingError> {
        let pending = self
            .refunds
            .list_pending_refunds(batch_size)
            .await
            .map_err(|e| self.store_failure(e))?;

        let mut summary = RefundRetrySummary::default();
        for refund in pending {
            summary.attempted += 1;
            match self.issue_refund(refund).await {
                RefundRecordStatus::Issued => summary.issued += 1,
                RefundRecordStatus::Failed => summary.failed += 1,
                RefundRecordStatus::Pending => summary.still_pending += 1,
            }
        }
        Ok(summary)
    }

    pub async fn list_refunds_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<RefundRecord>, BookingError> {
        self.refunds
            .list_refunds_for_booking(booking_id)
            .await
            .map_err(|e| self.store_failure(e))
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Revenue over paid bookings, recomputed on every call.
    pub async fn compute_revenue_stats(&self) -> Result<RevenueStats, BookingError> {
        let lines = self
            .bookings
            .list_paid_revenue_lines()
            .await
            .map_err(|e| self.store_failure(e))?;
        Ok(compute_revenue_stats(
            &lines,
            self.settings.commission_rate_bps,
        ))
    }

    pub async fn platform_stats(&self, today: NaiveDate) -> Result<PlatformStats, BookingError> {
        let bookable_lessons = self
            .lessons
            .count_bookable(today)
            .await
            .map_err(|e| self.store_failure(e))?;
        let active_bookings = self
            .bookings
            .count_active()
            .await
            .map_err(|e| self.store_failure(e))?;
        let revenue = self.compute_revenue_stats().await?;

        Ok(PlatformStats {
            bookable_lessons,
            active_bookings,
            paid_bookings: revenue.paid_bookings,
            revenue,
        })
    }

    /// Active bookings whose lesson starts within the reminder window.
    pub async fn upcoming_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Booking, LessonInstance)>, BookingError> {
        let offset = self.settings.schedule_offset;
        let until = now + self.settings.reminder_window;
        let from = now.with_timezone(&offset).date_naive();
        let to = until.with_timezone(&offset).date_naive();

        let pairs = self
            .bookings
            .list_active_with_lessons_between(from, to)
            .await
            .map_err(|e| self.store_failure(e))?;

        Ok(pairs
            .into_iter()
            .filter(|(_, lesson)| {
                let starts_at = lesson.starts_at(offset);
                starts_at > now && starts_at <= until
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn find_payment_session(
        &self,
        session_ref: &str,
    ) -> Result<PaymentSession, BookingError> {
        self.bookings
            .find_payment_session(session_ref)
            .await
            .map_err(|e| self.store_failure(e))?
            .ok_or_else(|| StoreError::session_not_found(session_ref).into())
    }

    fn ensure_not_quarantined(&self, lesson_id: Uuid) -> Result<(), BookingError> {
        let quarantined = self
            .quarantined
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&lesson_id);
        if quarantined {
            return Err(BookingError::InvariantViolation {
                lesson_id,
                detail: "lesson is quarantined after an earlier invariant violation".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_quarantined(&self, lesson_id: Uuid) -> bool {
        self.ensure_not_quarantined(lesson_id).is_err()
    }

    /// Converts a store error, quarantining the lesson on invariant violations.
    fn store_failure(&self, err: StoreError) -> BookingError {
        if let StoreError::InvariantViolation { lesson_id, detail } = &err {
            let newly = self
                .quarantined
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(*lesson_id);
            if newly {
                counter!("lesson_invariant_violations_total").increment(1);
                tracing::error!(
                    lesson_id = %lesson_id,
                    detail = %detail,
                    "Lesson invariant violated, further mutations halted"
                );
            }
        }
        err.into()
    }

    /// Calls the provider with a timeout, retrying unavailability with
    /// backoff up to the poll policy's attempt count.
    async fn call_provider<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let policy = self.settings.poll_policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.call_provider_once(policy.request_timeout, call()).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(operation, attempt, error = %err, "Payment provider call failed");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn call_provider_once<T, Fut>(
        &self,
        timeout: StdDuration,
        call: Fut,
    ) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Unavailable("request timed out".to_string())),
        }
    }
}

fn recorded_outcome(booking: &Booking) -> Result<RefundOutcome, BookingError> {
    booking.refund_outcome().ok_or_else(|| {
        BookingError::Storage(format!("booking {} has no cancellation record", booking.id))
    })
}

fn rejection_reason(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound { .. } => "not_found",
        StoreError::AlreadyCancelled(_) => "cancelled",
        StoreError::InsufficientCapacity { .. } => "insufficient_capacity",
        StoreError::DuplicateBooking(_) => "duplicate",
        StoreError::InvariantViolation { .. } => "invariant_violation",
        StoreError::Conflict(_) | StoreError::Backend(_) => "storage",
    }
}

fn record_booking_rejected(reason: &'static str) {
    counter!("bookings_rejected_total", "reason" => reason).increment(1);
}

fn record_reconciliation(outcome: ReconciliationOutcome) {
    counter!("payments_reconciled_total", "outcome" => outcome.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        LessonKind, LessonStatus, Recurrence, RefundTier, ReservationStatus,
    };
    use crate::services::memory::InMemoryStore;
    use crate::services::payment::MockPaymentProvider;
    use chrono::{NaiveTime, TimeZone};

    const WEBHOOK_SECRET: &str = "whsec_test_secret";

    struct Harness {
        engine: Arc<BookingEngine>,
        store: Arc<InMemoryStore>,
        provider: Arc<MockPaymentProvider>,
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            max_attempts: 3,
            interval: StdDuration::from_millis(1),
            max_backoff: StdDuration::from_millis(4),
            request_timeout: StdDuration::from_secs(1),
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockPaymentProvider::default());
        let settings = EngineSettings {
            poll_policy: fast_policy(),
            refund_max_attempts: 2,
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..Default::default()
        };
        let engine = Arc::new(BookingEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
            settings,
        ));
        Harness {
            engine,
            store,
            provider,
        }
    }

    fn lesson_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    /// Start instant of lessons created by `group_template`.
    fn lesson_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap()
    }

    fn group_template(capacity: i32) -> LessonTemplate {
        LessonTemplate {
            owner_id: Uuid::new_v4(),
            kind: LessonKind::Group,
            title: "Group carving".to_string(),
            description: "Intermediate".to_string(),
            first_date: lesson_date(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            capacity,
            price_cents: 5_000,
            recurrence: Recurrence::None,
            recurrence_end_date: None,
        }
    }

    async fn create_lesson(h: &Harness, capacity: i32) -> LessonInstance {
        let mut lessons = h
            .engine
            .create_lesson_instances(&group_template(capacity))
            .await
            .unwrap();
        lessons.remove(0)
    }

    async fn paid_booking(h: &Harness, lesson_id: Uuid) -> Booking {
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson_id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        h.provider
            .set_session_status(&session.session_ref, SessionStatus::paid())
            .await;
        assert_eq!(
            h.engine.reconcile_payment(&session.session_ref).await.unwrap(),
            ReconciliationOutcome::Paid
        );
        h.engine.get_booking(booking.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_capacity_four_scenario() {
        let h = harness();
        let lesson = create_lesson(&h, 4).await;

        for _ in 0..3 {
            h.engine
                .create_booking(lesson.id, Uuid::new_v4(), 1)
                .await
                .unwrap();
        }
        let current = h.engine.get_lesson(lesson.id).await.unwrap();
        assert_eq!(current.occupied, 3);
        assert_eq!(current.status, LessonStatus::Available);

        h.engine
            .create_booking(lesson.id, Uuid::new_v4(), 1)
            .await
            .unwrap();
        let current = h.engine.get_lesson(lesson.id).await.unwrap();
        assert_eq!(current.occupied, 4);
        assert_eq!(current.status, LessonStatus::Full);

        let err = h
            .engine
            .create_booking(lesson.id, Uuid::new_v4(), 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::InsufficientCapacity {
                requested: 1,
                remaining: 0
            }
        );
        assert_eq!(
            h.engine
                .list_owner_lessons(lesson.owner_id)
                .await
                .unwrap()[0]
                .1
                .len(),
            4
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bookings_never_exceed_capacity() {
        let h = harness();
        let capacity = 7;
        let attempts = 50;
        let lesson = create_lesson(&h, capacity).await;

        let mut handles = Vec::new();
        for _ in 0..attempts {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.create_booking(lesson.id, Uuid::new_v4(), 1).await
            }));
        }

        let mut admitted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(BookingError::InsufficientCapacity { .. }) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(admitted, capacity);
        assert_eq!(rejected, attempts - capacity);
        let current = h.engine.get_lesson(lesson.id).await.unwrap();
        assert_eq!(current.occupied, capacity);
        assert!(current.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn test_rejects_bad_participant_count_and_unknown_lesson() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        assert!(matches!(
            h.engine.create_booking(lesson.id, Uuid::new_v4(), 0).await,
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            h.engine.create_booking(Uuid::new_v4(), Uuid::new_v4(), 1).await,
            Err(BookingError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.create_booking(lesson.id, Uuid::new_v4(), 3).await,
            Err(BookingError::InsufficientCapacity {
                requested: 3,
                remaining: 2
            })
        ));
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().occupied, 0);
    }

    #[tokio::test]
    async fn test_duplicate_booking_rejected_without_consuming_capacity() {
        let h = harness();
        let lesson = create_lesson(&h, 3).await;
        let requester = Uuid::new_v4();

        let first = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        assert_eq!(
            h.engine.create_booking(lesson.id, requester, 1).await,
            Err(BookingError::DuplicateBooking(lesson.id))
        );
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().occupied, 1);

        h.engine
            .cancel_booking_at(first.id, CancellationActor::Client, lesson_start())
            .await
            .unwrap();
        assert!(h.engine.create_booking(lesson.id, requester, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_booking_cancelled_lesson_fails() {
        let h = harness();
        let lesson = create_lesson(&h, 3).await;
        h.engine
            .cancel_lesson_instance(lesson.id, Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            h.engine.create_booking(lesson.id, Uuid::new_v4(), 1).await,
            Err(BookingError::AlreadyCancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_double_cancel_is_idempotent() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let booking = paid_booking(&h, lesson.id).await;
        let now = lesson_start() - Duration::hours(30);

        let first = h
            .engine
            .cancel_booking_at(booking.id, CancellationActor::Client, now)
            .await
            .unwrap();
        assert_eq!(first.tier, RefundTier::Half);
        assert_eq!(first.refund_amount_cents, 2_500);
        assert_eq!(first.payment_status, PaymentStatus::PartiallyRefunded);
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().occupied, 0);

        // Another booking takes the seat back before the repeat call.
        h.engine
            .create_booking(lesson.id, Uuid::new_v4(), 1)
            .await
            .unwrap();

        let second = h
            .engine
            .cancel_booking_at(booking.id, CancellationActor::Client, now + Duration::hours(20))
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().occupied, 1);
        assert_eq!(h.provider.issued_refunds().await.len(), 1);
    }

    #[tokio::test]
    async fn test_refund_tier_boundaries() {
        let cases = [
            (Duration::hours(48), RefundTier::Full, PaymentStatus::Refunded),
            (
                Duration::hours(47) + Duration::minutes(59),
                RefundTier::Half,
                PaymentStatus::PartiallyRefunded,
            ),
            (Duration::hours(24), RefundTier::Half, PaymentStatus::PartiallyRefunded),
            (
                Duration::hours(23) + Duration::minutes(59),
                RefundTier::None,
                PaymentStatus::Paid,
            ),
        ];

        for (notice, tier, payment_status) in cases {
            let h = harness();
            let lesson = create_lesson(&h, 1).await;
            let booking = paid_booking(&h, lesson.id).await;

            let outcome = h
                .engine
                .cancel_booking_at(
                    booking.id,
                    CancellationActor::Client,
                    lesson_start() - notice,
                )
                .await
                .unwrap();
            assert_eq!(outcome.tier, tier, "notice {:?}", notice);
            assert_eq!(outcome.payment_status, payment_status);
        }
    }

    #[tokio::test]
    async fn test_unpaid_cancellation_has_no_refund() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let booking = h
            .engine
            .create_booking(lesson.id, Uuid::new_v4(), 2)
            .await
            .unwrap();

        let outcome = h
            .engine
            .cancel_booking_at(booking.id, CancellationActor::Client, lesson_start() - Duration::days(5))
            .await
            .unwrap();
        assert_eq!(outcome.tier, RefundTier::Full);
        assert_eq!(outcome.refund_amount_cents, 0);
        assert_eq!(outcome.payment_status, PaymentStatus::Unpaid);
        assert!(h.provider.issued_refunds().await.is_empty());
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().status, LessonStatus::Available);
    }

    #[tokio::test]
    async fn test_instructor_cancels_lesson_with_paid_bookings() {
        let h = harness();
        let lesson = create_lesson(&h, 4).await;
        let a = paid_booking(&h, lesson.id).await;
        let b = paid_booking(&h, lesson.id).await;

        // One hour before start: instructor cancellations still refund in full.
        let report = h
            .engine
            .cancel_lesson_instance(lesson.id, lesson_start() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.lesson.status, LessonStatus::Cancelled);
        assert_eq!(report.refunds.len(), 2);

        for id in [a.id, b.id] {
            let booking = h.engine.get_booking(id).await.unwrap();
            assert_eq!(booking.reservation_status, ReservationStatus::Cancelled);
            assert_eq!(booking.payment_status, PaymentStatus::Refunded);
            assert_eq!(booking.cancelled_by, Some(CancellationActor::Instructor));
        }
        assert_eq!(h.provider.issued_refunds().await.len(), 2);

        let lesson = h.engine.get_lesson(lesson.id).await.unwrap();
        assert!(!lesson.is_bookable());

        let again = h
            .engine
            .cancel_lesson_instance(lesson.id, Utc::now())
            .await
            .unwrap();
        assert!(again.refunds.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_paid_reconciliation_counts_once() {
        let h = harness();
        let lesson = create_lesson(&h, 3).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 2).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app/")
            .await
            .unwrap();
        h.provider
            .set_session_status(&session.session_ref, SessionStatus::paid())
            .await;

        let (first, second) = tokio::join!(
            h.engine.reconcile_payment(&session.session_ref),
            h.engine.reconcile_payment(&session.session_ref)
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(
            outcomes,
            vec![
                ReconciliationOutcome::AlreadyPaid,
                ReconciliationOutcome::Paid
            ]
        );

        let stats = h.engine.compute_revenue_stats().await.unwrap();
        assert_eq!(stats.paid_bookings, 1);
        assert_eq!(stats.total_revenue_cents, 10_000);
        assert_eq!(stats.commission_cents, 1_000);
        assert_eq!(stats.instructor_net_cents, 9_000);
    }

    #[tokio::test]
    async fn test_checkout_rules() {
        let h = harness();
        let lesson = create_lesson(&h, 3).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 3).await.unwrap();

        assert!(matches!(
            h.engine
                .start_checkout(booking.id, Uuid::new_v4(), "https://skimonitor.app")
                .await,
            Err(BookingError::Forbidden(_))
        ));

        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        assert_eq!(
            h.provider.session_amount(&session.session_ref).await,
            Some(15_000)
        );
        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_session_ref.as_deref(), Some(session.session_ref.as_str()));
        assert!(stored.awaiting_payment_confirmation);

        h.engine
            .cancel_booking_at(booking.id, CancellationActor::Client, Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            h.engine
                .start_checkout(booking.id, requester, "https://skimonitor.app")
                .await,
            Err(BookingError::AlreadyCancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_provider_down() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        h.provider.set_unavailable(true);

        assert!(matches!(
            h.engine
                .start_checkout(booking.id, requester, "https://skimonitor.app")
                .await,
            Err(BookingError::ExternalProviderUnavailable(_))
        ));
        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert!(stored.payment_session_ref.is_none());
        assert_eq!(stored.reservation_status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_polling_exhaustion_leaves_pending_payment() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();

        let outcome = h.engine.reconcile_payment(&session.session_ref).await.unwrap();
        assert_eq!(outcome, ReconciliationOutcome::PendingPayment { attempts: 3 });
        assert_eq!(h.provider.status_calls(), 3);

        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
        assert!(stored.awaiting_payment_confirmation);
        assert_eq!(stored.reservation_status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_polling_retries_provider_failures() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        h.provider
            .set_session_status(&session.session_ref, SessionStatus::paid())
            .await;
        h.provider.fail_next_status_calls(2);

        assert_eq!(
            h.engine.reconcile_payment(&session.session_ref).await.unwrap(),
            ReconciliationOutcome::Paid
        );

        h.provider.set_unavailable(true);
        assert_eq!(
            h.engine.reconcile_payment(&session.session_ref).await.unwrap(),
            ReconciliationOutcome::AlreadyPaid
        );
    }

    #[tokio::test]
    async fn test_expired_session_keeps_reservation() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        h.provider
            .set_session_status(&session.session_ref, SessionStatus::expired())
            .await;

        assert_eq!(
            h.engine.reconcile_payment(&session.session_ref).await.unwrap(),
            ReconciliationOutcome::Expired
        );
        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Unpaid);
        assert!(!stored.awaiting_payment_confirmation);
        assert_eq!(h.engine.get_lesson(lesson.id).await.unwrap().occupied, 1);

        // A fresh session can still be started.
        assert!(h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.engine.reconcile_payment("cs_nope").await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_signature_and_idempotency() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();

        let body = format!(
            r#"{{"session_ref":"{}","payment_status":"paid","status":"complete"}}"#,
            session.session_ref
        );
        let signature = shared::crypto::hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes());

        assert!(matches!(
            h.engine
                .handle_provider_notification(body.as_bytes(), "deadbeef")
                .await,
            Err(BookingError::Validation(_))
        ));
        assert_eq!(
            h.engine
                .handle_provider_notification(body.as_bytes(), &signature)
                .await
                .unwrap(),
            ReconciliationOutcome::Paid
        );
        assert_eq!(
            h.engine
                .handle_provider_notification(body.as_bytes(), &signature)
                .await
                .unwrap(),
            ReconciliationOutcome::AlreadyPaid
        );
        assert_eq!(
            h.engine.compute_revenue_stats().await.unwrap().paid_bookings,
            1
        );
    }

    #[tokio::test]
    async fn test_payment_after_cancellation_is_refunded() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        h.engine
            .cancel_booking_at(booking.id, CancellationActor::Client, lesson_start())
            .await
            .unwrap();

        h.provider
            .set_session_status(&session.session_ref, SessionStatus::paid())
            .await;
        let summary = h.engine.reconcile_pending(10).await.unwrap();
        assert_eq!(summary.paid, 1);

        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored.refunded_cents, 5_000);
        assert_eq!(h.provider.issued_refunds().await[0].amount_cents, 5_000);
        assert_eq!(h.engine.compute_revenue_stats().await.unwrap().paid_bookings, 0);

        let refunds = h.engine.list_refunds_for_booking(booking.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].percent, 100);
        assert_eq!(refunds[0].status, RefundRecordStatus::Issued);
    }

    #[tokio::test]
    async fn test_payment_on_superseded_session_settles_booking() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let first = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        let second = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        assert_ne!(first.session_ref, second.session_ref);

        h.provider
            .set_session_status(&first.session_ref, SessionStatus::paid())
            .await;
        assert_eq!(
            h.engine.reconcile_payment(&first.session_ref).await.unwrap(),
            ReconciliationOutcome::Paid
        );
        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.payment_session_ref.as_deref(), Some(first.session_ref.as_str()));
        assert!(!stored.awaiting_payment_confirmation);

        // The client pays the second session as well.
        h.provider
            .set_session_status(&second.session_ref, SessionStatus::paid())
            .await;
        let body = format!(
            r#"{{"session_ref":"{}","payment_status":"paid","status":"complete"}}"#,
            second.session_ref
        );
        let signature = shared::crypto::hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes());
        assert_eq!(
            h.engine
                .handle_provider_notification(body.as_bytes(), &signature)
                .await
                .unwrap(),
            ReconciliationOutcome::DuplicateRefunded
        );
        assert_eq!(
            h.engine.reconcile_payment(&second.session_ref).await.unwrap(),
            ReconciliationOutcome::AlreadyPaid
        );

        let issued = h.provider.issued_refunds().await;
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].session_ref, second.session_ref);
        assert_eq!(issued[0].amount_cents, 5_000);

        let stored = h.engine.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(stored.refunded_cents, 0);
        let stats = h.engine.compute_revenue_stats().await.unwrap();
        assert_eq!(stats.paid_bookings, 1);
        assert_eq!(stats.total_revenue_cents, 5_000);
    }

    #[tokio::test]
    async fn test_sweep_polls_superseded_sessions() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let requester = Uuid::new_v4();
        let booking = h.engine.create_booking(lesson.id, requester, 1).await.unwrap();
        let first = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        let second = h
            .engine
            .start_checkout(booking.id, requester, "https://skimonitor.app")
            .await
            .unwrap();
        h.provider
            .set_session_status(&first.session_ref, SessionStatus::paid())
            .await;

        let summary = h.engine.reconcile_pending(10).await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(
            h.engine.get_booking(booking.id).await.unwrap().payment_status,
            PaymentStatus::Paid
        );

        h.provider
            .set_session_status(&second.session_ref, SessionStatus::expired())
            .await;
        let summary = h.engine.reconcile_pending(10).await.unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.expired, 1);
        assert!(h.engine.reconcile_pending(10).await.unwrap().checked == 0);
        assert!(h.provider.issued_refunds().await.is_empty());
    }

    #[tokio::test]
    async fn test_refund_retry_until_failed() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let booking = paid_booking(&h, lesson.id).await;
        h.provider.set_refunds_unavailable(true);

        let outcome = h
            .engine
            .cancel_booking_at(booking.id, CancellationActor::System, Utc::now())
            .await
            .unwrap();
        // Local state is final regardless of the provider.
        assert_eq!(outcome.payment_status, PaymentStatus::Refunded);

        let refunds = h.engine.list_refunds_for_booking(booking.id).await.unwrap();
        assert_eq!(refunds[0].status, RefundRecordStatus::Pending);
        assert_eq!(refunds[0].attempts, 1);

        let summary = h.engine.retry_pending_refunds(10).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(h.engine.retry_pending_refunds(10).await.unwrap().attempted == 0);
    }

    #[tokio::test]
    async fn test_refund_retry_succeeds_later() {
        let h = harness();
        let lesson = create_lesson(&h, 1).await;
        let booking = paid_booking(&h, lesson.id).await;
        h.provider.set_refunds_unavailable(true);
        h.engine
            .cancel_booking_at(booking.id, CancellationActor::Instructor, Utc::now())
            .await
            .unwrap();

        h.provider.set_refunds_unavailable(false);
        let summary = h.engine.retry_pending_refunds(10).await.unwrap();
        assert_eq!(summary.issued, 1);
        assert_eq!(h.provider.issued_refunds().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invariant_violation_quarantines_lesson() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let other = create_lesson(&h, 2).await;
        h.store.corrupt_lesson(lesson.id, 5).await.unwrap();

        assert!(matches!(
            h.engine.create_booking(lesson.id, Uuid::new_v4(), 1).await,
            Err(BookingError::InvariantViolation { .. })
        ));
        assert!(h.engine.is_quarantined(lesson.id));

        // Even after repair the lesson stays halted.
        h.store.corrupt_lesson(lesson.id, 0).await.unwrap();
        assert!(matches!(
            h.engine.create_booking(lesson.id, Uuid::new_v4(), 1).await,
            Err(BookingError::InvariantViolation { .. })
        ));
        assert!(matches!(
            h.engine.cancel_lesson_instance(lesson.id, Utc::now()).await,
            Err(BookingError::InvariantViolation { .. })
        ));

        assert!(h.engine.create_booking(other.id, Uuid::new_v4(), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_recurring_creation_and_cap() {
        let h = harness();
        let mut template = group_template(5);
        template.recurrence = Recurrence::Biweekly;
        template.recurrence_end_date = NaiveDate::from_ymd_opt(2026, 4, 7);

        let lessons = h.engine.create_lesson_instances(&template).await.unwrap();
        assert_eq!(lessons.len(), 3);
        let group = lessons[0].recurrence_group_id;
        assert!(group.is_some());
        assert!(lessons.iter().all(|l| l.recurrence_group_id == group));

        template.recurrence = Recurrence::Weekly;
        template.recurrence_end_date = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert!(matches!(
            h.engine.create_lesson_instances(&template).await,
            Err(BookingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_authorization_rules() {
        let h = harness();
        let lesson = create_lesson(&h, 3).await;
        let client = Principal::new(Uuid::new_v4(), shared::jwt::Role::Client);
        let owner = Principal::new(lesson.owner_id, shared::jwt::Role::Instructor);
        let stranger = Principal::new(Uuid::new_v4(), shared::jwt::Role::Instructor);
        let admin = Principal::new(Uuid::new_v4(), shared::jwt::Role::Admin);

        let booking = h
            .engine
            .create_booking(lesson.id, client.user_id, 1)
            .await
            .unwrap();

        assert!(h.engine.get_booking_for(booking.id, &owner).await.is_ok());
        assert!(matches!(
            h.engine.get_booking_for(booking.id, &stranger).await,
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            h.engine.cancel_booking_as(booking.id, &stranger, Utc::now()).await,
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            h.engine.cancel_lesson_as(lesson.id, &stranger, Utc::now()).await,
            Err(BookingError::Forbidden(_))
        ));

        let outcome = h
            .engine
            .cancel_booking_as(booking.id, &owner, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.actor, CancellationActor::Instructor);

        let second = h
            .engine
            .create_booking(lesson.id, Uuid::new_v4(), 1)
            .await
            .unwrap();
        let outcome = h
            .engine
            .cancel_booking_as(second.id, &admin, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.actor, CancellationActor::System);

        assert!(h.engine.cancel_lesson_as(lesson.id, &admin, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_platform_stats_and_reminders() {
        let h = harness();
        let lesson = create_lesson(&h, 4).await;
        let _paid = paid_booking(&h, lesson.id).await;
        h.engine
            .create_booking(lesson.id, Uuid::new_v4(), 1)
            .await
            .unwrap();

        let stats = h.engine.platform_stats(lesson_date()).await.unwrap();
        assert_eq!(stats.bookable_lessons, 1);
        assert_eq!(stats.active_bookings, 2);
        assert_eq!(stats.paid_bookings, 1);
        assert_eq!(stats.revenue.total_revenue_cents, 5_000);

        let due = h
            .engine
            .upcoming_reminders(lesson_start() - Duration::hours(20))
            .await
            .unwrap();
        assert_eq!(due.len(), 2);

        let early = h
            .engine
            .upcoming_reminders(lesson_start() - Duration::hours(30))
            .await
            .unwrap();
        assert!(early.is_empty());

        let after = h.engine.upcoming_reminders(lesson_start()).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn test_check_payment_status_for_requester() {
        let h = harness();
        let lesson = create_lesson(&h, 2).await;
        let client = Principal::new(Uuid::new_v4(), shared::jwt::Role::Client);
        let stranger = Principal::new(Uuid::new_v4(), shared::jwt::Role::Client);

        let booking = h
            .engine
            .create_booking(lesson.id, client.user_id, 1)
            .await
            .unwrap();
        let session = h
            .engine
            .start_checkout(booking.id, client.user_id, "https://skimonitor.app")
            .await
            .unwrap();

        assert!(matches!(
            h.engine
                .check_payment_status(&session.session_ref, &stranger)
                .await,
            Err(BookingError::Forbidden(_))
        ));

        let calls_before = h.provider.status_calls();
        let (outcome, current) = h
            .engine
            .check_payment_status(&session.session_ref, &client)
            .await
            .unwrap();
        assert_eq!(outcome, ReconciliationOutcome::PendingPayment { attempts: 1 });
        assert_eq!(h.provider.status_calls(), calls_before + 1);
        assert!(current.awaiting_payment_confirmation);

        h.provider
            .set_session_status(&session.session_ref, SessionStatus::paid())
            .await;
        let (outcome, current) = h
            .engine
            .check_payment_status(&session.session_ref, &client)
            .await
            .unwrap();
        assert_eq!(outcome, ReconciliationOutcome::Paid);
        assert_eq!(current.payment_status, PaymentStatus::Paid);
    }
}
