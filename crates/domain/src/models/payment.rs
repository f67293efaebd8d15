//! Payment session, reconciliation and refund models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::models::booking::PaymentStatus;

/// Payment status reported by the provider for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    #[serde(rename = "no_payment")]
    NoPaymentRequired,
}

/// Lifecycle state of a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Expired,
    Complete,
}

/// Snapshot of a provider checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub payment_status: SessionPaymentStatus,
    pub status: SessionState,
}

impl SessionStatus {
    pub fn open() -> Self {
        Self {
            payment_status: SessionPaymentStatus::Unpaid,
            status: SessionState::Open,
        }
    }

    pub fn paid() -> Self {
        Self {
            payment_status: SessionPaymentStatus::Paid,
            status: SessionState::Complete,
        }
    }

    pub fn expired() -> Self {
        Self {
            payment_status: SessionPaymentStatus::Unpaid,
            status: SessionState::Expired,
        }
    }

    /// Money is settled: explicitly paid, or a completed session that
    /// required no payment.
    pub fn is_paid(&self) -> bool {
        match self.payment_status {
            SessionPaymentStatus::Paid => true,
            SessionPaymentStatus::NoPaymentRequired => self.status == SessionState::Complete,
            SessionPaymentStatus::Unpaid => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        !self.is_paid() && self.status == SessionState::Expired
    }

    /// Whether further polling can change the answer.
    pub fn is_terminal(&self) -> bool {
        self.is_paid() || self.status != SessionState::Open
    }
}

/// Parameters for opening a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRequest {
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub session_ref: String,
    pub redirect_url: String,
}

/// Ledger state of one checkout session opened for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSessionState {
    Open,
    /// The capture settled its booking.
    Paid,
    /// Captured after another session already settled the booking; refunded.
    Duplicate,
    /// Ended without payment.
    Expired,
}

impl PaymentSessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentSessionState::Open => "open",
            PaymentSessionState::Paid => "paid",
            PaymentSessionState::Duplicate => "duplicate",
            PaymentSessionState::Expired => "expired",
        }
    }

    /// A capture on this session was already applied.
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentSessionState::Paid | PaymentSessionState::Duplicate)
    }
}

impl FromStr for PaymentSessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PaymentSessionState::Open),
            "paid" => Ok(PaymentSessionState::Paid),
            "duplicate" => Ok(PaymentSessionState::Duplicate),
            "expired" => Ok(PaymentSessionState::Expired),
            other => Err(format!("unknown payment session state: {}", other)),
        }
    }
}

/// One checkout session, kept for as long as its booking exists.
///
/// A booking may accumulate several sessions when the client restarts
/// checkout; each stays resolvable to its booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_ref: String,
    pub booking_id: Uuid,
    pub amount_cents: i64,
    pub state: PaymentSessionState,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentSession {
    pub fn open(
        session_ref: String,
        booking_id: Uuid,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_ref,
            booking_id,
            amount_cents,
            state: PaymentSessionState::Open,
            created_at: now,
            settled_at: None,
        }
    }
}

/// Outcome of reconciling one payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// This call applied the unpaid to paid transition.
    Paid,
    /// The capture on this session was already applied.
    AlreadyPaid,
    /// The session was paid after another session settled the booking;
    /// the capture is refunded in full.
    DuplicateRefunded,
    /// The session is still open.
    Unpaid,
    /// The session ended without payment; the booking keeps its seats.
    Expired,
    /// No terminal answer within the polling budget.
    PendingPayment { attempts: u32 },
}

impl ReconciliationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Paid => "paid",
            ReconciliationOutcome::AlreadyPaid => "already_paid",
            ReconciliationOutcome::DuplicateRefunded => "duplicate_refunded",
            ReconciliationOutcome::Unpaid => "unpaid",
            ReconciliationOutcome::Expired => "expired",
            ReconciliationOutcome::PendingPayment { .. } => "pending_payment",
        }
    }
}

/// Refund follow-up status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundRecordStatus {
    Pending,
    Issued,
    Failed,
}

impl RefundRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundRecordStatus::Pending => "pending",
            RefundRecordStatus::Issued => "issued",
            RefundRecordStatus::Failed => "failed",
        }
    }
}

impl FromStr for RefundRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundRecordStatus::Pending),
            "issued" => Ok(RefundRecordStatus::Issued),
            "failed" => Ok(RefundRecordStatus::Failed),
            other => Err(format!("unknown refund status: {}", other)),
        }
    }
}

/// A refund owed to a client, issued to the provider as a follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub session_ref: String,
    pub percent: i16,
    pub amount_cents: i64,
    pub status: RefundRecordStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundRecord {
    pub fn pending(
        booking_id: Uuid,
        session_ref: String,
        percent: i16,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            session_ref,
            percent,
            amount_cents,
            status: RefundRecordStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_issued(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.status = RefundRecordStatus::Issued;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Records a failed attempt; gives up after `max_attempts`.
    pub fn mark_attempt_failed(&mut self, error: String, max_attempts: i32, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(error);
        self.updated_at = now;
        if self.attempts >= max_attempts {
            self.status = RefundRecordStatus::Failed;
        }
    }
}

/// Request payload for starting a checkout.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct StartCheckoutRequest {
    pub booking_id: Uuid,

    #[validate(custom(function = "shared::validation::validate_origin_url"))]
    pub origin_url: String,
}

/// Response payload for a started checkout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(s: CheckoutSession) -> Self {
        Self {
            session_id: s.session_ref,
            url: s.redirect_url,
        }
    }
}

/// Response payload for a payment status query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PaymentStatusResponse {
    pub session_id: String,
    pub booking_id: Uuid,
    #[serde(flatten)]
    pub outcome: ReconciliationOutcome,
    pub payment_status: PaymentStatus,
}

/// Notification body posted by the payment provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderNotification {
    pub session_ref: String,
    #[serde(flatten)]
    pub session: SessionStatus,
}
