//! Booking domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Reservation status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

/// Payment status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Who initiated a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationActor {
    Client,
    Instructor,
    /// Platform-initiated, e.g. weather or safety.
    System,
}

impl CancellationActor {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationActor::Client => "client",
            CancellationActor::Instructor => "instructor",
            CancellationActor::System => "system",
        }
    }
}

impl std::fmt::Display for CancellationActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancellationActor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(CancellationActor::Client),
            "instructor" => Ok(CancellationActor::Instructor),
            "system" => Ok(CancellationActor::System),
            other => Err(format!("unknown cancellation actor: {}", other)),
        }
    }
}

/// Refund tier applied on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundTier {
    Full,
    Half,
    None,
}

impl RefundTier {
    pub fn percent(&self) -> i16 {
        match self {
            RefundTier::Full => 100,
            RefundTier::Half => 50,
            RefundTier::None => 0,
        }
    }

    pub fn from_percent(percent: i16) -> Self {
        match percent {
            p if p >= 100 => RefundTier::Full,
            p if p > 0 => RefundTier::Half,
            _ => RefundTier::None,
        }
    }
}

/// Refund amount for a payment, rounded down to the cent.
pub fn refund_amount_cents(amount_cents: i64, percent: i16) -> i64 {
    amount_cents * i64::from(percent.clamp(0, 100)) / 100
}

/// A reservation of seats on one lesson instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub requester_id: Uuid,
    pub participants: i32,
    pub reservation_status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_session_ref: Option<String>,
    /// Unit price times participants at admission time.
    pub amount_cents: i64,
    pub refunded_cents: i64,
    pub refund_percent: Option<i16>,
    pub cancelled_by: Option<CancellationActor>,
    /// A checkout session is open and its outcome is not yet known.
    pub awaiting_payment_confirmation: bool,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// A confirmed, unpaid booking.
    pub fn new(
        lesson_id: Uuid,
        requester_id: Uuid,
        participants: i32,
        unit_price_cents: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lesson_id,
            requester_id,
            participants,
            reservation_status: ReservationStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            payment_session_ref: None,
            amount_cents: unit_price_cents * i64::from(participants),
            refunded_cents: 0,
            refund_percent: None,
            cancelled_by: None,
            awaiting_payment_confirmation: false,
            created_at,
            paid_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reservation_status == ReservationStatus::Cancelled
    }

    /// Whether this booking's seats count toward its lesson's occupancy.
    pub fn holds_seats(&self) -> bool {
        !self.is_cancelled()
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Applies a cancellation with the given refund percentage.
    ///
    /// Returns false, leaving the booking untouched, if it was already
    /// cancelled. A paid booking moves to `refunded` or
    /// `partially_refunded`; a zero refund keeps it `paid`.
    pub fn apply_cancellation(
        &mut self,
        actor: CancellationActor,
        percent: i16,
        now: DateTime<Utc>,
    ) -> bool {
        if self.is_cancelled() {
            return false;
        }

        self.reservation_status = ReservationStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.cancelled_at = Some(now);
        self.refund_percent = Some(percent);

        if self.is_paid() && percent > 0 {
            self.refunded_cents = refund_amount_cents(self.amount_cents, percent);
            self.payment_status = if percent >= 100 {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            };
        }
        true
    }

    /// Applies a capture from `session_ref`, which becomes the booking's
    /// current session. Returns false if already past unpaid.
    ///
    /// A booking cancelled before the money arrived moves straight to
    /// `refunded` with a full refund; it is never observed as `paid`.
    pub fn apply_payment(&mut self, session_ref: &str, now: DateTime<Utc>) -> bool {
        if self.payment_status != PaymentStatus::Unpaid {
            return false;
        }
        self.payment_session_ref = Some(session_ref.to_string());
        self.paid_at = Some(now);
        self.awaiting_payment_confirmation = false;
        if self.is_cancelled() {
            self.refunded_cents = self.amount_cents;
            self.refund_percent = Some(100);
            self.payment_status = PaymentStatus::Refunded;
        } else {
            self.payment_status = PaymentStatus::Paid;
        }
        true
    }

    /// The refund outcome recorded on a cancelled booking.
    pub fn refund_outcome(&self) -> Option<RefundOutcome> {
        if !self.is_cancelled() {
            return None;
        }
        let percent = self.refund_percent.unwrap_or(0);
        Some(RefundOutcome {
            booking_id: self.id,
            lesson_id: self.lesson_id,
            actor: self.cancelled_by.unwrap_or(CancellationActor::System),
            tier: RefundTier::from_percent(percent),
            refund_percent: percent,
            refund_amount_cents: self.refunded_cents,
            payment_status: self.payment_status,
            cancelled_at: self.cancelled_at,
        })
    }
}

/// Result of cancelling a booking.
///
/// Derived from the stored booking, so repeated cancellations report the
/// same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RefundOutcome {
    pub booking_id: Uuid,
    pub lesson_id: Uuid,
    pub actor: CancellationActor,
    pub tier: RefundTier,
    pub refund_percent: i16,
    pub refund_amount_cents: i64,
    pub payment_status: PaymentStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
}

fn default_participants() -> i32 {
    1
}

/// Request payload for creating a booking.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateBookingRequest {
    pub lesson_id: Uuid,

    #[serde(default = "default_participants")]
    #[validate(custom(function = "shared::validation::validate_participants"))]
    pub participants: i32,
}

/// Response payload for a booking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BookingResponse {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub client_id: Uuid,
    pub participants: i32,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    pub amount_cents: i64,
    pub refunded_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancellationActor>,
    pub awaiting_payment_confirmation: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            lesson_id: b.lesson_id,
            client_id: b.requester_id,
            participants: b.participants,
            status: b.reservation_status,
            payment_status: b.payment_status,
            payment_session_id: b.payment_session_ref,
            amount_cents: b.amount_cents,
            refunded_cents: b.refunded_cents,
            cancelled_by: b.cancelled_by,
            awaiting_payment_confirmation: b.awaiting_payment_confirmation,
            created_at: b.created_at,
            cancelled_at: b.cancelled_at,
        }
    }
}
