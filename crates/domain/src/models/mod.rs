//! Domain models for SkiMonitor.

pub mod booking;
pub mod lesson;
pub mod payment;
pub mod principal;
pub mod revenue;

pub use booking::{
    refund_amount_cents, Booking, BookingResponse, CancellationActor, CreateBookingRequest,
    PaymentStatus, RefundOutcome, RefundTier, ReservationStatus,
};
pub use lesson::{
    CreateLessonRequest, CreateLessonsResponse, LessonDraft, LessonFilter, LessonInstance,
    LessonKind, LessonResponse, LessonStatus, LessonTemplate, LessonWithBookingsResponse,
    Recurrence,
};
pub use payment::{
    CheckoutRequest, CheckoutResponse, CheckoutSession, PaymentSession, PaymentSessionState,
    PaymentStatusResponse, ProviderNotification, ReconciliationOutcome, RefundRecord, RefundRecordStatus,
    SessionPaymentStatus, SessionState, SessionStatus, StartCheckoutRequest,
};
pub use principal::Principal;
pub use revenue::{PlatformStats, ReminderResponse, RevenueLine, RevenueStats};
