//! Payment endpoint handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use domain::models::{
    CheckoutResponse, PaymentStatusResponse, ReconciliationOutcome, StartCheckoutRequest,
};
use serde::Serialize;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

/// Header carrying the provider's HMAC-SHA256 signature of the raw body.
pub const SIGNATURE_HEADER: &str = "X-Payment-Signature";

/// Open a checkout session for one of the caller's bookings.
///
/// POST /api/v1/payments/checkout
pub async fn start_checkout(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    request.validate()?;

    let session = state
        .engine
        .start_checkout(request.booking_id, auth.user_id, &request.origin_url)
        .await?;

    Ok(Json(session.into()))
}

/// Check a checkout session once and apply the result.
///
/// GET /api/v1/payments/status/:session_ref
pub async fn payment_status(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(session_ref): Path<String>,
) -> Result<Json<PaymentStatusResponse>, ApiError> {
    let (outcome, booking) = state
        .engine
        .check_payment_status(&session_ref, &auth)
        .await?;

    Ok(Json(PaymentStatusResponse {
        session_id: session_ref,
        booking_id: booking.id,
        outcome,
        payment_status: booking.payment_status,
    }))
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: ReconciliationOutcome,
}

/// Payment provider notifications.
///
/// POST /api/v1/payments/webhook
pub async fn provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation(format!("Missing {} header", SIGNATURE_HEADER)))?;

    let outcome = state
        .engine
        .handle_provider_notification(&body, signature)
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}
