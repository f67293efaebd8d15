//! Booking endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use domain::models::{BookingResponse, CreateBookingRequest, RefundOutcome};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

/// Book seats on a lesson for the caller.
///
/// POST /api/v1/bookings
pub async fn create_booking(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    request.validate()?;

    let booking = state
        .engine
        .create_booking(request.lesson_id, auth.user_id, request.participants)
        .await?;

    Ok((StatusCode::CREATED, Json(booking.into())))
}

/// The caller's bookings, newest first.
///
/// GET /api/v1/bookings
pub async fn list_my_bookings(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let bookings = state
        .engine
        .list_bookings_for_requester(auth.user_id)
        .await?;
    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/bookings/:booking_id
pub async fn get_booking(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.engine.get_booking_for(booking_id, &auth).await?;
    Ok(Json(booking.into()))
}

/// Cancel a booking. The refund tier depends on who cancels and when.
///
/// DELETE /api/v1/bookings/:booking_id
pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<RefundOutcome>, ApiError> {
    let outcome = state
        .engine
        .cancel_booking_as(booking_id, &auth, Utc::now())
        .await?;
    Ok(Json(outcome))
}
