//! Admin endpoint handlers. Every route here sits behind `require_admin`.

use axum::{extract::State, Json};
use chrono::Utc;
use domain::models::{PlatformStats, ReminderResponse, RevenueStats};

use crate::app::AppState;
use crate::error::ApiError;

/// GET /api/v1/admin/stats
pub async fn platform_stats(
    State(state): State<AppState>,
) -> Result<Json<PlatformStats>, ApiError> {
    let today = Utc::now()
        .with_timezone(&state.engine.settings().schedule_offset)
        .date_naive();
    let stats = state.engine.platform_stats(today).await?;
    Ok(Json(stats))
}

/// GET /api/v1/admin/revenue
pub async fn revenue_stats(State(state): State<AppState>) -> Result<Json<RevenueStats>, ApiError> {
    let stats = state.engine.compute_revenue_stats().await?;
    Ok(Json(stats))
}

/// Bookings whose lesson starts within the reminder window.
///
/// GET /api/v1/admin/reminders
pub async fn upcoming_reminders(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReminderResponse>>, ApiError> {
    let due = state.engine.upcoming_reminders(Utc::now()).await?;
    tracing::info!(count = due.len(), "Reminder candidates listed");

    Ok(Json(
        due.into_iter()
            .map(|(booking, lesson)| ReminderResponse {
                booking: booking.into(),
                lesson: lesson.into(),
            })
            .collect(),
    ))
}
