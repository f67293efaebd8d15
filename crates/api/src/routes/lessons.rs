//! Lesson endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use domain::models::{
    BookingResponse, CreateLessonRequest, CreateLessonsResponse, LessonFilter, LessonResponse,
    LessonTemplate, LessonWithBookingsResponse, RefundOutcome,
};
use domain::services::LessonCancellationReport;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

/// Validates the request and builds a template owned by the caller.
fn template_for(auth: &UserAuth, request: CreateLessonRequest) -> Result<LessonTemplate, ApiError> {
    if !auth.can_publish_lessons() {
        return Err(ApiError::Forbidden(
            "Only instructors can publish lessons".to_string(),
        ));
    }
    request.validate()?;
    let template = request
        .into_template(auth.user_id)
        .map_err(ApiError::Validation)?;
    template.check().map_err(ApiError::Validation)?;
    Ok(template)
}

/// Create lessons from a one-off or recurring template.
///
/// POST /api/v1/lessons
pub async fn create_lessons(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(request): Json<CreateLessonRequest>,
) -> Result<(StatusCode, Json<CreateLessonsResponse>), ApiError> {
    let template = template_for(&auth, request)?;
    let lessons = state.engine.create_lesson_instances(&template).await?;

    let recurrence_group_id = lessons.first().and_then(|l| l.recurrence_group_id);
    let lessons: Vec<LessonResponse> = lessons.into_iter().map(Into::into).collect();

    Ok((
        StatusCode::CREATED,
        Json(CreateLessonsResponse {
            recurrence_group_id,
            total: lessons.len(),
            lessons,
        }),
    ))
}

/// Preview the instances a template would create, without saving them.
///
/// POST /api/v1/lessons/preview
pub async fn preview_lessons(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(request): Json<CreateLessonRequest>,
) -> Result<Json<CreateLessonsResponse>, ApiError> {
    let template = template_for(&auth, request)?;
    let drafts = state.engine.expand_template(&template)?;

    let now = Utc::now();
    let lessons: Vec<LessonResponse> = drafts
        .into_iter()
        .map(|draft| domain::models::LessonInstance::from_draft(draft, now).into())
        .collect();

    Ok(Json(CreateLessonsResponse {
        recurrence_group_id: lessons.first().and_then(|l| l.recurrence_group_id),
        total: lessons.len(),
        lessons,
    }))
}

/// List lessons, optionally filtered.
///
/// GET /api/v1/lessons
pub async fn list_lessons(
    State(state): State<AppState>,
    Query(filter): Query<LessonFilter>,
) -> Result<Json<Vec<LessonResponse>>, ApiError> {
    let lessons = state.engine.list_lessons(&filter).await?;
    Ok(Json(lessons.into_iter().map(Into::into).collect()))
}

/// GET /api/v1/lessons/:lesson_id
pub async fn get_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<LessonResponse>, ApiError> {
    let lesson = state.engine.get_lesson(lesson_id).await?;
    Ok(Json(lesson.into()))
}

/// The caller's own lessons with their active bookings.
///
/// GET /api/v1/my-lessons
pub async fn list_my_lessons(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<Vec<LessonWithBookingsResponse>>, ApiError> {
    if !auth.can_publish_lessons() {
        return Err(ApiError::Forbidden(
            "Only instructors have lessons".to_string(),
        ));
    }

    let lessons = state.engine.list_owner_lessons(auth.user_id).await?;
    Ok(Json(
        lessons
            .into_iter()
            .map(|(lesson, bookings)| LessonWithBookingsResponse {
                lesson: lesson.into(),
                bookings: bookings.into_iter().map(BookingResponse::from).collect(),
            })
            .collect(),
    ))
}

/// Response for a lesson cancellation.
#[derive(Debug, Serialize)]
pub struct LessonCancellationResponse {
    pub lesson: LessonResponse,
    pub refunds: Vec<RefundOutcome>,
}

impl From<LessonCancellationReport> for LessonCancellationResponse {
    fn from(report: LessonCancellationReport) -> Self {
        Self {
            lesson: report.lesson.into(),
            refunds: report.refunds,
        }
    }
}

/// Cancel a lesson instance and refund every booking on it.
///
/// DELETE /api/v1/lessons/:lesson_id
pub async fn cancel_lesson(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<LessonCancellationResponse>, ApiError> {
    let report = state
        .engine
        .cancel_lesson_as(lesson_id, &auth, Utc::now())
        .await?;

    tracing::info!(
        lesson_id = %lesson_id,
        cancelled_by = %auth.user_id,
        refunds = report.refunds.len(),
        "Lesson cancelled via API"
    );

    Ok(Json(report.into()))
}
