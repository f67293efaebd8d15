use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::BookingError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("Already cancelled: {0}")]
    AlreadyCancelled(String),

    #[error("Duplicate booking: {0}")]
    DuplicateBooking(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body failed field validation.
    #[error("Validation error: {} invalid field(s)", .0.len())]
    InvalidFields(Vec<FieldError>),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// JSON error body: `{"error": code, "message": text, "details": [...]}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::InsufficientCapacity(_) => (StatusCode::CONFLICT, "insufficient_capacity"),
            ApiError::AlreadyCancelled(_) => (StatusCode::CONFLICT, "already_cancelled"),
            ApiError::DuplicateBooking(_) => (StatusCode::CONFLICT, "duplicate_booking"),
            ApiError::Validation(_) | ApiError::InvalidFields(_) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        }
    }

    fn into_body(self) -> ErrorBody {
        let (_, error) = self.status_and_code();
        let (message, details) = match self {
            ApiError::Internal(msg) => {
                // Never leak storage or invariant details to clients
                tracing::error!(error = %msg, "Internal error");
                ("An internal error occurred".to_string(), Vec::new())
            }
            ApiError::InvalidFields(fields) => {
                let message = match fields.as_slice() {
                    [single] => single.message.clone(),
                    _ => format!("{} fields are invalid", fields.len()),
                };
                (message, fields)
            }
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::InsufficientCapacity(msg)
            | ApiError::AlreadyCancelled(msg)
            | ApiError::DuplicateBooking(msg)
            | ApiError::Validation(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, Vec::new()),
        };

        ErrorBody {
            error,
            message,
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, _) = self.status_and_code();
        (status, Json(self.into_body())).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound(msg) => ApiError::NotFound(msg),
            BookingError::AlreadyCancelled(msg) => ApiError::AlreadyCancelled(msg),
            BookingError::InsufficientCapacity {
                requested,
                remaining,
            } => ApiError::InsufficientCapacity(format!(
                "{} seat(s) requested, {} remaining",
                requested, remaining
            )),
            BookingError::DuplicateBooking(lesson_id) => ApiError::DuplicateBooking(format!(
                "You already hold an active booking on lesson {}",
                lesson_id
            )),
            BookingError::Validation(msg) => ApiError::Validation(msg),
            BookingError::Forbidden(msg) => ApiError::Forbidden(msg),
            BookingError::ExternalProviderUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            BookingError::InvariantViolation { lesson_id, detail } => ApiError::Internal(format!(
                "Invariant violation on lesson {}: {}",
                lesson_id, detail
            )),
            BookingError::Storage(msg) => ApiError::Internal(format!("Storage error: {}", msg)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field)),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::InvalidFields(fields)
    }
}
