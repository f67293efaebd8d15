//! Bearer token authentication middleware.
//!
//! Tokens come from the identity provider; we only verify them and turn the
//! claims into a [`Principal`] stored in request extensions.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use domain::models::Principal;
use shared::jwt::{extract_user_id, JwtConfig, JwtError};

use crate::app::AppState;
use crate::error::ApiError;

/// Reads the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header format".to_string()))
}

/// Verifies a token and builds the caller's principal.
pub fn authenticate(jwt: &JwtConfig, token: &str) -> Result<Principal, ApiError> {
    let claims = jwt.validate_token(token).map_err(|e| {
        tracing::debug!("Token validation failed: {}", e);
        match e {
            JwtError::TokenExpired => ApiError::Unauthorized("Token has expired".to_string()),
            _ => ApiError::Unauthorized("Invalid or expired token".to_string()),
        }
    })?;

    let user_id = extract_user_id(&claims)
        .map_err(|_| ApiError::Unauthorized("Invalid subject in token".to_string()))?;

    Ok(Principal::new(user_id, claims.role))
}

/// Middleware that requires a valid bearer token.
///
/// The authenticated principal is stored in request extensions.
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let principal = match bearer_token(req.headers()).and_then(|t| authenticate(&state.jwt, t)) {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

/// Middleware that requires a valid bearer token carrying the admin role.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let principal = match bearer_token(req.headers()).and_then(|t| authenticate(&state.jwt, t)) {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    if !principal.is_admin() {
        tracing::warn!(user_id = %principal.user_id, role = %principal.role, "Admin route denied");
        return ApiError::Forbidden("Admin role required".to_string()).into_response();
    }

    req.extensions_mut().insert(principal);
    next.run(req).await
}
