//! Authenticated principal extractor.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use domain::models::Principal;
use std::ops::Deref;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::user_auth::{authenticate, bearer_token};

/// The verified caller of a request.
///
/// Reuses the principal stored by the auth middleware when present,
/// otherwise verifies the bearer token itself.
#[derive(Debug, Clone, Copy)]
pub struct UserAuth(pub Principal);

impl Deref for UserAuth {
    type Target = Principal;

    fn deref(&self) -> &Principal {
        &self.0
    }
}

#[async_trait]
impl FromRequestParts<AppState> for UserAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(UserAuth(*principal));
        }

        let token = bearer_token(&parts.headers)?;
        authenticate(&state.jwt, token).map(UserAuth)
    }
}
