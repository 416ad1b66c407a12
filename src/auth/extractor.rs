//! Axum extractor for bearer-authenticated requests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::{TokenClaims, extract_bearer};
use crate::app_state::AppState;
use crate::error::HubError;

/// Claims of the caller's verified bearer token.
///
/// Rejects with [`HubError::Unauthorized`] when the header is missing,
/// malformed, or carries an invalid or expired token. Every accepted
/// caller gets a profile row; failing to write it does not fail the
/// request.
#[derive(Debug, Clone)]
pub struct AuthUser(pub TokenClaims);

impl AuthUser {
    /// The authenticated user's id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.0.user_id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = HubError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(HubError::Unauthorized)?;
        let claims = state.tokens.verify(token).ok_or(HubError::Unauthorized)?;
        let email = Some(claims.email.as_str()).filter(|e| !e.is_empty());
        if let Err(e) = state.devices.ensure_profile(&claims.user_id, email).await {
            tracing::warn!(user_id = %claims.user_id, error = %e, "failed to record profile");
        }
        Ok(Self(claims))
    }
}
