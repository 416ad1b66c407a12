//! Bearer token issuance and verification (HS256 JWT).
//!
//! Tokens carry `{ userId, email, iat, exp }`. Verification checks the
//! signature and then expiry against an explicit clock, and every failure
//! collapses to `None`: callers learn only that the token is not usable.

use std::fmt;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Authenticated user.
    pub user_id: String,
    /// User's email address.
    pub email: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// Signs and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl TokenService {
    /// Creates a service for `secret` issuing tokens valid for `ttl_secs`.
    #[must_use]
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked in `verify_at` against the caller's clock
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Issues a token for the user, valid from now.
    ///
    /// Returns `None` only if signing fails.
    #[must_use]
    pub fn issue(&self, user_id: &str, email: &str) -> Option<String> {
        self.issue_at(user_id, email, Utc::now().timestamp())
    }

    /// Issues a token as if the current time were `iat` (Unix seconds).
    #[must_use]
    pub fn issue_at(&self, user_id: &str, email: &str, iat: i64) -> Option<String> {
        let claims = TokenClaims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            iat,
            exp: iat.saturating_add(self.ttl_secs),
        };
        match encode(&Header::new(Algorithm::HS256), &claims, &self.encoding) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::error!(error = %e, "failed to sign bearer token");
                None
            }
        }
    }

    /// Verifies a token against the current time.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verifies a token as if the current time were `now` (Unix seconds).
    /// A token is valid while `now < exp`.
    #[must_use]
    pub fn verify_at(&self, token: &str, now: i64) -> Option<TokenClaims> {
        let claims = match decode::<TokenClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "bearer token rejected");
                return None;
            }
        };
        if now >= claims.exp {
            tracing::debug!(user_id = %claims.user_id, "bearer token expired");
            return None;
        }
        Some(claims)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
