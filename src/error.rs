//! Hub error types with HTTP status code and WebSocket close code mapping.
//!
//! [`HubError`] is the central error type for the HTTP surface. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! [`RelayError`] describes why a WebSocket connection was refused and
//! carries the close code sent to the peer. [`StoreError`] wraps failures
//! of the ownership and push stores.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::relay::close_code;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "device not found: BRW-AABBCCDD",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`HubError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                   |
/// |-----------|-------------------|-------------------------------|
/// | 1000–1999 | Request           | 400 Bad Request / 429         |
/// | 2000–2999 | State/Not Found   | 404 Not Found / 409 Conflict  |
/// | 3000–3999 | Server            | 500 Internal Server Error     |
/// | 5000–5999 | Auth              | 401 Unauthorized / 403        |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Device identifier does not match the hardware id pattern.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    /// Device with the given ID is not known to the ownership store.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device exists but has no owner.
    #[error("device not claimed: {0}")]
    DeviceNotClaimed(String),

    /// Device already has an owner.
    #[error("device already claimed: {0}")]
    DeviceAlreadyClaimed(String),

    /// Bearer token or claim secret failed verification. The reason is
    /// deliberately not carried.
    #[error("invalid or expired token")]
    Unauthorized,

    /// Authenticated user may not act on the given device.
    #[error("device not owned by user")]
    Forbidden,

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Client exceeded rate limit.
    #[error("rate limit exceeded; retry after {retry_after_ms} ms")]
    RateLimited {
        /// Milliseconds until the client may retry.
        retry_after_ms: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidDeviceId(_) => 1002,
            Self::DeviceNotFound(_) => 2001,
            Self::DeviceNotClaimed(_) => 2002,
            Self::DeviceAlreadyClaimed(_) => 2003,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Unauthorized => 5001,
            Self::Forbidden => 5003,
            Self::RateLimited { .. } => 1029,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidDeviceId(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_) | Self::DeviceNotClaimed(_) => StatusCode::NOT_FOUND,
            Self::DeviceAlreadyClaimed(_) => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::PersistenceError(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Reason a relay WebSocket connection was refused at handshake time.
///
/// The variant determines the close code the peer observes; the close
/// reason text is terse and never says which part of verification failed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A required query parameter (`id`/`key` or `token`/`device`) was absent.
    #[error("missing connection parameters")]
    MissingParameters,

    /// Bearer token failed verification (signature, structure, or expiry).
    #[error("invalid or expired token")]
    InvalidToken,

    /// Presented device key did not match the provisioned key.
    #[error("invalid device key")]
    InvalidDeviceKey,

    /// Authenticated user is not permitted to access the requested device.
    #[error("not authorized for device")]
    NotAuthorized,

    /// Ownership store lookup failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Returns the WebSocket close code sent to the refused peer.
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::MissingParameters => close_code::MISSING_PARAMETERS,
            Self::InvalidToken => close_code::INVALID_TOKEN,
            Self::InvalidDeviceKey | Self::NotAuthorized => close_code::NOT_AUTHORIZED,
            Self::Store(_) => close_code::INTERNAL_ERROR,
        }
    }

    /// Returns the close reason text sent alongside the close code.
    #[must_use]
    pub const fn close_reason(&self) -> &'static str {
        match self {
            Self::MissingParameters => "Missing connection parameters",
            Self::InvalidToken => "Invalid or expired token",
            Self::InvalidDeviceKey => "Invalid device key",
            Self::NotAuthorized => "Not authorized for device",
            Self::Store(_) => "Internal error",
        }
    }
}

/// Failure in the ownership or push store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
