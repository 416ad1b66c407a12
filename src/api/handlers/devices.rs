//! Device handlers: owned-device management, connected-device listing,
//! and pairing.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};

use crate::api::dto::{
    ClaimDeviceRequest, ClaimDeviceResponse, ClaimTokenRequest, ClaimTokenResponse,
    DeviceListResponse, OwnedDeviceListResponse, RenameDeviceRequest, RenameDeviceResponse,
    SuccessResponse,
};
use crate::app_state::AppState;
use crate::auth::{AuthUser, ClaimTokens, claim::digests_match};
use crate::domain::DeviceId;
use crate::error::{ErrorResponse, HubError};
use crate::persistence::DEFAULT_DEVICE_NAME;

/// Longest accepted device display name, in characters.
const MAX_DEVICE_NAME_CHARS: usize = 100;

/// Parses a required canonical device id from a request field.
fn canonical_id(raw: Option<&str>) -> Result<DeviceId, HubError> {
    let raw = raw.ok_or_else(|| HubError::InvalidRequest("deviceId is required".to_string()))?;
    DeviceId::parse_canonical(raw).ok_or_else(|| HubError::InvalidDeviceId(raw.to_string()))
}

/// Returns a required, non-blank string field.
fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, HubError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HubError::InvalidRequest(format!("{field} is required")))
}

/// `GET /api/devices`: The caller's devices.
///
/// # Errors
///
/// Returns [`HubError`] on authentication or store failure.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "Devices",
    summary = "List owned devices",
    description = "Returns every device the caller has claimed, with its name, firmware version, and whether it is connected to the relay right now.",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Owned devices", body = OwnedDeviceListResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn list_owned_devices(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_read.enforce("devices", user.user_id()).await?;
    let mut devices = state.devices.user_devices(user.user_id()).await?;
    for device in &mut devices {
        device.is_online = state.relay.is_connected(&device.id);
    }
    Ok((StatusCode::OK, Json(OwnedDeviceListResponse { devices })))
}

/// `GET /api/devices/connected`: Connected devices visible to the caller.
///
/// # Errors
///
/// Returns [`HubError`] on authentication or store failure.
#[utoipa::path(
    get,
    path = "/api/devices/connected",
    tag = "Devices",
    summary = "List connected devices",
    description = "Returns the devices with a live relay connection. When ownership is enforced only the caller's devices are listed.",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connected devices", body = DeviceListResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
    )
)]
pub async fn list_connected_devices(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, HubError> {
    let mut devices = state.relay.snapshot();
    if state.config.enforce_device_ownership {
        let owned: HashSet<DeviceId> = state
            .devices
            .user_devices(user.user_id())
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect();
        devices.retain(|snapshot| owned.contains(&snapshot.id));
    }
    devices.sort_by(|a, b| a.id.cmp(&b.id));
    Ok((StatusCode::OK, Json(DeviceListResponse { devices })))
}

/// `PATCH /api/devices/{id}`: Rename one of the caller's devices.
///
/// # Errors
///
/// Returns [`HubError`] on validation, a device the caller does not own,
/// or store failure.
#[utoipa::path(
    patch,
    path = "/api/devices/{id}",
    tag = "Devices",
    summary = "Rename a device",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Canonical device id")),
    request_body = RenameDeviceRequest,
    responses(
        (status = 200, description = "Device renamed", body = RenameDeviceResponse),
        (status = 400, description = "Missing or overlong name, or malformed device id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Device not owned by caller", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn rename_device(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
    Json(req): Json<RenameDeviceRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_write.enforce("rename_device", user.user_id()).await?;
    let device_id = canonical_id(Some(raw_id.as_str()))?;
    let name = required(req.name.as_deref(), "name")?;
    if name.chars().count() > MAX_DEVICE_NAME_CHARS {
        return Err(HubError::InvalidRequest(format!(
            "name must be at most {MAX_DEVICE_NAME_CHARS} characters"
        )));
    }
    let mut device = state
        .devices
        .rename_device(&device_id, user.user_id(), name)
        .await?
        .ok_or_else(|| HubError::DeviceNotFound(device_id.to_string()))?;
    device.is_online = state.relay.is_connected(&device.id);
    tracing::info!(user_id = user.user_id(), device_id = %device_id, "device renamed");
    Ok((
        StatusCode::OK,
        Json(RenameDeviceResponse {
            success: true,
            device,
        }),
    ))
}

/// `DELETE /api/devices/{id}`: Release one of the caller's devices.
///
/// # Errors
///
/// Returns [`HubError`] on a device the caller does not own or store
/// failure.
#[utoipa::path(
    delete,
    path = "/api/devices/{id}",
    tag = "Devices",
    summary = "Remove a device",
    description = "Clears the caller's ownership. The device stays registered and can be claimed again with a fresh pairing secret.",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Canonical device id")),
    responses(
        (status = 200, description = "Device removed", body = SuccessResponse),
        (status = 400, description = "Malformed device id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 404, description = "Device not owned by caller", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn remove_device(
    State(state): State<AppState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_write.enforce("remove_device", user.user_id()).await?;
    let device_id = canonical_id(Some(raw_id.as_str()))?;
    if !state.devices.remove_device(&device_id, user.user_id()).await? {
        return Err(HubError::DeviceNotFound(device_id.to_string()));
    }
    tracing::info!(user_id = user.user_id(), device_id = %device_id, "device removed");
    Ok((StatusCode::OK, Json(SuccessResponse { success: true })))
}

/// `POST /api/devices/claim-token`: Register a pairing secret.
///
/// # Errors
///
/// Returns [`HubError`] on validation, key mismatch, or store failure.
#[utoipa::path(
    post,
    path = "/api/devices/claim-token",
    tag = "Devices",
    summary = "Register a claim token",
    description = "Called by a device to register the digest of the pairing secret it displays. Replaces any outstanding token for the device.",
    request_body = ClaimTokenRequest,
    responses(
        (status = 200, description = "Token registered", body = ClaimTokenResponse),
        (status = 400, description = "Missing fields or malformed device id", body = ErrorResponse),
        (status = 401, description = "Device key mismatch", body = ErrorResponse),
    )
)]
pub async fn register_claim_token(
    State(state): State<AppState>,
    Json(req): Json<ClaimTokenRequest>,
) -> Result<impl IntoResponse, HubError> {
    let device_id = canonical_id(req.device_id.as_deref())?;
    let secret = required(req.token.as_deref(), "token")?;
    if let Some(expected) = state.devices.device_key(&device_id).await? {
        let presented = req.key.as_deref().map(ClaimTokens::hash).unwrap_or_default();
        if !digests_match(&presented, &expected) {
            tracing::warn!(device_id = %device_id, "claim token rejected: device key mismatch");
            return Err(HubError::Unauthorized);
        }
    }
    let expires_at = state.claims.register(&device_id, secret).await?;
    Ok((
        StatusCode::OK,
        Json(ClaimTokenResponse {
            success: true,
            expires_at,
        }),
    ))
}

/// `POST /api/devices/claim`: Claim a device with its pairing secret.
///
/// # Errors
///
/// Returns [`HubError`] on validation, bad secret, existing owner, or store
/// failure.
#[utoipa::path(
    post,
    path = "/api/devices/claim",
    tag = "Devices",
    summary = "Claim a device",
    description = "Assigns the device to the caller if the pairing secret matches an unexpired token. The token is consumed.",
    security(("bearer_auth" = [])),
    request_body = ClaimDeviceRequest,
    responses(
        (status = 200, description = "Device claimed", body = ClaimDeviceResponse),
        (status = 400, description = "Missing fields or malformed device id", body = ErrorResponse),
        (status = 401, description = "Invalid bearer token or pairing secret", body = ErrorResponse),
        (status = 409, description = "Device already has an owner", body = ErrorResponse),
    )
)]
pub async fn claim_device(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ClaimDeviceRequest>,
) -> Result<impl IntoResponse, HubError> {
    let device_id = canonical_id(req.device_id.as_deref())?;
    let secret = required(req.token.as_deref(), "token")?;
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_DEVICE_NAME);
    let device = state
        .claims
        .claim(&device_id, user.user_id(), name, secret)
        .await?;
    Ok((
        StatusCode::OK,
        Json(ClaimDeviceResponse {
            success: true,
            device,
        }),
    ))
}

/// Device routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/devices", get(list_owned_devices))
        .route("/api/devices/connected", get(list_connected_devices))
        .route("/api/devices/claim-token", post(register_claim_token))
        .route("/api/devices/claim", post(claim_device))
        .route(
            "/api/devices/{id}",
            patch(rename_device).delete(remove_device),
        )
}
