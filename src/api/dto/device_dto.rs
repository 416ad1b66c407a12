//! Device listing and pairing DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::DeviceSnapshot;
use crate::persistence::DeviceRecord;

/// Response body for `GET /api/devices`.
#[derive(Debug, Serialize, ToSchema)]
pub struct OwnedDeviceListResponse {
    /// The caller's devices, newest claim first. `isOnline` reflects the
    /// live relay connection.
    pub devices: Vec<DeviceRecord>,
}

/// Response body for `GET /api/devices/connected`.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceListResponse {
    /// Currently connected devices visible to the caller.
    pub devices: Vec<DeviceSnapshot>,
}

/// Request body for `PATCH /api/devices/{id}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RenameDeviceRequest {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Response body for `PATCH /api/devices/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RenameDeviceResponse {
    /// Always `true`.
    pub success: bool,
    /// The renamed device.
    pub device: DeviceRecord,
}

/// Request body for `POST /api/devices/claim-token`, sent by a device.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTokenRequest {
    /// Canonical hardware id (`BRW-XXXXXXXX`).
    #[serde(default)]
    pub device_id: Option<String>,
    /// Pairing secret shown to the user.
    #[serde(default)]
    pub token: Option<String>,
    /// Device key; required when the device has a provisioned key.
    #[serde(default)]
    pub key: Option<String>,
}

/// Response body for `POST /api/devices/claim-token`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTokenResponse {
    /// Always `true`.
    pub success: bool,
    /// Instant after which the secret is rejected.
    pub expires_at: DateTime<Utc>,
}

/// Request body for `POST /api/devices/claim`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDeviceRequest {
    /// Canonical hardware id.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Pairing secret read from the device.
    #[serde(default)]
    pub token: Option<String>,
    /// Display name; defaults to a generic name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Response body for `POST /api/devices/claim`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClaimDeviceResponse {
    /// Always `true`.
    pub success: bool,
    /// The device as now owned by the caller.
    pub device: DeviceRecord,
}
