//! Push subscription, preference, and notify DTOs.
//!
//! Request fields are optional at the serde level so that missing fields
//! surface as `400` validation errors from the handlers rather than as
//! extractor rejections.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::persistence::{PushSubscription, SubscriptionKeys};
use crate::push::{NotificationPreferences, PreferencesPatch};

/// Response body for `GET /api/push/vapid-key`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeyResponse {
    /// Application server key browsers subscribe with.
    pub public_key: String,
}

/// Browser `PushSubscription` JSON as produced by `subscription.toJSON()`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SubscriptionBody {
    /// Push service endpoint URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Payload encryption keys.
    #[serde(default)]
    pub keys: Option<SubscriptionKeys>,
}

/// Request body for `POST /api/push/subscribe`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Subscription to register.
    #[serde(default)]
    pub subscription: Option<SubscriptionBody>,
    /// Device to receive alerts for; must be owned by the caller.
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Response body for `POST /api/push/subscribe`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscribeResponse {
    /// Always `true`.
    pub success: bool,
    /// The stored subscription.
    pub subscription: PushSubscription,
}

/// Request body for `POST /api/push/unsubscribe`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UnsubscribeRequest {
    /// Subscription to remove; only `endpoint` is read.
    #[serde(default)]
    pub subscription: Option<SubscriptionBody>,
}

/// Bare `{success}` acknowledgement.
#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    /// Whether the operation took effect.
    pub success: bool,
}

/// Response body for `GET /api/push/subscriptions`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionListResponse {
    /// The caller's subscriptions.
    pub subscriptions: Vec<PushSubscription>,
}

/// Response body for `GET /api/push/preferences`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PreferencesResponse {
    /// The caller's notification preferences.
    pub preferences: NotificationPreferences,
}

/// Request body for `PUT /api/push/preferences`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdatePreferencesRequest {
    /// Flags to change; absent flags keep their value.
    #[serde(default)]
    pub preferences: Option<PreferencesPatch>,
}

/// Response body for `PUT /api/push/preferences`.
#[derive(Debug, Serialize, ToSchema)]
pub struct UpdatePreferencesResponse {
    /// Always `true`.
    pub success: bool,
    /// Preferences after the update.
    pub preferences: NotificationPreferences,
}

/// Notification content reported by a device.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NotificationBody {
    /// Category, e.g. `WATER_EMPTY`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Optional body text overriding the category template.
    #[serde(default)]
    pub message: Option<String>,
}

/// Request body for `POST /api/push/notify`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// Canonical hardware id of the reporting device.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Notification content.
    #[serde(default)]
    pub notification: Option<NotificationBody>,
}

/// Response body for `POST /api/push/notify`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    /// Always `true`; delivery is best effort.
    pub success: bool,
    /// Number of subscriptions the notification was delivered to.
    pub sent_count: usize,
}
