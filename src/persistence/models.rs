//! Stored records for devices, claim tokens, and push subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::DeviceId;

/// A row from the `devices` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Hardware identifier.
    #[schema(value_type = String)]
    pub id: DeviceId,
    /// Owning user, if the device has been claimed.
    pub owner_id: Option<String>,
    /// Display name chosen at claim time.
    pub name: String,
    /// SHA-256 hex digest of the provisioned device key, if any.
    #[serde(skip)]
    pub key_hash: Option<String>,
    /// Firmware version last reported at connect time.
    pub firmware_version: Option<String>,
    /// Connection state last recorded by the relay.
    pub is_online: bool,
    /// Last recorded connect or disconnect.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// When the device was claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// A user known to the hub, created on first authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    /// User id from the bearer token.
    pub user_id: String,
    /// Email from the most recent token, if it carried one.
    pub email: Option<String>,
    /// First time the user was seen.
    pub created_at: DateTime<Utc>,
}

/// Outstanding pairing secret for one device. Only the digest is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTokenRecord {
    /// Device the token pairs.
    pub device_id: DeviceId,
    /// SHA-256 hex digest of the secret.
    pub token_hash: String,
    /// Instant after which the token is rejected.
    pub expires_at: DateTime<Utc>,
}

/// Encryption material of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionKeys {
    /// Client public key (base64url, uncompressed P-256 point).
    pub p256dh: String,
    /// Client authentication secret (base64url).
    pub auth: String,
}

/// A registered push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Subscription id.
    pub id: Uuid,
    /// Subscribing user.
    pub user_id: String,
    /// Device the subscription receives alerts for, if scoped.
    #[schema(value_type = Option<String>)]
    pub device_id: Option<DeviceId>,
    /// Push service endpoint URL; unique across subscriptions.
    pub endpoint: String,
    /// Payload encryption keys.
    pub keys: SubscriptionKeys,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}
