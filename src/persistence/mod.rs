//! Persistence layer: device ownership, claim tokens, and push state.
//!
//! The hub consumes two collaborators through async traits:
//! [`DeviceStore`] (ownership and pairing) and [`PushStore`]
//! (subscriptions and notification preferences). [`PostgresStore`]
//! implements both over `sqlx::PgPool`; [`MemoryStore`] implements both in
//! process and backs tests and the persistence-disabled mode.

pub mod memory;
pub mod models;
pub mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use models::{
    ClaimTokenRecord, DeviceRecord, ProfileRecord, PushSubscription, SubscriptionKeys,
};
pub use postgres::PostgresStore;

use crate::domain::DeviceId;
use crate::error::StoreError;
use crate::push::{NotificationPreferences, PreferencesPatch};

/// Name given to a device claimed without one.
pub const DEFAULT_DEVICE_NAME: &str = "My Machine";

/// Device ownership, pairing, and user profile state.
#[async_trait]
pub trait DeviceStore: Send + Sync + Debug {
    /// Returns `true` if the device has a row.
    async fn device_exists(&self, device_id: &DeviceId) -> Result<bool, StoreError>;

    /// Returns `true` if `user_id` owns the device.
    async fn user_owns_device(&self, user_id: &str, device_id: &DeviceId)
    -> Result<bool, StoreError>;

    /// Returns `true` if the device has been claimed by anyone.
    async fn device_has_owner(&self, device_id: &DeviceId) -> Result<bool, StoreError>;

    /// Returns the digest of the provisioned device key, if one exists.
    async fn device_key(&self, device_id: &DeviceId) -> Result<Option<String>, StoreError>;

    /// Stores the claim token digest, replacing any outstanding one.
    async fn upsert_claim_token(
        &self,
        device_id: &DeviceId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns the outstanding claim token, if any.
    async fn claim_token(&self, device_id: &DeviceId)
    -> Result<Option<ClaimTokenRecord>, StoreError>;

    /// Sets the owner of an unowned (or unknown) device. Returns `None`
    /// without changes if the device already has an owner.
    async fn assign_owner(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Deletes the device's claim token.
    async fn delete_claim_token(&self, device_id: &DeviceId) -> Result<(), StoreError>;

    /// Lists the devices owned by the user, newest first.
    async fn user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>, StoreError>;

    /// Records a device's connection state and stamps `last_seen_at`.
    /// `firmware_version` is only written when given. Devices without a
    /// row are left alone.
    async fn update_device_status(
        &self,
        device_id: &DeviceId,
        online: bool,
        firmware_version: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Renames a device the user owns. Returns `None` if the user does not
    /// own it.
    async fn rename_device(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError>;

    /// Releases the user's ownership so the device can be claimed again.
    /// Returns `false` if the user did not own it.
    async fn remove_device(&self, device_id: &DeviceId, user_id: &str)
    -> Result<bool, StoreError>;

    /// Creates the user's profile on first sight and refreshes its email.
    async fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> Result<(), StoreError>;
}

/// Push subscriptions and per-user notification preferences.
#[async_trait]
pub trait PushStore: Send + Sync + Debug {
    /// Creates or updates the subscription keyed by `endpoint`.
    async fn upsert_subscription(
        &self,
        user_id: &str,
        device_id: Option<&DeviceId>,
        endpoint: &str,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscription, StoreError>;

    /// Deletes the subscription with the given endpoint. Returns `true` if
    /// a row was removed.
    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, StoreError>;

    /// Lists subscriptions scoped to the device.
    async fn subscriptions_for_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<PushSubscription>, StoreError>;

    /// Lists every subscription of the user.
    async fn subscriptions_for_user(&self, user_id: &str)
    -> Result<Vec<PushSubscription>, StoreError>;

    /// Returns the user's stored preferences without creating them.
    async fn preferences(&self, user_id: &str)
    -> Result<Option<NotificationPreferences>, StoreError>;

    /// Returns the user's preferences, creating the all-enabled default
    /// row on first access.
    async fn get_or_create_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreferences, StoreError>;

    /// Applies a partial patch and returns the resulting preferences.
    async fn update_preferences(
        &self,
        user_id: &str,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences, StoreError>;
}
