//! In-process store used by tests and when persistence is disabled.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    ClaimTokenRecord, DeviceRecord, ProfileRecord, PushSubscription, SubscriptionKeys,
};
use super::{DEFAULT_DEVICE_NAME, DeviceStore, PushStore};
use crate::domain::DeviceId;
use crate::error::StoreError;
use crate::push::{NotificationPreferences, PreferencesPatch};

/// [`DeviceStore`] and [`PushStore`] kept in memory.
///
/// State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<BTreeMap<DeviceId, DeviceRecord>>,
    claim_tokens: RwLock<HashMap<DeviceId, ClaimTokenRecord>>,
    profiles: RwLock<HashMap<String, ProfileRecord>>,
    subscriptions: RwLock<Vec<PushSubscription>>,
    preferences: RwLock<HashMap<String, NotificationPreferences>>,
}

fn new_device(device_id: &DeviceId) -> DeviceRecord {
    DeviceRecord {
        id: device_id.clone(),
        owner_id: None,
        name: DEFAULT_DEVICE_NAME.to_string(),
        key_hash: None,
        firmware_version: None,
        is_online: false,
        last_seen_at: None,
        claimed_at: None,
        created_at: Utc::now(),
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device with an optional key digest, as provisioning
    /// would.
    pub async fn provision_device(&self, device_id: &DeviceId, key_hash: Option<String>) {
        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.clone())
            .or_insert_with(|| new_device(device_id))
            .key_hash = key_hash;
    }

    /// Marks `user_id` as the device's owner, registering it if needed.
    pub async fn set_owner(&self, device_id: &DeviceId, user_id: &str) {
        let mut devices = self.devices.write().await;
        let record = devices
            .entry(device_id.clone())
            .or_insert_with(|| new_device(device_id));
        record.owner_id = Some(user_id.to_string());
        record.claimed_at = Some(Utc::now());
    }

    /// Returns the device's row, if any.
    pub async fn device(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        self.devices.read().await.get(device_id).cloned()
    }

    /// Returns the user's profile, if one was created.
    pub async fn profile(&self, user_id: &str) -> Option<ProfileRecord> {
        self.profiles.read().await.get(user_id).cloned()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn device_exists(&self, device_id: &DeviceId) -> Result<bool, StoreError> {
        Ok(self.devices.read().await.contains_key(device_id))
    }

    async fn user_owns_device(
        &self,
        user_id: &str,
        device_id: &DeviceId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .get(device_id)
            .is_some_and(|d| d.owner_id.as_deref() == Some(user_id)))
    }

    async fn device_has_owner(&self, device_id: &DeviceId) -> Result<bool, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .get(device_id)
            .is_some_and(|d| d.owner_id.is_some()))
    }

    async fn device_key(&self, device_id: &DeviceId) -> Result<Option<String>, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .get(device_id)
            .and_then(|d| d.key_hash.clone()))
    }

    async fn upsert_claim_token(
        &self,
        device_id: &DeviceId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.claim_tokens.write().await.insert(
            device_id.clone(),
            ClaimTokenRecord {
                device_id: device_id.clone(),
                token_hash: token_hash.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn claim_token(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<ClaimTokenRecord>, StoreError> {
        Ok(self.claim_tokens.read().await.get(device_id).cloned())
    }

    async fn assign_owner(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let mut devices = self.devices.write().await;
        let record = devices
            .entry(device_id.clone())
            .or_insert_with(|| new_device(device_id));
        if record.owner_id.is_some() {
            return Ok(None);
        }
        record.owner_id = Some(user_id.to_string());
        record.name = name.to_string();
        record.claimed_at = Some(Utc::now());
        Ok(Some(record.clone()))
    }

    async fn delete_claim_token(&self, device_id: &DeviceId) -> Result<(), StoreError> {
        self.claim_tokens.write().await.remove(device_id);
        Ok(())
    }

    async fn user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let mut owned: Vec<DeviceRecord> = self
            .devices
            .read()
            .await
            .values()
            .filter(|d| d.owner_id.as_deref() == Some(user_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn update_device_status(
        &self,
        device_id: &DeviceId,
        online: bool,
        firmware_version: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.devices.write().await.get_mut(device_id) {
            record.is_online = online;
            record.last_seen_at = Some(Utc::now());
            if let Some(version) = firmware_version {
                record.firmware_version = Some(version.to_string());
            }
        }
        Ok(())
    }

    async fn rename_device(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let mut devices = self.devices.write().await;
        let Some(record) = devices
            .get_mut(device_id)
            .filter(|d| d.owner_id.as_deref() == Some(user_id))
        else {
            return Ok(None);
        };
        record.name = name.to_string();
        Ok(Some(record.clone()))
    }

    async fn remove_device(&self, device_id: &DeviceId, user_id: &str) -> Result<bool, StoreError> {
        let mut devices = self.devices.write().await;
        let Some(record) = devices
            .get_mut(device_id)
            .filter(|d| d.owner_id.as_deref() == Some(user_id))
        else {
            return Ok(false);
        };
        record.owner_id = None;
        record.claimed_at = None;
        Ok(true)
    }

    async fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| ProfileRecord {
                user_id: user_id.to_string(),
                email: None,
                created_at: Utc::now(),
            });
        if let Some(email) = email {
            profile.email = Some(email.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl PushStore for MemoryStore {
    async fn upsert_subscription(
        &self,
        user_id: &str,
        device_id: Option<&DeviceId>,
        endpoint: &str,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscription, StoreError> {
        let mut subs = self.subscriptions.write().await;
        if let Some(existing) = subs.iter_mut().find(|s| s.endpoint == endpoint) {
            existing.user_id = user_id.to_string();
            existing.device_id = device_id.cloned();
            existing.keys = keys.clone();
            return Ok(existing.clone());
        }
        let sub = PushSubscription {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            device_id: device_id.cloned(),
            endpoint: endpoint.to_string(),
            keys: keys.clone(),
            created_at: Utc::now(),
        };
        subs.push(sub.clone());
        Ok(sub)
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, StoreError> {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.endpoint != endpoint);
        Ok(subs.len() != before)
    }

    async fn subscriptions_for_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.device_id.as_ref() == Some(device_id))
            .cloned()
            .collect())
    }

    async fn subscriptions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreferences>, StoreError> {
        Ok(self.preferences.read().await.get(user_id).copied())
    }

    async fn get_or_create_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreferences, StoreError> {
        Ok(*self
            .preferences
            .write()
            .await
            .entry(user_id.to_string())
            .or_default())
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences, StoreError> {
        let mut prefs = self.preferences.write().await;
        let entry = prefs.entry(user_id.to_string()).or_default();
        entry.apply(patch);
        Ok(*entry)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::push::NotificationCategory;

    fn id(raw: &str) -> DeviceId {
        let Some(id) = DeviceId::parse(raw) else {
            panic!("valid id");
        };
        id
    }

    fn keys() -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: "p".to_string(),
            auth: "a".to_string(),
        }
    }

    #[tokio::test]
    async fn assign_owner_rejects_second_claim() {
        let store = MemoryStore::new();
        let device = id("BRW-AABBCCDD");
        let Ok(Some(record)) = store.assign_owner(&device, "alice", "Kitchen").await else {
            panic!("first claim succeeds");
        };
        assert_eq!(record.owner_id.as_deref(), Some("alice"));
        assert!(matches!(store.assign_owner(&device, "bob", "x").await, Ok(None)));
        assert!(matches!(store.user_owns_device("alice", &device).await, Ok(true)));
        assert!(matches!(store.user_owns_device("bob", &device).await, Ok(false)));
    }

    #[tokio::test]
    async fn rename_and_remove_require_ownership() {
        let store = MemoryStore::new();
        let device = id("BRW-AABBCCDD");
        store.set_owner(&device, "alice").await;

        assert!(matches!(store.rename_device(&device, "bob", "Mine").await, Ok(None)));
        let Ok(Some(renamed)) = store.rename_device(&device, "alice", "Office").await else {
            panic!("owner renames");
        };
        assert_eq!(renamed.name, "Office");

        assert!(matches!(store.remove_device(&device, "bob").await, Ok(false)));
        assert!(matches!(store.remove_device(&device, "alice").await, Ok(true)));
        assert!(matches!(store.device_has_owner(&device).await, Ok(false)));
        assert!(matches!(store.assign_owner(&device, "bob", "x").await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn status_updates_only_known_devices() {
        let store = MemoryStore::new();
        let known = id("BRW-AABBCCDD");
        let unknown = id("BRW-00000000");
        store.provision_device(&known, None).await;

        let _ = store.update_device_status(&known, true, Some("1.4.0")).await;
        let _ = store.update_device_status(&unknown, true, None).await;
        let _ = store.update_device_status(&known, false, None).await;

        let Some(record) = store.device(&known).await else {
            panic!("row exists");
        };
        assert!(!record.is_online);
        assert!(record.last_seen_at.is_some());
        assert_eq!(record.firmware_version.as_deref(), Some("1.4.0"));
        assert!(store.device(&unknown).await.is_none());
    }

    #[tokio::test]
    async fn profile_is_created_once_and_email_refreshed() {
        let store = MemoryStore::new();
        let _ = store.ensure_profile("alice", None).await;
        let Some(first) = store.profile("alice").await else {
            panic!("profile created");
        };
        let _ = store.ensure_profile("alice", Some("a@example.com")).await;
        let Some(second) = store.profile("alice").await else {
            panic!("profile kept");
        };
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn claim_token_is_upserted() {
        let store = MemoryStore::new();
        let device = id("BRW-AABBCCDD");
        let later = Utc::now();
        let _ = store.upsert_claim_token(&device, "one", later).await;
        let _ = store.upsert_claim_token(&device, "two", later).await;
        let Ok(Some(token)) = store.claim_token(&device).await else {
            panic!("token stored");
        };
        assert_eq!(token.token_hash, "two");
        let _ = store.delete_claim_token(&device).await;
        assert!(matches!(store.claim_token(&device).await, Ok(None)));
    }

    #[tokio::test]
    async fn subscriptions_are_keyed_by_endpoint() {
        let store = MemoryStore::new();
        let device = id("BRW-AABBCCDD");
        let _ = store
            .upsert_subscription("alice", Some(&device), "https://push/1", &keys())
            .await;
        let _ = store
            .upsert_subscription("alice", Some(&device), "https://push/1", &keys())
            .await;
        let _ = store
            .upsert_subscription("alice", None, "https://push/2", &keys())
            .await;

        let Ok(for_device) = store.subscriptions_for_device(&device).await else {
            panic!("query succeeds");
        };
        assert_eq!(for_device.len(), 1);
        let Ok(for_user) = store.subscriptions_for_user("alice").await else {
            panic!("query succeeds");
        };
        assert_eq!(for_user.len(), 2);
        assert!(matches!(store.delete_subscription("https://push/1").await, Ok(true)));
        assert!(matches!(store.delete_subscription("https://push/1").await, Ok(false)));
    }

    #[tokio::test]
    async fn preferences_are_created_lazily() {
        let store = MemoryStore::new();
        assert!(matches!(store.preferences("alice").await, Ok(None)));
        let Ok(prefs) = store.get_or_create_preferences("alice").await else {
            panic!("created");
        };
        assert_eq!(prefs, NotificationPreferences::default());

        let patch = PreferencesPatch::single(NotificationCategory::DescaleDue, false);
        let Ok(updated) = store.update_preferences("alice", &patch).await else {
            panic!("updated");
        };
        assert!(!updated.descale_due);
        assert!(updated.water_empty);
    }
}
