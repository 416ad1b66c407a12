//! PostgreSQL implementation of the ownership and push stores.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{ClaimTokenRecord, DeviceRecord, PushSubscription, SubscriptionKeys};
use super::{DeviceStore, PushStore};
use crate::config::HubConfig;
use crate::domain::DeviceId;
use crate::error::StoreError;
use crate::push::{NotificationPreferences, PreferencesPatch};

type DeviceRow = (
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    bool,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

type SubscriptionRow = (
    Uuid,
    String,
    Option<String>,
    String,
    String,
    String,
    DateTime<Utc>,
);

type PreferencesRow = (bool, bool, bool, bool, bool, bool, bool, bool, bool);

const DEVICE_COLUMNS: &str = "id, owner_id, name, key_hash, firmware_version, is_online, \
     last_seen_at, claimed_at, created_at";
const SUBSCRIPTION_COLUMNS: &str = "id, user_id, device_id, endpoint, p256dh, auth, created_at";
const PREFERENCE_COLUMNS: &str = "machine_ready, water_empty, descale_due, service_due, \
     backflush_due, machine_error, pico_offline, schedule_triggered, brew_complete";

fn device_from_row(row: DeviceRow) -> Option<DeviceRecord> {
    let (
        id,
        owner_id,
        name,
        key_hash,
        firmware_version,
        is_online,
        last_seen_at,
        claimed_at,
        created_at,
    ) = row;
    let Some(id) = DeviceId::parse(&id) else {
        tracing::warn!(device_id = %id, "skipping device row with invalid id");
        return None;
    };
    Some(DeviceRecord {
        id,
        owner_id,
        name,
        key_hash,
        firmware_version,
        is_online,
        last_seen_at,
        claimed_at,
        created_at,
    })
}

fn subscription_from_row(row: SubscriptionRow) -> PushSubscription {
    let (id, user_id, device_id, endpoint, p256dh, auth, created_at) = row;
    PushSubscription {
        id,
        user_id,
        device_id: device_id.as_deref().and_then(DeviceId::parse),
        endpoint,
        keys: SubscriptionKeys { p256dh, auth },
        created_at,
    }
}

const fn preferences_from_row(row: PreferencesRow) -> NotificationPreferences {
    let (
        machine_ready,
        water_empty,
        descale_due,
        service_due,
        backflush_due,
        machine_error,
        pico_offline,
        schedule_triggered,
        brew_complete,
    ) = row;
    NotificationPreferences {
        machine_ready,
        water_empty,
        descale_due,
        service_due,
        backflush_due,
        machine_error,
        pico_offline,
        schedule_triggered,
        brew_complete,
    }
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the database settings in `config` and applies the
    /// embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the pool cannot connect or a migration
    /// fails.
    pub async fn connect(config: &HubConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DeviceStore for PostgresStore {
    async fn device_exists(&self, device_id: &DeviceId) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM devices WHERE id = $1)",
        )
        .bind(device_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn user_owns_device(
        &self,
        user_id: &str,
        device_id: &DeviceId,
    ) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM devices WHERE id = $1 AND owner_id = $2)",
        )
        .bind(device_id.as_str())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn device_has_owner(&self, device_id: &DeviceId) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM devices WHERE id = $1 AND owner_id IS NOT NULL)",
        )
        .bind(device_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn device_key(&self, device_id: &DeviceId) -> Result<Option<String>, StoreError> {
        let key = sqlx::query_scalar::<_, Option<String>>(
            "SELECT key_hash FROM devices WHERE id = $1",
        )
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(key.flatten())
    }

    async fn upsert_claim_token(
        &self,
        device_id: &DeviceId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO device_claim_tokens (device_id, token_hash, expires_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (device_id) DO UPDATE \
             SET token_hash = EXCLUDED.token_hash, expires_at = EXCLUDED.expires_at",
        )
        .bind(device_id.as_str())
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_token(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<ClaimTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
            "SELECT token_hash, expires_at FROM device_claim_tokens WHERE device_id = $1",
        )
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(token_hash, expires_at)| ClaimTokenRecord {
            device_id: device_id.clone(),
            token_hash,
            expires_at,
        }))
    }

    async fn assign_owner(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        // The conditional update makes two concurrent claims race safely.
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "INSERT INTO devices (id, owner_id, name, claimed_at) VALUES ($1, $2, $3, now()) \
             ON CONFLICT (id) DO UPDATE \
             SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name, \
                 claimed_at = EXCLUDED.claimed_at, updated_at = now() \
             WHERE devices.owner_id IS NULL \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(device_id.as_str())
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(device_from_row))
    }

    async fn delete_claim_token(&self, device_id: &DeviceId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM device_claim_tokens WHERE device_id = $1")
            .bind(device_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_devices(&self, user_id: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        let rows = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE owner_id = $1 \
             ORDER BY created_at DESC, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(device_from_row).collect())
    }

    async fn update_device_status(
        &self,
        device_id: &DeviceId,
        online: bool,
        firmware_version: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE devices SET is_online = $2, last_seen_at = now(), \
             firmware_version = COALESCE($3, firmware_version), updated_at = now() \
             WHERE id = $1",
        )
        .bind(device_id.as_str())
        .bind(online)
        .bind(firmware_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rename_device(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
    ) -> Result<Option<DeviceRecord>, StoreError> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "UPDATE devices SET name = $3, updated_at = now() \
             WHERE id = $1 AND owner_id = $2 \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(device_id.as_str())
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(device_from_row))
    }

    async fn remove_device(&self, device_id: &DeviceId, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE devices SET owner_id = NULL, claimed_at = NULL, updated_at = now() \
             WHERE id = $1 AND owner_id = $2",
        )
        .bind(device_id.as_str())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO profiles (id, email) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE \
             SET email = COALESCE(EXCLUDED.email, profiles.email), updated_at = now()",
        )
        .bind(user_id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PushStore for PostgresStore {
    async fn upsert_subscription(
        &self,
        user_id: &str,
        device_id: Option<&DeviceId>,
        endpoint: &str,
        keys: &SubscriptionKeys,
    ) -> Result<PushSubscription, StoreError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "INSERT INTO push_subscriptions (id, user_id, device_id, endpoint, p256dh, auth) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (endpoint) DO UPDATE \
             SET user_id = EXCLUDED.user_id, device_id = EXCLUDED.device_id, \
                 p256dh = EXCLUDED.p256dh, auth = EXCLUDED.auth, updated_at = now() \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(device_id.map(DeviceId::as_str))
        .bind(endpoint)
        .bind(&keys.p256dh)
        .bind(&keys.auth)
        .fetch_one(&self.pool)
        .await?;
        Ok(subscription_from_row(row))
    }

    async fn delete_subscription(&self, endpoint: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn subscriptions_for_device(
        &self,
        device_id: &DeviceId,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE device_id = $1"
        ))
        .bind(device_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(subscription_from_row).collect())
    }

    async fn subscriptions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM push_subscriptions WHERE user_id = $1 \
             ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(subscription_from_row).collect())
    }

    async fn preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreferences>, StoreError> {
        let row = sqlx::query_as::<_, PreferencesRow>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(preferences_from_row))
    }

    async fn get_or_create_preferences(
        &self,
        user_id: &str,
    ) -> Result<NotificationPreferences, StoreError> {
        // The no-op update makes RETURNING yield the existing row.
        let row = sqlx::query_as::<_, PreferencesRow>(&format!(
            "INSERT INTO notification_preferences (user_id) VALUES ($1) \
             ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING {PREFERENCE_COLUMNS}"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(preferences_from_row(row))
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        patch: &PreferencesPatch,
    ) -> Result<NotificationPreferences, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO notification_preferences (user_id) VALUES ($1) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        let row = sqlx::query_as::<_, PreferencesRow>(&format!(
            "SELECT {PREFERENCE_COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let mut prefs = preferences_from_row(row);
        prefs.apply(patch);
        sqlx::query(
            "UPDATE notification_preferences SET \
             machine_ready = $2, water_empty = $3, descale_due = $4, service_due = $5, \
             backflush_due = $6, machine_error = $7, pico_offline = $8, \
             schedule_triggered = $9, brew_complete = $10, updated_at = now() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(prefs.machine_ready)
        .bind(prefs.water_empty)
        .bind(prefs.descale_due)
        .bind(prefs.service_due)
        .bind(prefs.backflush_due)
        .bind(prefs.machine_error)
        .bind(prefs.pico_offline)
        .bind(prefs.schedule_triggered)
        .bind(prefs.brew_complete)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(prefs)
    }
}
