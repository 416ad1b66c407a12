//! Device pairing (claim) tokens.
//!
//! A device generates a random secret, shows it to the user (as a QR code)
//! and registers its SHA-256 digest with the hub. The user then presents
//! the secret to claim the device. Only the digest is ever stored, at most
//! one token exists per device, and a successful claim consumes it.
//!
//! Verification checks expiry first and then compares digests in constant
//! time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::domain::DeviceId;
use crate::error::HubError;
use crate::persistence::{DeviceRecord, DeviceStore};

/// Registers, verifies, and redeems claim tokens.
#[derive(Debug, Clone)]
pub struct ClaimTokens {
    store: Arc<dyn DeviceStore>,
    ttl: Duration,
}

impl ClaimTokens {
    /// Creates a claim service whose tokens expire after `ttl_secs`.
    #[must_use]
    pub fn new(store: Arc<dyn DeviceStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(i64::from(u32::try_from(ttl_secs).unwrap_or(u32::MAX))),
        }
    }

    /// Generates a random 32-byte secret, hex encoded.
    #[must_use]
    pub fn generate() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Returns the SHA-256 hex digest of `secret`.
    #[must_use]
    pub fn hash(secret: &str) -> String {
        hex::encode(Sha256::digest(secret.as_bytes()))
    }

    /// Stores the digest of `secret` for the device, replacing any
    /// outstanding token. Returns the expiry.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::PersistenceError`] on store failure.
    pub async fn register(
        &self,
        device_id: &DeviceId,
        secret: &str,
    ) -> Result<DateTime<Utc>, HubError> {
        let expires_at = Utc::now() + self.ttl;
        self.store
            .upsert_claim_token(device_id, &Self::hash(secret), expires_at)
            .await?;
        tracing::info!(device_id = %device_id, %expires_at, "claim token registered");
        Ok(expires_at)
    }

    /// Returns `true` if `secret` matches the device's unexpired token.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::PersistenceError`] on store failure.
    pub async fn verify(&self, device_id: &DeviceId, secret: &str) -> Result<bool, HubError> {
        self.verify_at(device_id, secret, Utc::now()).await
    }

    /// [`ClaimTokens::verify`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::PersistenceError`] on store failure.
    pub async fn verify_at(
        &self,
        device_id: &DeviceId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, HubError> {
        let Some(record) = self.store.claim_token(device_id).await? else {
            return Ok(false);
        };
        if record.expires_at <= now {
            return Ok(false);
        }
        Ok(digests_match(&Self::hash(secret), &record.token_hash))
    }

    /// Claims the device for `user_id` after verifying `secret`, then
    /// deletes the token.
    ///
    /// # Errors
    ///
    /// - [`HubError::Unauthorized`] if the secret is wrong or expired.
    /// - [`HubError::DeviceAlreadyClaimed`] if someone owns the device.
    /// - [`HubError::PersistenceError`] on store failure.
    pub async fn claim(
        &self,
        device_id: &DeviceId,
        user_id: &str,
        name: &str,
        secret: &str,
    ) -> Result<DeviceRecord, HubError> {
        if !self.verify(device_id, secret).await? {
            tracing::warn!(device_id = %device_id, user_id, "claim rejected");
            return Err(HubError::Unauthorized);
        }
        let Some(record) = self.store.assign_owner(device_id, user_id, name).await? else {
            return Err(HubError::DeviceAlreadyClaimed(device_id.to_string()));
        };
        self.store.delete_claim_token(device_id).await?;
        tracing::info!(device_id = %device_id, user_id, "device claimed");
        Ok(record)
    }
}

/// Compares two digests in constant time. Inputs of different length never
/// match.
#[must_use]
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn device() -> DeviceId {
        let Some(id) = DeviceId::parse_canonical("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        id
    }

    fn service() -> (ClaimTokens, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tokens = ClaimTokens::new(Arc::clone(&store) as Arc<dyn DeviceStore>, 600);
        (tokens, store)
    }

    #[test]
    fn generated_secret_is_64_hex_chars() {
        let secret = ClaimTokens::generate();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, ClaimTokens::generate());
    }

    fn flip_at(digest: &str, pos: usize) -> String {
        digest
            .chars()
            .enumerate()
            .map(|(i, c)| match (i == pos, c) {
                (true, '0') => '1',
                (true, _) => '0',
                (false, c) => c,
            })
            .collect()
    }

    #[test]
    fn digests_match_rejects_any_differing_byte() {
        let base = ClaimTokens::hash("secret");
        let first = flip_at(&base, 0);
        let last = flip_at(&base, base.len() - 1);

        assert!(digests_match(&base, &base));
        assert!(!digests_match(&base, &first));
        assert!(!digests_match(&base, &last));
    }

    #[test]
    fn digests_match_rejects_unequal_lengths() {
        let base = ClaimTokens::hash("secret");
        let prefix = base.get(..base.len() - 1).unwrap_or_default();
        let extended = format!("{base}0");

        assert!(!digests_match(&base, prefix));
        assert!(!digests_match(prefix, &base));
        assert!(!digests_match(&base, &extended));
        assert!(!digests_match(&base, ""));
        assert!(digests_match("", ""));
    }

    #[tokio::test]
    async fn verify_checks_secret_and_expiry() {
        let (claims, _store) = service();
        let secret = ClaimTokens::generate();
        let Ok(expires_at) = claims.register(&device(), &secret).await else {
            panic!("register succeeds");
        };

        assert!(matches!(claims.verify(&device(), &secret).await, Ok(true)));
        assert!(matches!(claims.verify(&device(), "wrong").await, Ok(false)));
        assert!(matches!(
            claims.verify_at(&device(), &secret, expires_at).await,
            Ok(false)
        ));
    }

    #[tokio::test]
    async fn reregistering_replaces_previous_secret() {
        let (claims, _store) = service();
        let _ = claims.register(&device(), "first").await;
        let _ = claims.register(&device(), "second").await;
        assert!(matches!(claims.verify(&device(), "first").await, Ok(false)));
        assert!(matches!(claims.verify(&device(), "second").await, Ok(true)));
    }

    #[tokio::test]
    async fn claim_consumes_token() {
        let (claims, store) = service();
        let _ = claims.register(&device(), "secret").await;

        let Ok(record) = claims.claim(&device(), "alice", "Kitchen", "secret").await else {
            panic!("claim succeeds");
        };
        assert_eq!(record.owner_id.as_deref(), Some("alice"));
        assert!(matches!(store.claim_token(&device()).await, Ok(None)));
        assert!(matches!(
            claims.claim(&device(), "alice", "Kitchen", "secret").await,
            Err(HubError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn claim_rejects_owned_device() {
        let (claims, store) = service();
        store.set_owner(&device(), "bob").await;
        let _ = claims.register(&device(), "secret").await;
        assert!(matches!(
            claims.claim(&device(), "alice", "Kitchen", "secret").await,
            Err(HubError::DeviceAlreadyClaimed(_))
        ));
        assert!(matches!(store.user_owns_device("bob", &device()).await, Ok(true)));
    }
}
