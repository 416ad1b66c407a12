//! VAPID application server keys.
//!
//! Keys come from configuration. Missing or placeholder-shaped keys are
//! replaced by a freshly generated P-256 pair that lives only as long as
//! the process. Only its public half is logged; subscriptions made against
//! it stop working when the process restarts.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::config::HubConfig;

/// Minimum length of a plausible base64url VAPID key.
const MIN_KEY_LEN: usize = 40;

/// A VAPID key pair, both halves base64url without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct VapidKeys {
    /// Uncompressed P-256 public point (65 bytes encoded).
    pub public_key: String,
    /// Raw 32-byte private scalar.
    pub private_key: String,
}

impl VapidKeys {
    /// Generates a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let public = secret.public_key().to_encoded_point(false);
        Self {
            public_key: URL_SAFE_NO_PAD.encode(public.as_bytes()),
            private_key: URL_SAFE_NO_PAD.encode(secret.to_bytes()),
        }
    }

    /// Returns `true` if `value` cannot be a real key: absent, a
    /// `your-...` template value, or too short.
    #[must_use]
    pub fn is_placeholder(value: Option<&str>) -> bool {
        value.is_none_or(|v| {
            let v = v.trim();
            v.starts_with("your-") || v.len() < MIN_KEY_LEN
        })
    }

    /// Loads the configured pair, generating one if either half is a
    /// placeholder.
    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        let public = config.vapid_public_key.as_deref();
        let private = config.vapid_private_key.as_deref();
        match (public, private) {
            (Some(public), Some(private))
                if !Self::is_placeholder(Some(public)) && !Self::is_placeholder(Some(private)) =>
            {
                Self {
                    public_key: public.trim().to_string(),
                    private_key: private.trim().to_string(),
                }
            }
            _ => {
                let keys = Self::generate();
                tracing::warn!(
                    vapid_public_key = %keys.public_key,
                    "{}",
                    generated_key_notice()
                );
                keys
            }
        }
    }
}

/// Operator guidance logged alongside a generated public key.
fn generated_key_notice() -> &'static str {
    "VAPID keys not configured; generated a temporary pair for this process. \
     Generate a persistent P-256 pair (for example `npx web-push generate-vapid-keys`) \
     and set VAPID_PUBLIC_KEY and VAPID_PRIVATE_KEY to keep subscriptions valid"
}

impl fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
