//! Push delivery transport.
//!
//! [`PushTransport`] abstracts one encrypted send to a push endpoint so the
//! dispatcher can be tested without a push service. [`WebPushTransport`]
//! is the production implementation: RFC 8291 payload encryption and
//! VAPID (RFC 8292) signing via `web-push`.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, URL_SAFE_NO_PAD, VapidSignatureBuilder,
    WebPushClient, WebPushError, WebPushMessageBuilder,
};

use super::VapidKeys;
use crate::persistence::PushSubscription;

/// Seconds a push service keeps an undelivered notification.
const PUSH_TTL_SECS: u32 = 24 * 60 * 60;

/// JSON document delivered to the service worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Icon URL.
    pub icon: String,
    /// Badge URL.
    pub badge: String,
    /// Collapse tag.
    pub tag: String,
    /// Keep visible until the user interacts.
    pub require_interaction: bool,
    /// Free-form data for the click handler.
    pub data: serde_json::Value,
}

/// Failure delivering to one subscription.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The endpoint is permanently gone (HTTP 404/410); the subscription
    /// should be deleted.
    #[error("push endpoint gone")]
    Gone,

    /// Any other failure. The subscription is kept.
    #[error("push delivery failed: {0}")]
    Failed(String),
}

/// Sends one encrypted notification to one subscription.
#[async_trait]
pub trait PushTransport: Send + Sync + fmt::Debug {
    /// Delivers `payload` to `subscription`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Gone`] for endpoints that no longer exist and
    /// [`PushError::Failed`] for everything else.
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// [`PushTransport`] backed by the `web-push` crate.
pub struct WebPushTransport {
    client: IsahcWebPushClient,
    keys: VapidKeys,
    subject: String,
}

impl WebPushTransport {
    /// Creates a transport that signs with `keys` and the VAPID `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Failed`] if the HTTP client cannot be built.
    pub fn new(keys: VapidKeys, subject: String) -> Result<Self, PushError> {
        let client = IsahcWebPushClient::new().map_err(|e| PushError::Failed(e.to_string()))?;
        Ok(Self {
            client,
            keys,
            subject,
        })
    }

    /// Public key clients subscribe with.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.keys.public_key
    }
}

impl fmt::Debug for WebPushTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPushTransport")
            .field("public_key", &self.keys.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

fn classify(err: WebPushError) -> PushError {
    match err {
        WebPushError::EndpointNotValid { .. } | WebPushError::EndpointNotFound { .. } => {
            PushError::Gone
        }
        other => PushError::Failed(other.to_string()),
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );
        let mut signer =
            VapidSignatureBuilder::from_base64(&self.keys.private_key, URL_SAFE_NO_PAD, &info)
                .map_err(classify)?;
        signer.add_claim("sub", self.subject.as_str());
        let signature = signer.build().map_err(classify)?;

        let body = serde_json::to_vec(payload).map_err(|e| PushError::Failed(e.to_string()))?;
        let mut message = WebPushMessageBuilder::new(&info);
        message.set_payload(ContentEncoding::Aes128Gcm, &body);
        message.set_vapid_signature(signature);
        message.set_ttl(PUSH_TTL_SECS);
        let message = message.build().map_err(classify)?;

        self.client.send(message).await.map_err(classify)
    }
}
