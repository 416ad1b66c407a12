//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::api::rate_limit::RateLimits;
use crate::auth::{ClaimTokens, TokenService};
use crate::config::HubConfig;
use crate::persistence::{DeviceStore, PushStore};
use crate::push::{NotificationDispatcher, PushTransport};
use crate::relay::{ClientProxy, DeviceRelay};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runtime configuration.
    pub config: Arc<HubConfig>,
    /// Device side of the relay.
    pub relay: Arc<DeviceRelay>,
    /// Client side of the relay.
    pub proxy: Arc<ClientProxy>,
    /// Bearer token issuer and verifier.
    pub tokens: Arc<TokenService>,
    /// Device pairing.
    pub claims: ClaimTokens,
    /// Ownership store.
    pub devices: Arc<dyn DeviceStore>,
    /// Subscription and preference store.
    pub push_store: Arc<dyn PushStore>,
    /// Push fan-out.
    pub dispatcher: NotificationDispatcher,
    /// VAPID public key served to browsers.
    pub vapid_public_key: Arc<str>,
    /// Per-address and per-user request limits.
    pub limits: Arc<RateLimits>,
}

impl AppState {
    /// Wires the relay, auth, and push services over the given stores and
    /// push transport.
    #[must_use]
    pub fn new(
        config: HubConfig,
        devices: Arc<dyn DeviceStore>,
        push_store: Arc<dyn PushStore>,
        transport: Arc<dyn PushTransport>,
        vapid_public_key: &str,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.token_ttl_secs));
        let relay = Arc::new(DeviceRelay::new(Arc::clone(&devices)));
        let proxy = Arc::new(ClientProxy::new(
            Arc::clone(&relay),
            Arc::clone(&tokens),
            Arc::clone(&devices),
            config.enforce_device_ownership,
        ));
        let claims = ClaimTokens::new(Arc::clone(&devices), config.claim_token_ttl_secs);
        let dispatcher = NotificationDispatcher::new(Arc::clone(&push_store), transport);
        let limits = Arc::new(RateLimits::from_config(&config));
        Self {
            config: Arc::new(config),
            relay,
            proxy,
            tokens,
            claims,
            devices,
            push_store,
            dispatcher,
            vapid_public_key: Arc::from(vapid_public_key),
            limits,
        }
    }
}
