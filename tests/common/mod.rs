//! Shared fixtures for the integration tests: an in-memory hub with a
//! recording push transport.

#![allow(dead_code, clippy::panic)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use relay_hub::app_state::AppState;
use relay_hub::auth::TokenService;
use relay_hub::config::HubConfig;
use relay_hub::domain::DeviceId;
use relay_hub::persistence::{DeviceStore, MemoryStore, PushStore, PushSubscription};
use relay_hub::push::{PushError, PushPayload, PushTransport};
use relay_hub::server::build_app;

/// Canonical id used throughout the tests.
pub const DEVICE: &str = "BRW-AABBCCDD";

/// Owner of [`DEVICE`] in ownership-enforcing fixtures.
pub const OWNER: &str = "user-1";

/// Push transport that records every send instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, PushPayload)>>,
}

impl RecordingTransport {
    /// Endpoints and payloads sent so far.
    pub fn sent(&self) -> Vec<(String, PushPayload)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subscription.endpoint.clone(), payload.clone()));
        Ok(())
    }
}

/// A wired hub over an in-memory store.
#[derive(Debug)]
pub struct Hub {
    /// Application state handed to the router.
    pub state: AppState,
    /// Backing store, for seeding.
    pub store: Arc<MemoryStore>,
    /// Records push sends.
    pub transport: Arc<RecordingTransport>,
    /// Issues bearer tokens accepted by the hub.
    pub tokens: TokenService,
}

/// Parses [`DEVICE`].
pub fn device() -> DeviceId {
    let Some(id) = DeviceId::parse_canonical(DEVICE) else {
        panic!("valid device id");
    };
    id
}

/// Configuration used by [`hub`]: a low notify limit so tests can hit it.
pub fn test_config(enforce_ownership: bool) -> HubConfig {
    HubConfig {
        enforce_device_ownership: enforce_ownership,
        notify_rate_limit: 3,
        ..HubConfig::default()
    }
}

/// Builds a hub. With `enforce_ownership`, [`DEVICE`] is owned by
/// [`OWNER`].
pub async fn hub(enforce_ownership: bool) -> Hub {
    hub_with(test_config(enforce_ownership)).await
}

/// Builds a hub from `config`. When it enforces ownership, [`DEVICE`] is
/// owned by [`OWNER`].
pub async fn hub_with(config: HubConfig) -> Hub {
    let enforce_ownership = config.enforce_device_ownership;
    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl_secs);
    let store = Arc::new(MemoryStore::new());
    if enforce_ownership {
        store.set_owner(&device(), OWNER).await;
    }
    let transport = Arc::new(RecordingTransport::default());
    let state = AppState::new(
        config,
        Arc::clone(&store) as Arc<dyn DeviceStore>,
        Arc::clone(&store) as Arc<dyn PushStore>,
        Arc::clone(&transport) as Arc<dyn PushTransport>,
        "test-public-key",
    );
    Hub {
        state,
        store,
        transport,
        tokens,
    }
}

/// Issues a bearer token for `user_id`.
pub fn token(hub: &Hub, user_id: &str) -> String {
    let Some(token) = hub.tokens.issue(user_id, "user@example.com") else {
        panic!("token issued");
    };
    token
}

/// Serves the hub on an ephemeral loopback port.
pub async fn serve(hub: &Hub) -> SocketAddr {
    let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind loopback");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    let app = build_app(hub.state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}
