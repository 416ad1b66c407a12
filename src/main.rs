//! relay-hub server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use relay_hub::app_state::AppState;
use relay_hub::config::HubConfig;
use relay_hub::persistence::{DeviceStore, MemoryStore, PostgresStore, PushStore};
use relay_hub::push::{PushTransport, VapidKeys, WebPushTransport};
use relay_hub::server::{build_app, shutdown_signal};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn open_stores(
    config: &HubConfig,
) -> anyhow::Result<(Arc<dyn DeviceStore>, Arc<dyn PushStore>)> {
    if config.persistence_enabled {
        let store = Arc::new(
            PostgresStore::connect(config)
                .await
                .context("connecting to PostgreSQL")?,
        );
        tracing::info!("persistence enabled (PostgreSQL)");
        let devices: Arc<dyn DeviceStore> = Arc::clone(&store) as Arc<dyn DeviceStore>;
        let push: Arc<dyn PushStore> = store;
        Ok((devices, push))
    } else {
        tracing::warn!("persistence disabled; ownership and push state are in memory");
        let store = Arc::new(MemoryStore::default());
        let devices: Arc<dyn DeviceStore> = Arc::clone(&store) as Arc<dyn DeviceStore>;
        let push: Arc<dyn PushStore> = store;
        Ok((devices, push))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = HubConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    init_tracing(config.log_json);
    if config.uses_development_secret() {
        tracing::warn!("JWT_SECRET not set; using the development secret");
    }
    tracing::info!(
        addr = %config.listen_addr,
        enforce_device_ownership = config.enforce_device_ownership,
        "starting relay-hub"
    );

    // Build stores and push transport
    let (devices, push_store) = open_stores(&config).await?;
    let keys = VapidKeys::from_config(&config);
    let public_key = keys.public_key.clone();
    let transport: Arc<dyn PushTransport> = Arc::new(
        WebPushTransport::new(keys, config.vapid_subject.clone())
            .context("building push transport")?,
    );

    // Build application state and router
    let listen_addr = config.listen_addr;
    let state = AppState::new(config, devices, push_store, transport, &public_key);
    let app = build_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}
