//! Axum WebSocket upgrade handlers.
//!
//! Query parameters are all optional at the extractor level; missing ones
//! are reported to the peer as close code 4001 after the upgrade, so the
//! browser sees a close code rather than a failed handshake.

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;

use super::connection::{run_client, run_device};
use crate::app_state::AppState;

/// Query of `GET /ws/device`.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceParams {
    /// Device id.
    pub id: Option<String>,
    /// Device key.
    pub key: Option<String>,
    /// Firmware version the device reports, recorded on connect.
    pub firmware: Option<String>,
}

/// Query of `GET /ws/client` and `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct ClientParams {
    /// Bearer token.
    pub token: Option<String>,
    /// Device to attach to.
    pub device: Option<String>,
}

/// `GET /ws/device`: Upgrade a device's outbound connection.
pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<DeviceParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_device(socket, state, params.id, params.key, params.firmware))
}

/// `GET /ws/client`: Upgrade a client session bound to one device.
pub async fn client_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ClientParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_client(socket, state, params.token, params.device))
}

/// WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/device", get(device_ws_handler))
        .route("/ws/client", get(client_ws_handler))
        .route("/ws", get(client_ws_handler))
}
