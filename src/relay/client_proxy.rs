//! Client side of the hub.
//!
//! [`ClientProxy`] owns the [`ClientRegistry`]. It authenticates client
//! sockets, binds each to one device, forwards client commands through the
//! [`DeviceRelay`], and fans device events out to the device's sessions.
//! It reaches device state only through the relay's public operations.

use std::sync::Arc;

use super::device_relay::DeviceRelay;
use super::messages::{ClientEvent, now_millis, stamp_client_payload};
use super::{SendOutcome, SocketHandle};
use crate::auth::TokenService;
use crate::domain::{ClientRegistry, ClientSession, DeviceId, SessionId, Subscription};
use crate::error::RelayError;
use crate::persistence::DeviceStore;

/// Result of forwarding one client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The command was queued on the device socket.
    Forwarded,
    /// The device is not connected; the client was sent a
    /// `device_offline` error.
    DeviceOffline,
    /// The device is connected but its outbound queue is full; the client
    /// was sent a `device_busy` error.
    DeviceBusy,
    /// The frame was malformed and dropped.
    Dropped,
}

/// Bridges client sessions to devices.
#[derive(Debug)]
pub struct ClientProxy {
    registry: Arc<ClientRegistry>,
    relay: Arc<DeviceRelay>,
    tokens: Arc<TokenService>,
    store: Arc<dyn DeviceStore>,
    enforce_ownership: bool,
    _subscription: Subscription,
}

impl ClientProxy {
    /// Creates the proxy and subscribes it to the relay's device events.
    ///
    /// Every event is rendered with [`crate::domain::DeviceEvent::to_client_frame`]
    /// and sent to each open session watching the event's device.
    #[must_use]
    pub fn new(
        relay: Arc<DeviceRelay>,
        tokens: Arc<TokenService>,
        store: Arc<dyn DeviceStore>,
        enforce_ownership: bool,
    ) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let sessions = Arc::clone(&registry);
        let subscription = relay.subscribe(move |event| {
            let frame = event.to_client_frame().to_string();
            let delivered = sessions.broadcast(event.device_id(), &frame);
            tracing::trace!(
                device_id = %event.device_id(),
                event = event.event_type_str(),
                delivered,
                "device event fanned out"
            );
        });
        Self {
            registry,
            relay,
            tokens,
            store,
            enforce_ownership,
            _subscription: subscription,
        }
    }

    /// Admits a client socket.
    ///
    /// On success the session is registered and receives a `connected`
    /// event carrying the device's current online state. On refusal the
    /// socket is closed with the error's close code.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MissingParameters`] if `token` or `device` is absent.
    /// - [`RelayError::InvalidToken`] if the token fails verification.
    /// - [`RelayError::NotAuthorized`] if ownership is enforced and the user
    ///   does not own the device.
    /// - [`RelayError::Store`] if the ownership lookup fails.
    pub async fn accept(
        &self,
        token: Option<&str>,
        device: Option<&str>,
        socket: SocketHandle,
    ) -> Result<ClientSession, RelayError> {
        match self.admit(token, device).await {
            Ok((user_id, device_id)) => Ok(self.register(user_id, device_id, socket)),
            Err(err) => {
                tracing::warn!(device_id = ?device, code = err.close_code(), error = %err, "client refused");
                socket.close(err.close_code(), err.close_reason());
                Err(err)
            }
        }
    }

    async fn admit(
        &self,
        token: Option<&str>,
        device: Option<&str>,
    ) -> Result<(String, DeviceId), RelayError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let (Some(token), Some(device_id)) = (token, device.and_then(DeviceId::parse)) else {
            return Err(RelayError::MissingParameters);
        };
        let claims = self.tokens.verify(token).ok_or(RelayError::InvalidToken)?;
        if self.enforce_ownership
            && !self
                .store
                .user_owns_device(&claims.user_id, &device_id)
                .await?
        {
            return Err(RelayError::NotAuthorized);
        }
        Ok((claims.user_id, device_id))
    }

    fn register(&self, user_id: String, device_id: DeviceId, socket: SocketHandle) -> ClientSession {
        let session = ClientSession::new(user_id, device_id, socket);
        self.registry.register(session.clone());
        let device_online = self.relay.is_connected(&session.device_id);
        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            device_id = %session.device_id,
            device_online,
            "client connected"
        );
        session.socket.send_json(
            &ClientEvent::Connected {
                session_id: session.session_id,
                device_id: session.device_id.clone(),
                device_online,
                timestamp: now_millis(),
            }
            .to_value(),
        );
        session
    }

    /// Handles one inbound text frame from a client.
    ///
    /// Valid frames are stamped and forwarded to the session's device. If
    /// the device is unreachable the client gets exactly one
    /// `device_offline` error, and if the device's queue is full it gets
    /// one `device_busy` error. Nothing is queued or retried.
    pub fn on_message(&self, session: &ClientSession, raw: &str) -> ForwardOutcome {
        let payload = match stamp_client_payload(raw, now_millis()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "dropping malformed client frame");
                return ForwardOutcome::Dropped;
            }
        };
        let (error, outcome) = match self.relay.deliver_to_device(&session.device_id, &payload) {
            SendOutcome::Queued => return ForwardOutcome::Forwarded,
            SendOutcome::Full => (ClientEvent::device_busy(), ForwardOutcome::DeviceBusy),
            SendOutcome::NotOpen => (ClientEvent::device_offline(), ForwardOutcome::DeviceOffline),
        };
        tracing::debug!(
            session_id = %session.session_id,
            device_id = %session.device_id,
            ?outcome,
            "command not delivered"
        );
        session.socket.send_json(&error.to_value());
        outcome
    }

    /// Removes a closed session. Returns `true` if it was registered.
    pub fn disconnect(&self, session_id: SessionId) -> bool {
        let Some(session) = self.registry.unregister(session_id) else {
            return false;
        };
        tracing::info!(
            session_id = %session_id,
            device_id = %session.device_id,
            "client disconnected"
        );
        true
    }

    /// Number of registered client sessions.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.registry.len()
    }

    /// Ids of the sessions bound to the device.
    #[must_use]
    pub fn sessions_for(&self, device_id: &DeviceId) -> Vec<SessionId> {
        self.registry.sessions_for(device_id)
    }

    /// The proxy's session registry.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }
}
