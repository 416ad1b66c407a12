//! Device side of the hub.
//!
//! [`DeviceRelay`] owns the [`DeviceRegistry`] and the [`EventBus`]. It
//! admits device sockets (last writer wins per device id), stamps and
//! publishes their frames, and delivers hub-to-device messages through the
//! device's [`SocketHandle`]. Connection state is mirrored to the
//! [`DeviceStore`] on connect and disconnect.
//!
//! Registry changes and the `online`/`offline` events they cause happen
//! under one transition lock, so subscribers see events in the same order
//! the registry changed.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::messages::{DeviceAck, close_code, now_millis, stamp_device_payload};
use super::{SendOutcome, SocketHandle};
use crate::auth::claim::{ClaimTokens, digests_match};
use crate::domain::{
    ConnectionId, DeviceConnection, DeviceEvent, DeviceId, DeviceRegistry, DeviceSnapshot,
    EventBus, Subscription,
};
use crate::error::RelayError;
use crate::persistence::DeviceStore;

/// Identity of an admitted device connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedDevice {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Identifier of the admitted socket.
    pub connection_id: ConnectionId,
}

/// Tracks device reachability and routes device traffic.
#[derive(Debug)]
pub struct DeviceRelay {
    registry: DeviceRegistry,
    events: EventBus,
    store: Arc<dyn DeviceStore>,
    transitions: Mutex<()>,
}

impl DeviceRelay {
    /// Creates a relay with an empty registry.
    #[must_use]
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            events: EventBus::new(),
            store,
            transitions: Mutex::new(()),
        }
    }

    /// Admits a device socket.
    ///
    /// On success any previous connection for the same id is closed with
    /// [`close_code::REPLACED`], the device receives a `connected`
    /// acknowledgment, and subscribers see [`DeviceEvent::Online`]. The
    /// store records the device as online with `firmware`, if given. On
    /// refusal the socket is closed with the error's close code.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MissingParameters`] if `id` or `key` is absent.
    /// - [`RelayError::InvalidDeviceKey`] if the device has a provisioned
    ///   key and `key` does not match it.
    /// - [`RelayError::Store`] if the key lookup fails.
    pub async fn accept(
        &self,
        id: Option<&str>,
        key: Option<&str>,
        firmware: Option<&str>,
        socket: SocketHandle,
    ) -> Result<AcceptedDevice, RelayError> {
        match self.admit(id, key).await {
            Ok(device_id) => {
                let accepted = self.register(device_id, socket);
                let firmware = firmware.map(str::trim).filter(|f| !f.is_empty());
                self.record_status(&accepted.device_id, true, firmware).await;
                Ok(accepted)
            }
            Err(err) => {
                tracing::warn!(device_id = ?id, code = err.close_code(), error = %err, "device refused");
                socket.close(err.close_code(), err.close_reason());
                Err(err)
            }
        }
    }

    async fn admit(
        &self,
        id: Option<&str>,
        key: Option<&str>,
    ) -> Result<DeviceId, RelayError> {
        let device_id = id.and_then(DeviceId::parse);
        let key = key.map(str::trim).filter(|k| !k.is_empty());
        let (Some(device_id), Some(key)) = (device_id, key) else {
            return Err(RelayError::MissingParameters);
        };
        if let Some(expected) = self.store.device_key(&device_id).await?
            && !digests_match(&ClaimTokens::hash(key), &expected)
        {
            return Err(RelayError::InvalidDeviceKey);
        }
        Ok(device_id)
    }

    fn register(&self, device_id: DeviceId, socket: SocketHandle) -> AcceptedDevice {
        let _transition = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = DeviceConnection::new(device_id.clone(), socket.clone());
        let connection_id = conn.connection_id;
        if let Some(old) = self.registry.insert(conn) {
            tracing::info!(device_id = %device_id, "replacing existing device connection");
            old.socket
                .close(close_code::REPLACED, "Replaced by new connection");
        }
        tracing::info!(device_id = %device_id, %connection_id, "device connected");

        let now = now_millis();
        socket.send_json(&DeviceAck::Connected { timestamp: now }.to_value());
        self.events.publish(&DeviceEvent::Online {
            device_id: device_id.clone(),
            timestamp: now,
        });
        AcceptedDevice {
            device_id,
            connection_id,
        }
    }

    /// Handles one inbound text frame from a device.
    ///
    /// Malformed frames are logged and dropped; the connection stays up.
    /// Returns `true` if the frame was published.
    pub fn on_message(&self, device_id: &DeviceId, connection_id: ConnectionId, raw: &str) -> bool {
        self.registry.touch(device_id, connection_id);
        match stamp_device_payload(raw, device_id, now_millis()) {
            Ok(payload) => {
                self.events.publish(&DeviceEvent::Message {
                    device_id: device_id.clone(),
                    payload,
                });
                true
            }
            Err(e) => {
                tracing::warn!(device_id = %device_id, error = %e, "dropping malformed device frame");
                false
            }
        }
    }

    /// Records inbound activity that carries no payload (e.g. a pong).
    pub fn touch(&self, device_id: &DeviceId, connection_id: ConnectionId) {
        self.registry.touch(device_id, connection_id);
    }

    /// Handles a device socket closing. The registry entry is removed only
    /// if it still belongs to `connection_id`; returns `true` (and emits
    /// [`DeviceEvent::Offline`]) in that case. The store records the device
    /// as offline unless a newer connection has registered meanwhile.
    pub async fn disconnect(&self, device_id: &DeviceId, connection_id: ConnectionId) -> bool {
        if !self.unregister(device_id, connection_id) {
            tracing::debug!(device_id = %device_id, %connection_id, "stale device close ignored");
            return false;
        }
        if !self.registry.is_connected(device_id) {
            self.record_status(device_id, false, None).await;
        }
        true
    }

    fn unregister(&self, device_id: &DeviceId, connection_id: ConnectionId) -> bool {
        let _transition = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        if self.registry.remove(device_id, connection_id).is_none() {
            return false;
        }
        tracing::info!(device_id = %device_id, %connection_id, "device disconnected");
        self.events.publish(&DeviceEvent::Offline {
            device_id: device_id.clone(),
            timestamp: now_millis(),
        });
        true
    }

    async fn record_status(&self, device_id: &DeviceId, online: bool, firmware: Option<&str>) {
        if let Err(e) = self.store.update_device_status(device_id, online, firmware).await {
            tracing::warn!(device_id = %device_id, online, error = %e, "failed to record device status");
        }
    }

    /// Queues a message for the device.
    ///
    /// Returns `false`, with no side effects, if the device is absent or
    /// its socket is not open, and also when its queue is full. The relay
    /// never retries. Use [`DeviceRelay::deliver_to_device`] to tell those
    /// cases apart.
    pub fn send_to_device(&self, device_id: &DeviceId, message: &Value) -> bool {
        self.deliver_to_device(device_id, message).is_queued()
    }

    /// Queues a message for the device and reports what happened. An
    /// absent device reports [`SendOutcome::NotOpen`].
    pub fn deliver_to_device(&self, device_id: &DeviceId, message: &Value) -> SendOutcome {
        self.registry
            .socket(device_id)
            .map_or(SendOutcome::NotOpen, |socket| socket.send_json(message))
    }

    /// Returns `true` if the device has an open registered connection.
    #[must_use]
    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.registry.is_connected(device_id)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of all registered devices, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.registry.snapshot()
    }

    /// Registers a handler for every [`DeviceEvent`].
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::{Mutex, PoisonError};

    use serde_json::json;

    use super::*;
    use crate::persistence::MemoryStore;
    use crate::relay::SocketReceiver;

    fn relay() -> (DeviceRelay, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            DeviceRelay::new(Arc::clone(&store) as Arc<dyn DeviceStore>),
            store,
        )
    }

    fn recorder(relay: &DeviceRelay) -> (Subscription, Arc<Mutex<Vec<DeviceEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = relay.subscribe(move |e| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(e.clone());
        });
        (sub, seen)
    }

    fn events(seen: &Mutex<Vec<DeviceEvent>>) -> Vec<&'static str> {
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(DeviceEvent::event_type_str)
            .collect()
    }

    async fn connect(relay: &DeviceRelay, id: &str) -> (AcceptedDevice, SocketReceiver) {
        let (socket, rx) = SocketHandle::channel(16);
        let Ok(accepted) = relay.accept(Some(id), Some("secret"), None, socket).await else {
            panic!("device accepted");
        };
        (accepted, rx)
    }

    #[tokio::test]
    async fn accept_acknowledges_and_emits_online() {
        let (relay, _store) = relay();
        let (_sub, seen) = recorder(&relay);
        let (accepted, mut rx) = connect(&relay, "BRW-AABBCCDD").await;

        assert!(relay.is_connected(&accepted.device_id));
        let frames = rx.drain_json();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames.first().map(|f| f["type"].clone()), Some(json!("connected")));
        assert_eq!(events(&seen), vec!["device_online"]);
    }

    #[tokio::test]
    async fn missing_parameters_close_4001() {
        let (relay, _store) = relay();
        for (id, key) in [(None, Some("k")), (Some("BRW-1"), None), (Some(""), Some("k"))] {
            let (socket, rx) = SocketHandle::channel(4);
            assert!(matches!(
                relay.accept(id, key, None, socket).await,
                Err(RelayError::MissingParameters)
            ));
            assert_eq!(rx.close_signal().map(|s| s.code), Some(4001));
        }
        assert_eq!(relay.connected_count(), 0);
    }

    #[tokio::test]
    async fn provisioned_key_must_match() {
        let (relay, store) = relay();
        let Some(device) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        store
            .provision_device(&device, Some(ClaimTokens::hash("right")))
            .await;

        let (socket, rx) = SocketHandle::channel(4);
        assert!(matches!(
            relay.accept(Some("BRW-AABBCCDD"), Some("wrong"), None, socket).await,
            Err(RelayError::InvalidDeviceKey)
        ));
        assert_eq!(rx.close_signal().map(|s| s.code), Some(4003));

        let (socket, _rx) = SocketHandle::channel(4);
        assert!(relay.accept(Some("BRW-AABBCCDD"), Some("right"), None, socket).await.is_ok());
    }

    #[tokio::test]
    async fn reconnect_replaces_and_stale_close_is_ignored() {
        let (relay, _store) = relay();
        let (_sub, seen) = recorder(&relay);
        let (first, first_rx) = connect(&relay, "BRW-AABBCCDD").await;
        let (second, _second_rx) = connect(&relay, "BRW-AABBCCDD").await;

        assert_eq!(first_rx.close_signal().map(|s| s.code), Some(4002));
        assert_eq!(relay.connected_count(), 1);

        // the replaced socket's close arrives after the new registration
        assert!(!relay.disconnect(&first.device_id, first.connection_id).await);
        assert!(relay.is_connected(&second.device_id));

        assert!(relay.disconnect(&second.device_id, second.connection_id).await);
        assert!(!relay.is_connected(&second.device_id));
        assert_eq!(
            events(&seen),
            vec!["device_online", "device_online", "device_offline"]
        );
    }

    #[tokio::test]
    async fn messages_are_stamped_and_published_in_order() {
        let (relay, _store) = relay();
        let (_sub, seen) = recorder(&relay);
        let (dev, _rx) = connect(&relay, "BRW-AABBCCDD").await;

        assert!(relay.on_message(&dev.device_id, dev.connection_id, r#"{"type":"status","n":1}"#));
        assert!(!relay.on_message(&dev.device_id, dev.connection_id, "{oops"));
        assert!(relay.on_message(&dev.device_id, dev.connection_id, r#"{"type":"status","n":2}"#));

        let payloads: Vec<Value> = seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|e| match e {
                DeviceEvent::Message { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads.first().map(|p| p["n"].clone()), Some(json!(1)));
        assert_eq!(payloads.last().map(|p| p["n"].clone()), Some(json!(2)));
        assert!(payloads.iter().all(|p| p["deviceId"] == "BRW-AABBCCDD"));
        assert!(relay.is_connected(&dev.device_id));
    }

    #[tokio::test]
    async fn send_to_absent_or_closed_device_fails() {
        let (relay, _store) = relay();
        let Some(absent) = DeviceId::parse("BRW-00000000") else {
            panic!("valid id");
        };
        assert!(!relay.send_to_device(&absent, &json!({"cmd": "brew"})));

        let (dev, mut rx) = connect(&relay, "BRW-AABBCCDD").await;
        rx.drain_json();
        assert!(relay.send_to_device(&dev.device_id, &json!({"cmd": "brew"})));
        assert_eq!(rx.drain_json(), vec![json!({"cmd": "brew"})]);

        drop(rx);
        assert!(!relay.send_to_device(&dev.device_id, &json!({"cmd": "brew"})));
    }

    #[tokio::test]
    async fn unsubscribed_handler_stops_receiving() {
        let (relay, _store) = relay();
        let (sub, seen) = recorder(&relay);
        let (dev, _rx) = connect(&relay, "BRW-AABBCCDD").await;
        assert!(sub.unsubscribe());
        relay.disconnect(&dev.device_id, dev.connection_id).await;
        assert_eq!(events(&seen), vec!["device_online"]);
    }

    #[tokio::test]
    async fn full_device_queue_is_not_offline() {
        let (relay, _store) = relay();
        let (socket, _rx) = SocketHandle::channel(1);
        let Ok(dev) = relay.accept(Some("BRW-AABBCCDD"), Some("k"), None, socket).await else {
            panic!("device accepted");
        };
        // the connected ack occupies the only slot
        assert!(relay.is_connected(&dev.device_id));
        assert_eq!(
            relay.deliver_to_device(&dev.device_id, &json!({"cmd": "brew"})),
            SendOutcome::Full
        );
        assert!(!relay.send_to_device(&dev.device_id, &json!({"cmd": "brew"})));
    }

    #[tokio::test]
    async fn status_is_recorded_on_connect_and_disconnect() {
        let (relay, store) = relay();
        let Some(device) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        store.provision_device(&device, None).await;

        let (socket, _rx) = SocketHandle::channel(4);
        let Ok(dev) = relay
            .accept(Some("BRW-AABBCCDD"), Some("k"), Some("2.1.0"), socket)
            .await
        else {
            panic!("device accepted");
        };
        let Some(online) = store.device(&device).await else {
            panic!("row exists");
        };
        assert!(online.is_online);
        assert_eq!(online.firmware_version.as_deref(), Some("2.1.0"));

        relay.disconnect(&dev.device_id, dev.connection_id).await;
        let Some(offline) = store.device(&device).await else {
            panic!("row exists");
        };
        assert!(!offline.is_online);
        assert_eq!(offline.firmware_version.as_deref(), Some("2.1.0"));
    }

    #[tokio::test]
    async fn stale_close_does_not_mark_replacement_offline() {
        let (relay, store) = relay();
        let Some(device) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        store.provision_device(&device, None).await;
        let (first, _first_rx) = connect(&relay, "BRW-AABBCCDD").await;
        let (_second, _second_rx) = connect(&relay, "BRW-AABBCCDD").await;

        relay.disconnect(&first.device_id, first.connection_id).await;
        assert!(store.device(&device).await.is_some_and(|d| d.is_online));
    }

    #[test]
    fn racing_close_and_reconnect_keep_events_in_registry_order() {
        let (relay, _store) = relay();
        let (_sub, seen) = recorder(&relay);
        let Some(device) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };

        for _ in 0..200 {
            let (old_socket, _old_rx) = SocketHandle::channel(4);
            let old = relay.register(device.clone(), old_socket);
            let (new_socket, _new_rx) = SocketHandle::channel(4);
            std::thread::scope(|scope| {
                scope.spawn(|| relay.unregister(&old.device_id, old.connection_id));
                scope.spawn(|| relay.register(device.clone(), new_socket));
            });

            let last = seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .last()
                .map(DeviceEvent::event_type_str);
            let expected = if relay.is_connected(&device) {
                "device_online"
            } else {
                "device_offline"
            };
            assert_eq!(last, Some(expected));
        }
    }
}
