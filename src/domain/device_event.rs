//! Events emitted by the device relay.
//!
//! Every registration, removal, and inbound device frame produces a
//! [`DeviceEvent`] published through the [`super::EventBus`].

use serde_json::{Value, json};

use super::DeviceId;

/// Event describing a change in a device's reachability or a frame it sent.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Device completed its handshake and is registered.
    Online {
        /// Device identifier.
        device_id: DeviceId,
        /// Registration time, epoch milliseconds.
        timestamp: i64,
    },

    /// Device's registered connection was removed.
    Offline {
        /// Device identifier.
        device_id: DeviceId,
        /// Removal time, epoch milliseconds.
        timestamp: i64,
    },

    /// Device sent a well-formed frame, already stamped with `deviceId`
    /// and `timestamp`.
    Message {
        /// Device identifier.
        device_id: DeviceId,
        /// Stamped JSON object as received.
        payload: Value,
    },
}

impl DeviceEvent {
    /// Returns the device this event concerns.
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        match self {
            Self::Online { device_id, .. }
            | Self::Offline { device_id, .. }
            | Self::Message { device_id, .. } => device_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::Online { .. } => "device_online",
            Self::Offline { .. } => "device_offline",
            Self::Message { .. } => "message",
        }
    }

    /// Renders the frame clients watching this device receive.
    ///
    /// Device messages are forwarded unchanged; status changes become
    /// `{type, deviceId, timestamp}` notices.
    #[must_use]
    pub fn to_client_frame(&self) -> Value {
        match self {
            Self::Message { payload, .. } => payload.clone(),
            Self::Online {
                device_id,
                timestamp,
            }
            | Self::Offline {
                device_id,
                timestamp,
            } => json!({
                "type": self.event_type_str(),
                "deviceId": device_id,
                "timestamp": timestamp,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        let Some(id) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        id
    }

    #[test]
    fn message_frame_is_payload_verbatim() {
        let payload = json!({"type": "status", "temp": 93.5, "deviceId": "BRW-AABBCCDD"});
        let event = DeviceEvent::Message {
            device_id: device(),
            payload: payload.clone(),
        };
        assert_eq!(event.to_client_frame(), payload);
        assert_eq!(event.event_type_str(), "message");
    }

    #[test]
    fn offline_frame_shape() {
        let event = DeviceEvent::Offline {
            device_id: device(),
            timestamp: 42,
        };
        let frame = event.to_client_frame();
        assert_eq!(frame["type"], "device_offline");
        assert_eq!(frame["deviceId"], "BRW-AABBCCDD");
        assert_eq!(frame["timestamp"], 42);
    }

    #[test]
    fn device_id_accessor() {
        let event = DeviceEvent::Online {
            device_id: device(),
            timestamp: 1,
        };
        assert_eq!(event.device_id(), &device());
    }
}
