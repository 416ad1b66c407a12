//! Relay wire types: close codes, hub-originated frames, and the stamping
//! applied to inbound payloads.
//!
//! Timestamps on the relay wire are Unix epoch milliseconds.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{DeviceId, SessionId};

/// WebSocket close codes used by the relay.
pub mod close_code {
    /// Orderly close initiated by the hub after the peer went away.
    pub const NORMAL: u16 = 1000;
    /// Required query parameters were missing.
    pub const MISSING_PARAMETERS: u16 = 4001;
    /// Sent to a device's old socket when a newer one registers.
    pub const REPLACED: u16 = 4002;
    /// Client bearer token failed verification.
    pub const INVALID_TOKEN: u16 = 4002;
    /// Device key mismatch, or client user does not own the device.
    pub const NOT_AUTHORIZED: u16 = 4003;
    /// No inbound frame within the idle timeout.
    pub const IDLE_TIMEOUT: u16 = 4008;
    /// Store failure while authorizing the connection.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Error code sent to a client whose command could not reach its device.
pub const DEVICE_OFFLINE: &str = "device_offline";

/// Error code sent when the device is connected but its queue is full.
pub const DEVICE_BUSY: &str = "device_busy";

/// Returns the current time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Frames the hub sends to clients on its own behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Sent once after a client session is registered.
    Connected {
        /// Newly allocated session id.
        session_id: SessionId,
        /// Device the session is bound to.
        device_id: DeviceId,
        /// Whether the device currently has a live connection.
        device_online: bool,
        /// Send time, epoch milliseconds.
        timestamp: i64,
    },
    /// Sent when a client command could not be handled.
    Error {
        /// Machine-readable error code (e.g. `device_offline`).
        error: &'static str,
        /// Human-readable message.
        message: &'static str,
    },
}

impl ClientEvent {
    /// The structured error a client receives when its device is absent.
    #[must_use]
    pub const fn device_offline() -> Self {
        Self::Error {
            error: DEVICE_OFFLINE,
            message: "Device is not connected",
        }
    }

    /// The structured error a client receives when its device is connected
    /// but not draining commands.
    #[must_use]
    pub const fn device_busy() -> Self {
        Self::Error {
            error: DEVICE_BUSY,
            message: "Device is busy; command dropped",
        }
    }

    /// Serializes the event to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Frames the hub sends to devices on its own behalf.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceAck {
    /// Handshake acknowledgment.
    Connected {
        /// Send time, epoch milliseconds.
        timestamp: i64,
    },
}

impl DeviceAck {
    /// Serializes the acknowledgment to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Reason an inbound payload was dropped.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Payload is not valid JSON.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload is valid JSON but not an object.
    #[error("payload is not a json object")]
    NotAnObject,
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, PayloadError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(PayloadError::NotAnObject),
    }
}

/// Parses a device frame and stamps it.
///
/// `deviceId` and `timestamp` are added only when the frame does not carry
/// them already.
///
/// # Errors
///
/// Returns [`PayloadError`] if the frame is not a JSON object.
pub fn stamp_device_payload(
    raw: &str,
    device_id: &DeviceId,
    now_ms: i64,
) -> Result<Value, PayloadError> {
    let mut map = parse_object(raw)?;
    if map.get("deviceId").is_none_or(Value::is_null) {
        map.insert(
            "deviceId".to_string(),
            Value::String(device_id.as_str().to_string()),
        );
    }
    if map.get("timestamp").is_none_or(Value::is_null) {
        map.insert("timestamp".to_string(), Value::from(now_ms));
    }
    Ok(Value::Object(map))
}

/// Parses a client command and stamps it with the forward time.
///
/// # Errors
///
/// Returns [`PayloadError`] if the frame is not a JSON object.
pub fn stamp_client_payload(raw: &str, now_ms: i64) -> Result<Value, PayloadError> {
    let mut map = parse_object(raw)?;
    map.insert("timestamp".to_string(), Value::from(now_ms));
    Ok(Value::Object(map))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn device() -> DeviceId {
        let Some(id) = DeviceId::parse("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        id
    }

    #[test]
    fn device_payload_gets_id_and_timestamp() {
        let Ok(value) = stamp_device_payload(r#"{"type":"status","temp":93}"#, &device(), 1000)
        else {
            panic!("valid payload");
        };
        assert_eq!(value["deviceId"], "BRW-AABBCCDD");
        assert_eq!(value["timestamp"], 1000);
        assert_eq!(value["temp"], 93);
    }

    #[test]
    fn device_timestamp_is_preserved() {
        let Ok(value) = stamp_device_payload(r#"{"type":"status","timestamp":5}"#, &device(), 1000)
        else {
            panic!("valid payload");
        };
        assert_eq!(value["timestamp"], 5);
    }

    #[test]
    fn device_supplied_id_is_kept() {
        let Ok(value) =
            stamp_device_payload(r#"{"type":"status","deviceId":"BRW-11111111"}"#, &device(), 5)
        else {
            panic!("valid payload");
        };
        assert_eq!(value["deviceId"], "BRW-11111111");
        assert_eq!(value["timestamp"], 5);
    }

    #[test]
    fn null_device_id_is_filled() {
        let Ok(value) = stamp_device_payload(r#"{"type":"x","deviceId":null}"#, &device(), 1) else {
            panic!("valid payload");
        };
        assert_eq!(value["deviceId"], "BRW-AABBCCDD");
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(matches!(
            stamp_device_payload("[1,2]", &device(), 0),
            Err(PayloadError::NotAnObject)
        ));
        assert!(matches!(
            stamp_client_payload("not json", 0),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn client_timestamp_is_overwritten() {
        let Ok(value) = stamp_client_payload(r#"{"cmd":"brew","timestamp":1}"#, 77) else {
            panic!("valid payload");
        };
        assert_eq!(value, json!({"cmd": "brew", "timestamp": 77}));
    }

    #[test]
    fn connected_event_shape() {
        let session_id = SessionId::new();
        let value = ClientEvent::Connected {
            session_id,
            device_id: device(),
            device_online: true,
            timestamp: 9,
        }
        .to_value();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["sessionId"], session_id.to_string());
        assert_eq!(value["deviceId"], "BRW-AABBCCDD");
        assert_eq!(value["deviceOnline"], true);
    }

    #[test]
    fn device_offline_error_shape() {
        let value = ClientEvent::device_offline().to_value();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "device_offline");
    }

    #[test]
    fn device_busy_error_shape() {
        let value = ClientEvent::device_busy().to_value();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "device_busy");
    }

    #[test]
    fn device_ack_shape() {
        let value = DeviceAck::Connected { timestamp: 3 }.to_value();
        assert_eq!(value, json!({"type": "connected", "timestamp": 3}));
    }
}
