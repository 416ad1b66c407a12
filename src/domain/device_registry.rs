//! Registry of currently connected devices.
//!
//! [`DeviceRegistry`] is the single source of truth for "is device X
//! reachable right now". It holds at most one [`DeviceConnection`] per
//! [`DeviceId`]; inserting for an id that is already present replaces the
//! old entry and hands it back to the caller, who closes its socket.
//!
//! All mutations run under one write lock and never await, so a concurrent
//! connect and disconnect for the same device cannot interleave.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{ConnectionId, DeviceId};
use crate::relay::SocketHandle;

/// One live device connection.
pub struct DeviceConnection {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Identifier of this particular socket.
    pub connection_id: ConnectionId,
    /// Sending side of the device socket.
    pub socket: SocketHandle,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity, epoch milliseconds.
    last_seen_ms: AtomicI64,
}

impl DeviceConnection {
    /// Creates a connection record stamped with the current time.
    #[must_use]
    pub fn new(device_id: DeviceId, socket: SocketHandle) -> Self {
        let now = Utc::now();
        Self {
            device_id,
            connection_id: ConnectionId::new(),
            socket,
            connected_at: now,
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Returns the time of the last inbound activity.
    #[must_use]
    pub fn last_seen(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_seen_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.connected_at)
    }
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("device_id", &self.device_id)
            .field("connection_id", &self.connection_id)
            .field("connected_at", &self.connected_at)
            .field("last_seen", &self.last_seen())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one registered device.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Device identifier.
    #[schema(value_type = String)]
    pub id: DeviceId,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_seen: DateTime<Utc>,
}

impl From<&DeviceConnection> for DeviceSnapshot {
    fn from(conn: &DeviceConnection) -> Self {
        Self {
            id: conn.device_id.clone(),
            connected_at: conn.connected_at,
            last_seen: conn.last_seen(),
        }
    }
}

/// Map of live device connections keyed by [`DeviceId`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, DeviceConnection>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, DeviceConnection>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, DeviceConnection>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection, returning the one it replaced, if any.
    pub fn insert(&self, conn: DeviceConnection) -> Option<DeviceConnection> {
        self.write().insert(conn.device_id.clone(), conn)
    }

    /// Removes the device's entry only if it still belongs to
    /// `connection_id`. Returns the removed connection.
    pub fn remove(
        &self,
        device_id: &DeviceId,
        connection_id: ConnectionId,
    ) -> Option<DeviceConnection> {
        let mut map = self.write();
        if map
            .get(device_id)
            .is_some_and(|conn| conn.connection_id == connection_id)
        {
            map.remove(device_id)
        } else {
            None
        }
    }

    /// Returns the socket of the device's current connection.
    #[must_use]
    pub fn socket(&self, device_id: &DeviceId) -> Option<SocketHandle> {
        self.read().get(device_id).map(|conn| conn.socket.clone())
    }

    /// Returns `true` if the device is registered and its socket is open.
    #[must_use]
    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.read()
            .get(device_id)
            .is_some_and(|conn| conn.socket.is_open())
    }

    /// Records activity on the device's connection, if it is still the
    /// registered one.
    pub fn touch(&self, device_id: &DeviceId, connection_id: ConnectionId) {
        if let Some(conn) = self.read().get(device_id)
            && conn.connection_id == connection_id
        {
            conn.touch();
        }
    }

    /// Returns snapshots of all registered devices, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut list: Vec<DeviceSnapshot> =
            self.read().values().map(DeviceSnapshot::from).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no device is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
