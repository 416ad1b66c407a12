//! Registry of connected client sessions.
//!
//! [`ClientRegistry`] stores every live [`ClientSession`] by [`SessionId`]
//! and keeps a reverse index from [`DeviceId`] to the sessions watching it.
//! Both maps live behind one lock, so a registration or removal updates
//! them together. An emptied device bucket is removed in the same step.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{DeviceId, SessionId};
use crate::relay::SocketHandle;

/// One connected client, bound to a single device for its lifetime.
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// Authenticated user.
    pub user_id: String,
    /// Device this session watches and commands.
    pub device_id: DeviceId,
    /// Handshake time.
    pub connected_at: DateTime<Utc>,
    /// Sending side of the client socket.
    pub socket: SocketHandle,
}

impl ClientSession {
    /// Creates a session with a fresh id, stamped with the current time.
    #[must_use]
    pub fn new(user_id: String, device_id: DeviceId, socket: SocketHandle) -> Self {
        Self {
            session_id: SessionId::new(),
            user_id,
            device_id,
            connected_at: Utc::now(),
            socket,
        }
    }
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<SessionId, ClientSession>,
    by_device: HashMap<DeviceId, HashSet<SessionId>>,
}

/// Session map with a per-device reverse index.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: RwLock<Sessions>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Sessions> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sessions> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session under its id and its device.
    pub fn register(&self, session: ClientSession) {
        let mut inner = self.write();
        inner
            .by_device
            .entry(session.device_id.clone())
            .or_default()
            .insert(session.session_id);
        inner.by_id.insert(session.session_id, session);
    }

    /// Removes a session from both maps. Returns the removed session.
    pub fn unregister(&self, session_id: SessionId) -> Option<ClientSession> {
        let mut inner = self.write();
        let session = inner.by_id.remove(&session_id)?;
        if let Some(bucket) = inner.by_device.get_mut(&session.device_id) {
            bucket.remove(&session_id);
            if bucket.is_empty() {
                inner.by_device.remove(&session.device_id);
            }
        }
        Some(session)
    }

    /// Returns the sockets of every session registered for the device.
    #[must_use]
    pub fn sockets_for(&self, device_id: &DeviceId) -> Vec<SocketHandle> {
        let inner = self.read();
        inner
            .by_device
            .get(device_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .map(|session| session.socket.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the ids of every session registered for the device.
    #[must_use]
    pub fn sessions_for(&self, device_id: &DeviceId) -> Vec<SessionId> {
        self.read()
            .by_device
            .get(device_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sends a text frame to every open session of the device. Closed or
    /// saturated sockets are skipped, not removed. Returns the number of
    /// sessions the frame was queued for.
    pub fn broadcast(&self, device_id: &DeviceId, text: &str) -> usize {
        self.sockets_for(device_id)
            .iter()
            .filter(|socket| socket.send_text(text.to_string()).is_queued())
            .count()
    }

    /// Returns the number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }

    /// Returns the number of devices with at least one session.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.read().by_device.len()
    }

    /// Checks that the reverse index equals, for every device, exactly the
    /// set of sessions whose `device_id` matches, with no empty buckets.
    #[must_use]
    pub fn index_is_consistent(&self) -> bool {
        let inner = self.read();
        let mut expected: HashMap<&DeviceId, HashSet<SessionId>> = HashMap::new();
        for session in inner.by_id.values() {
            expected
                .entry(&session.device_id)
                .or_default()
                .insert(session.session_id);
        }
        expected.len() == inner.by_device.len()
            && inner
                .by_device
                .iter()
                .all(|(device, ids)| !ids.is_empty() && expected.get(device) == Some(ids))
    }
}
