//! Domain layer: identifiers, connection registries, and the event system.
//!
//! This module contains the hub's in-memory model: device and session
//! identity, the device registry (at most one live connection per device),
//! the client registry (sessions indexed by device), and the event bus that
//! fans device events out to subscribers.

pub mod client_registry;
pub mod device_event;
pub mod device_id;
pub mod device_registry;
pub mod event_bus;
pub mod session_id;

pub use client_registry::{ClientRegistry, ClientSession};
pub use device_event::DeviceEvent;
pub use device_id::DeviceId;
pub use device_registry::{DeviceConnection, DeviceRegistry, DeviceSnapshot};
pub use event_bus::{EventBus, Subscription};
pub use session_id::{ConnectionId, SessionId};
