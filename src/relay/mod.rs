//! Relay core: device admission, client bridging, and per-socket handles.
//!
//! The [`DeviceRelay`] tracks which devices are reachable and publishes
//! their frames. The [`ClientProxy`] authenticates client sessions and
//! bridges them to the relay. Both talk to sockets only through
//! [`SocketHandle`]s, so they run without a network in tests.

pub mod client_proxy;
pub mod device_relay;
pub mod messages;
pub mod socket;

pub use client_proxy::{ClientProxy, ForwardOutcome};
pub use device_relay::{AcceptedDevice, DeviceRelay};
pub use messages::close_code;
pub use socket::{CloseSignal, Outbound, SendOutcome, SocketHandle, SocketReceiver};
