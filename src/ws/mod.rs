//! WebSocket layer: upgrade handlers and per-connection tasks.
//!
//! Devices connect outbound to `/ws/device`; clients attach to a device at
//! `/ws/client` (`/ws` is an alias). Everything after the upgrade is
//! delegated to [`crate::relay`].

pub mod connection;
pub mod handler;

pub use handler::routes;
