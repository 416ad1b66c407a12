//! # relay-hub
//!
//! Cloud relay hub bridging remote clients and embedded devices that can
//! only open outbound connections.
//!
//! Devices dial in over WebSocket and stay connected; clients (browsers,
//! apps) attach to one device each. Client commands are forwarded to the
//! device and everything the device sends is broadcast to its attached
//! clients. When a device raises an alert, the hub also delivers it as a
//! Web Push notification to subscribed users.
//!
//! ## Architecture
//!
//! ```text
//! Devices (WS /ws/device)        Clients (WS /ws/client, HTTP /api)
//!     │                              │
//!     ├── WS handlers (ws/) ─────────┤── REST handlers (api/)
//!     │                              │
//!     ├── DeviceRelay (relay/) ◄──── ClientProxy (relay/)
//!     │        │ EventBus (domain/)       │
//!     │        └──────────────────► broadcast to sessions
//!     │
//!     ├── TokenService / ClaimTokens (auth/)
//!     ├── NotificationDispatcher (push/) ── Web Push
//!     │
//!     └── DeviceStore / PushStore (persistence/): PostgreSQL or memory
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod push;
pub mod relay;
pub mod server;
pub mod ws;
