//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase on the wire to match the browser client.

pub mod device_dto;
pub mod push_dto;

pub use device_dto::*;
pub use push_dto::*;
