//! REST endpoint handlers organized by resource.

pub mod devices;
pub mod push;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(system::routes())
        .merge(devices::routes())
        .merge(push::routes())
}
