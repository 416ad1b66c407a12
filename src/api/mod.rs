//! REST API layer: route handlers, DTOs, rate limiting, and the OpenAPI
//! document.
//!
//! All endpoints are mounted under `/api`.

pub mod dto;
pub mod handlers;
pub mod openapi;
pub mod rate_limit;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints, plus the raw
/// OpenAPI document at `/api/openapi.json`.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .route("/api/openapi.json", get(openapi_document))
}

async fn openapi_document() -> impl axum::response::IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        openapi::openapi_json(),
    )
}
