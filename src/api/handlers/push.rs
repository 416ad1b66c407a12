//! Push notification handlers: VAPID key, subscriptions, preferences, and
//! the device-initiated notify endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    NotifyRequest, NotifyResponse, PreferencesResponse, SubscribeRequest, SubscribeResponse,
    SubscriptionListResponse, SuccessResponse, UnsubscribeRequest, UpdatePreferencesRequest,
    UpdatePreferencesResponse, VapidKeyResponse,
};
use crate::api::rate_limit::ClientIp;
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::domain::DeviceId;
use crate::error::{ErrorResponse, HubError};
use crate::persistence::SubscriptionKeys;
use crate::push::{NotificationCategory, NotificationDispatcher};

/// Kind reported when a notify request carries no type; maps to the
/// generic template.
const DEFAULT_NOTIFY_KIND: &str = "info";

/// `GET /api/push/vapid-key`: Application server public key.
#[utoipa::path(
    get,
    path = "/api/push/vapid-key",
    tag = "Push",
    summary = "Get VAPID public key",
    description = "Returns the base64url public key browsers pass as `applicationServerKey` when subscribing.",
    responses(
        (status = 200, description = "VAPID public key", body = VapidKeyResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn vapid_key(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Result<impl IntoResponse, HubError> {
    state.limits.public_read.enforce("vapid_key", &ip).await?;
    Ok((
        StatusCode::OK,
        Json(VapidKeyResponse {
            public_key: state.vapid_public_key.to_string(),
        }),
    ))
}

/// `POST /api/push/subscribe`: Register a browser push subscription.
///
/// # Errors
///
/// Returns [`HubError`] on validation, ownership, or store failure.
#[utoipa::path(
    post,
    path = "/api/push/subscribe",
    tag = "Push",
    summary = "Subscribe to push notifications",
    description = "Stores the subscription for the caller, optionally scoped to one of the caller's devices. Re-subscribing the same endpoint replaces the previous registration.",
    security(("bearer_auth" = [])),
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription stored", body = SubscribeResponse),
        (status = 400, description = "Invalid subscription data", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Device not owned by caller", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn subscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_write.enforce("subscribe", user.user_id()).await?;
    let invalid = || HubError::InvalidRequest("invalid subscription data".to_string());
    let body = req.subscription.ok_or_else(invalid)?;
    let endpoint = body
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(invalid)?;
    let keys = body
        .keys
        .filter(|k| !k.p256dh.trim().is_empty() && !k.auth.trim().is_empty())
        .ok_or_else(invalid)?;

    let device_id = match req.device_id.as_deref() {
        Some(raw) => {
            let device_id =
                DeviceId::parse(raw).ok_or_else(|| HubError::InvalidDeviceId(raw.to_string()))?;
            if !state
                .devices
                .user_owns_device(user.user_id(), &device_id)
                .await?
            {
                return Err(HubError::Forbidden);
            }
            Some(device_id)
        }
        None => None,
    };

    let subscription = state
        .push_store
        .upsert_subscription(
            user.user_id(),
            device_id.as_ref(),
            endpoint,
            &SubscriptionKeys {
                p256dh: keys.p256dh.trim().to_string(),
                auth: keys.auth.trim().to_string(),
            },
        )
        .await?;
    tracing::info!(
        user_id = user.user_id(),
        device_id = device_id.as_ref().map(DeviceId::as_str),
        "push subscription stored"
    );
    Ok((
        StatusCode::OK,
        Json(SubscribeResponse {
            success: true,
            subscription,
        }),
    ))
}

/// `POST /api/push/unsubscribe`: Remove a push subscription by endpoint.
///
/// # Errors
///
/// Returns [`HubError`] on validation or store failure.
#[utoipa::path(
    post,
    path = "/api/push/unsubscribe",
    tag = "Push",
    summary = "Unsubscribe from push notifications",
    description = "Deletes the subscription with the given endpoint. Succeeds whether or not it existed.",
    security(("bearer_auth" = [])),
    request_body = UnsubscribeRequest,
    responses(
        (status = 200, description = "Subscription removed", body = SuccessResponse),
        (status = 400, description = "Missing endpoint", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_write.enforce("unsubscribe", user.user_id()).await?;
    let endpoint = req
        .subscription
        .and_then(|s| s.endpoint)
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| HubError::InvalidRequest("endpoint is required".to_string()))?;
    let removed = state.push_store.delete_subscription(endpoint.trim()).await?;
    tracing::info!(user_id = user.user_id(), removed, "push subscription removed");
    Ok((StatusCode::OK, Json(SuccessResponse { success: true })))
}

/// `GET /api/push/subscriptions`: The caller's subscriptions.
///
/// # Errors
///
/// Returns [`HubError`] on authentication or store failure.
#[utoipa::path(
    get,
    path = "/api/push/subscriptions",
    tag = "Push",
    summary = "List push subscriptions",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's subscriptions", body = SubscriptionListResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_read.enforce("subscriptions", user.user_id()).await?;
    let subscriptions = state
        .push_store
        .subscriptions_for_user(user.user_id())
        .await?;
    Ok((StatusCode::OK, Json(SubscriptionListResponse { subscriptions })))
}

/// `GET /api/push/preferences`: The caller's notification preferences.
///
/// # Errors
///
/// Returns [`HubError`] on authentication or store failure.
#[utoipa::path(
    get,
    path = "/api/push/preferences",
    tag = "Push",
    summary = "Get notification preferences",
    description = "Returns the caller's per-category flags, creating the all-enabled default on first access.",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Preferences", body = PreferencesResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn get_preferences(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_read.enforce("preferences", user.user_id()).await?;
    let preferences = state
        .push_store
        .get_or_create_preferences(user.user_id())
        .await?;
    Ok((StatusCode::OK, Json(PreferencesResponse { preferences })))
}

/// `PUT /api/push/preferences`: Update notification preferences.
///
/// # Errors
///
/// Returns [`HubError`] on validation or store failure.
#[utoipa::path(
    put,
    path = "/api/push/preferences",
    tag = "Push",
    summary = "Update notification preferences",
    description = "Applies a partial update; flags absent from the body keep their value.",
    security(("bearer_auth" = [])),
    request_body = UpdatePreferencesRequest,
    responses(
        (status = 200, description = "Updated preferences", body = UpdatePreferencesResponse),
        (status = 400, description = "Missing preferences object", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn update_preferences(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.user_write.enforce("preferences", user.user_id()).await?;
    let patch = req
        .preferences
        .ok_or_else(|| HubError::InvalidRequest("preferences object is required".to_string()))?;
    let preferences = state
        .push_store
        .update_preferences(user.user_id(), &patch)
        .await?;
    tracing::info!(user_id = user.user_id(), "notification preferences updated");
    Ok((
        StatusCode::OK,
        Json(UpdatePreferencesResponse {
            success: true,
            preferences,
        }),
    ))
}

/// `POST /api/push/notify`: Device-initiated notification.
///
/// # Errors
///
/// Returns [`HubError`] on rate limit, validation, unknown or unclaimed
/// device, or store failure.
#[utoipa::path(
    post,
    path = "/api/push/notify",
    tag = "Push",
    summary = "Send a device notification",
    description = "Called by a device to alert its owners. Delivered as Web Push to every subscription for the device whose owner has the category enabled. Rate limited per client address; the address comes from `X-Forwarded-For` only when the hub is configured to trust its proxy.",
    request_body = NotifyRequest,
    responses(
        (status = 200, description = "Notification dispatched", body = NotifyResponse),
        (status = 400, description = "Missing fields or malformed device id", body = ErrorResponse),
        (status = 404, description = "Device unknown or not claimed", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
    )
)]
pub async fn notify(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(req): Json<NotifyRequest>,
) -> Result<impl IntoResponse, HubError> {
    state.limits.notify.enforce("notify", &ip).await?;

    let (Some(raw_id), Some(notification)) = (req.device_id.as_deref(), req.notification) else {
        return Err(HubError::InvalidRequest(
            "deviceId and notification are required".to_string(),
        ));
    };
    let device_id = DeviceId::parse_canonical(raw_id)
        .ok_or_else(|| HubError::InvalidDeviceId(raw_id.to_string()))?;

    if !state.devices.device_exists(&device_id).await? {
        return Err(HubError::DeviceNotFound(device_id.to_string()));
    }
    if !state.devices.device_has_owner(&device_id).await? {
        return Err(HubError::DeviceNotClaimed(device_id.to_string()));
    }

    let kind = notification
        .kind
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(DEFAULT_NOTIFY_KIND);
    let payload =
        NotificationDispatcher::device_payload(&device_id, kind, notification.message.as_deref());
    let report = state
        .dispatcher
        .dispatch_to_device(&device_id, &payload, NotificationCategory::parse(kind))
        .await?;

    Ok((
        StatusCode::OK,
        Json(NotifyResponse {
            success: true,
            sent_count: report.delivered,
        }),
    ))
}

/// Push routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/push/vapid-key", get(vapid_key))
        .route("/api/push/subscribe", post(subscribe))
        .route("/api/push/unsubscribe", post(unsubscribe))
        .route("/api/push/subscriptions", get(list_subscriptions))
        .route(
            "/api/push/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route("/api/push/notify", post(notify))
}
