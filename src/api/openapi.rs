//! OpenAPI document for the REST surface.

use std::sync::OnceLock;

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::dto::{
    ClaimDeviceRequest, ClaimDeviceResponse, ClaimTokenRequest, ClaimTokenResponse,
    DeviceListResponse, NotificationBody, NotifyRequest, NotifyResponse, OwnedDeviceListResponse,
    PreferencesResponse, RenameDeviceRequest, RenameDeviceResponse, SubscribeRequest, SubscribeResponse, SubscriptionBody, SubscriptionListResponse,
    SuccessResponse, UnsubscribeRequest, UpdatePreferencesRequest, UpdatePreferencesResponse,
    VapidKeyResponse,
};
use crate::api::handlers::{devices, push, system};
use crate::domain::DeviceSnapshot;
use crate::error::{ErrorBody, ErrorResponse};
use crate::persistence::{DeviceRecord, PushSubscription, SubscriptionKeys};
use crate::push::{NotificationPreferences, PreferencesPatch};

static OPENAPI_JSON: OnceLock<String> = OnceLock::new();

/// Returns the OpenAPI document as pretty-printed JSON.
pub fn openapi_json() -> &'static str {
    OPENAPI_JSON.get_or_init(|| {
        ApiDoc::openapi()
            .to_pretty_json()
            .unwrap_or_else(|_| "{}".to_string())
    })
}

/// OpenAPI description of every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "relay-hub API",
        description = "Device relay hub: connected devices, pairing, and Web Push notifications."
    ),
    components(
        schemas(
            ErrorResponse,
            ErrorBody,
            system::HealthResponse,
            DeviceSnapshot,
            DeviceRecord,
            DeviceListResponse,
            OwnedDeviceListResponse,
            RenameDeviceRequest,
            RenameDeviceResponse,
            ClaimTokenRequest,
            ClaimTokenResponse,
            ClaimDeviceRequest,
            ClaimDeviceResponse,
            SubscriptionKeys,
            PushSubscription,
            SubscriptionBody,
            SubscribeRequest,
            SubscribeResponse,
            UnsubscribeRequest,
            SuccessResponse,
            SubscriptionListResponse,
            NotificationPreferences,
            PreferencesPatch,
            PreferencesResponse,
            UpdatePreferencesRequest,
            UpdatePreferencesResponse,
            NotificationBody,
            NotifyRequest,
            NotifyResponse,
            VapidKeyResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "System", description = "Service health"),
        (name = "Devices", description = "Owned and connected devices, and pairing"),
        (name = "Push", description = "Web Push subscriptions, preferences, and device notifications")
    ),
    paths(
        system::health_handler,
        devices::list_owned_devices,
        devices::list_connected_devices,
        devices::rename_device,
        devices::remove_device,
        devices::register_claim_token,
        devices::claim_device,
        push::vapid_key,
        push::subscribe,
        push::unsubscribe,
        push::list_subscriptions,
        push::get_preferences,
        push::update_preferences,
        push::notify
    )
)]
pub struct ApiDoc;

#[derive(Debug)]
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc: serde_json::Value = serde_json::from_str(openapi_json()).unwrap_or_default();
        for path in [
            "/api/health",
            "/api/devices",
            "/api/devices/connected",
            "/api/devices/{id}",
            "/api/devices/claim",
            "/api/devices/claim-token",
            "/api/push/notify",
            "/api/push/preferences",
        ] {
            assert!(doc["paths"].get(path).is_some(), "missing {path}");
        }
        assert!(doc["components"]["securitySchemes"].get("bearer_auth").is_some());
    }
}
