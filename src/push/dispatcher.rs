//! Best-effort push fan-out.
//!
//! [`NotificationDispatcher`] loads the subscriptions for a device (or a
//! user), filters them through each subscriber's preferences, and sends
//! concurrently. Endpoints the push service reports as gone are deleted on
//! the way; other failures are only counted.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::json;

use super::category::GENERIC_TEMPLATE;
use super::transport::{PushError, PushPayload, PushTransport};
use super::NotificationCategory;
use crate::domain::DeviceId;
use crate::error::StoreError;
use crate::persistence::{PushStore, PushSubscription};

/// Icon and badge shown with every notification.
pub const NOTIFICATION_ICON: &str = "/logo-icon.svg";

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscriptions a send was attempted for.
    pub attempted: usize,
    /// Sends that succeeded.
    pub delivered: usize,
    /// Subscriptions skipped because the category is disabled.
    pub skipped: usize,
    /// Subscriptions deleted because their endpoint is gone.
    pub removed: usize,
}

/// Sends push notifications on behalf of devices.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn PushStore>,
    transport: Arc<dyn PushTransport>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over a push store and transport.
    #[must_use]
    pub fn new(store: Arc<dyn PushStore>, transport: Arc<dyn PushTransport>) -> Self {
        Self { store, transport }
    }

    /// Builds the payload for a device-reported notification.
    ///
    /// `kind` is the device's category string; unknown kinds get the
    /// generic template. `message`, when present, replaces the template
    /// body.
    #[must_use]
    pub fn device_payload(device_id: &DeviceId, kind: &str, message: Option<&str>) -> PushPayload {
        let template = NotificationCategory::parse(kind)
            .map_or(GENERIC_TEMPLATE, NotificationCategory::template);
        PushPayload {
            title: template.title.to_string(),
            body: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(template.body)
                .to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            tag: template.tag.to_string(),
            require_interaction: template.require_interaction,
            data: json!({
                "deviceId": device_id,
                "type": kind,
                "url": format!("/device/{device_id}"),
            }),
        }
    }

    /// Sends `payload` to every subscription registered for the device.
    ///
    /// With a `category`, subscribers who disabled it are skipped. Without
    /// one, no preference check is made.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] only if the subscriptions cannot be loaded.
    /// Per-subscription failures are reported in the [`DispatchReport`].
    pub async fn dispatch_to_device(
        &self,
        device_id: &DeviceId,
        payload: &PushPayload,
        category: Option<NotificationCategory>,
    ) -> Result<DispatchReport, StoreError> {
        let subscriptions = self.store.subscriptions_for_device(device_id).await?;
        let total = subscriptions.len();
        let allowed = match category {
            Some(category) => self.filter_by_preference(subscriptions, category).await,
            None => subscriptions,
        };
        let mut report = self.deliver(allowed, payload).await;
        report.skipped = total - report.attempted;
        tracing::info!(
            device_id = %device_id,
            category = category.map(NotificationCategory::as_str),
            attempted = report.attempted,
            delivered = report.delivered,
            skipped = report.skipped,
            removed = report.removed,
            "push dispatched to device"
        );
        Ok(report)
    }

    /// Sends `payload` to every subscription of the user, without a
    /// preference check.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] only if the subscriptions cannot be loaded.
    pub async fn dispatch_to_user(
        &self,
        user_id: &str,
        payload: &PushPayload,
    ) -> Result<DispatchReport, StoreError> {
        let subscriptions = self.store.subscriptions_for_user(user_id).await?;
        let report = self.deliver(subscriptions, payload).await;
        tracing::info!(
            user_id,
            attempted = report.attempted,
            delivered = report.delivered,
            removed = report.removed,
            "push dispatched to user"
        );
        Ok(report)
    }

    async fn filter_by_preference(
        &self,
        subscriptions: Vec<PushSubscription>,
        category: NotificationCategory,
    ) -> Vec<PushSubscription> {
        let mut allowed_by_user: HashMap<String, bool> = HashMap::new();
        let mut allowed = Vec::with_capacity(subscriptions.len());
        for sub in subscriptions {
            let permitted = match allowed_by_user.get(&sub.user_id) {
                Some(permitted) => *permitted,
                None => {
                    let permitted = match self.store.preferences(&sub.user_id).await {
                        Ok(prefs) => prefs.is_none_or(|p| p.allows(category)),
                        Err(e) => {
                            // unreadable preferences fall back to the defaults
                            tracing::warn!(user_id = %sub.user_id, error = %e, "failed to load preferences");
                            true
                        }
                    };
                    allowed_by_user.insert(sub.user_id.clone(), permitted);
                    permitted
                }
            };
            if permitted {
                allowed.push(sub);
            }
        }
        allowed
    }

    async fn deliver(
        &self,
        subscriptions: Vec<PushSubscription>,
        payload: &PushPayload,
    ) -> DispatchReport {
        let sends = subscriptions.iter().map(|sub| async move {
            let result = self.transport.send(sub, payload).await;
            (sub, result)
        });
        let results = join_all(sends).await;

        let mut report = DispatchReport {
            attempted: results.len(),
            ..DispatchReport::default()
        };
        for (sub, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(PushError::Gone) => {
                    tracing::info!(endpoint = %sub.endpoint, "removing expired push subscription");
                    match self.store.delete_subscription(&sub.endpoint).await {
                        Ok(true) => report.removed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(endpoint = %sub.endpoint, error = %e, "failed to remove subscription");
                        }
                    }
                }
                Err(e @ PushError::Failed(_)) => {
                    tracing::warn!(endpoint = %sub.endpoint, error = %e, "push delivery failed");
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;
    use std::sync::PoisonError;

    use async_trait::async_trait;

    use super::*;
    use crate::persistence::{MemoryStore, SubscriptionKeys};
    use crate::push::PreferencesPatch;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        gone: Vec<String>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(
            &self,
            subscription: &PushSubscription,
            _payload: &PushPayload,
        ) -> Result<(), PushError> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(subscription.endpoint.clone());
            if self.gone.contains(&subscription.endpoint) {
                return Err(PushError::Gone);
            }
            if self.failing.contains(&subscription.endpoint) {
                return Err(PushError::Failed("503".to_string()));
            }
            Ok(())
        }
    }

    fn device() -> DeviceId {
        let Some(id) = DeviceId::parse_canonical("BRW-AABBCCDD") else {
            panic!("valid id");
        };
        id
    }

    fn keys() -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: "p".to_string(),
            auth: "a".to_string(),
        }
    }

    async fn subscribe(store: &MemoryStore, user: &str, endpoint: &str) {
        let Ok(_) = store
            .upsert_subscription(user, Some(&device()), endpoint, &keys())
            .await
        else {
            panic!("subscription stored");
        };
    }

    fn dispatcher(
        store: &Arc<MemoryStore>,
        transport: RecordingTransport,
    ) -> (NotificationDispatcher, Arc<RecordingTransport>) {
        let transport = Arc::new(transport);
        (
            NotificationDispatcher::new(
                Arc::clone(store) as Arc<dyn PushStore>,
                Arc::clone(&transport) as Arc<dyn PushTransport>,
            ),
            transport,
        )
    }

    #[tokio::test]
    async fn disabled_subscribers_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        // five subscriptions across three users; two users opt out
        subscribe(&store, "alice", "https://push/a1").await;
        subscribe(&store, "alice", "https://push/a2").await;
        subscribe(&store, "bob", "https://push/b1").await;
        subscribe(&store, "carol", "https://push/c1").await;
        subscribe(&store, "carol", "https://push/c2").await;
        let off = PreferencesPatch::single(NotificationCategory::WaterEmpty, false);
        let _ = store.update_preferences("alice", &off).await;
        let _ = store.update_preferences("bob", &off).await;

        let (dispatcher, transport) = dispatcher(&store, RecordingTransport::default());
        let payload = NotificationDispatcher::device_payload(&device(), "WATER_EMPTY", None);
        let Ok(report) = dispatcher
            .dispatch_to_device(&device(), &payload, Some(NotificationCategory::WaterEmpty))
            .await
        else {
            panic!("dispatch succeeds");
        };

        assert_eq!(report.attempted, 2);
        assert_eq!(report.skipped, 3);
        assert!(report.delivered <= report.attempted);
        let mut sent = transport
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        sent.sort();
        assert_eq!(sent, vec!["https://push/c1", "https://push/c2"]);
    }

    #[tokio::test]
    async fn other_categories_still_delivered() {
        let store = Arc::new(MemoryStore::new());
        subscribe(&store, "alice", "https://push/a1").await;
        let off = PreferencesPatch::single(NotificationCategory::WaterEmpty, false);
        let _ = store.update_preferences("alice", &off).await;

        let (dispatcher, _transport) = dispatcher(&store, RecordingTransport::default());
        let payload = NotificationDispatcher::device_payload(&device(), "BREW_COMPLETE", None);
        let Ok(report) = dispatcher
            .dispatch_to_device(&device(), &payload, Some(NotificationCategory::BrewComplete))
            .await
        else {
            panic!("dispatch succeeds");
        };
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn gone_endpoints_are_deleted_and_failures_counted() {
        let store = Arc::new(MemoryStore::new());
        subscribe(&store, "alice", "https://push/ok").await;
        subscribe(&store, "alice", "https://push/gone").await;
        subscribe(&store, "alice", "https://push/flaky").await;

        let transport = RecordingTransport {
            gone: vec!["https://push/gone".to_string()],
            failing: vec!["https://push/flaky".to_string()],
            ..RecordingTransport::default()
        };
        let (dispatcher, _transport) = dispatcher(&store, transport);
        let payload = NotificationDispatcher::device_payload(&device(), "info", Some("hello"));
        let Ok(report) = dispatcher.dispatch_to_device(&device(), &payload, None).await else {
            panic!("dispatch succeeds");
        };

        assert_eq!(
            report,
            DispatchReport {
                attempted: 3,
                delivered: 1,
                skipped: 0,
                removed: 1,
            }
        );
        let Ok(remaining) = store.subscriptions_for_device(&device()).await else {
            panic!("query succeeds");
        };
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.endpoint != "https://push/gone"));
    }

    #[tokio::test]
    async fn dispatch_to_user_reaches_all_endpoints() {
        let store = Arc::new(MemoryStore::new());
        subscribe(&store, "alice", "https://push/a1").await;
        let _ = store
            .upsert_subscription("alice", None, "https://push/a2", &keys())
            .await;
        subscribe(&store, "bob", "https://push/b1").await;

        let (dispatcher, _transport) = dispatcher(&store, RecordingTransport::default());
        let payload = NotificationDispatcher::device_payload(&device(), "info", None);
        let Ok(report) = dispatcher.dispatch_to_user("alice", &payload).await else {
            panic!("dispatch succeeds");
        };
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
    }

    #[test]
    fn payload_uses_category_template() {
        let payload = NotificationDispatcher::device_payload(&device(), "WATER_EMPTY", None);
        assert_eq!(payload.title, "Water Tank Empty");
        assert_eq!(payload.tag, "water-empty");
        assert!(payload.require_interaction);
        assert_eq!(payload.data["url"], "/device/BRW-AABBCCDD");
        assert_eq!(payload.data["type"], "WATER_EMPTY");

        let custom = NotificationDispatcher::device_payload(&device(), "unknown", Some("Hi"));
        assert_eq!(custom.title, GENERIC_TEMPLATE.title);
        assert_eq!(custom.body, "Hi");
        assert_eq!(custom.icon, NOTIFICATION_ICON);
    }
}
