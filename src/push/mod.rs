//! Push notification fallback.
//!
//! When a device raises an alert, the hub delivers it as a Web Push
//! notification to every subscribed browser, filtered by each user's
//! per-category preferences.

pub mod category;
pub mod dispatcher;
pub mod preferences;
pub mod transport;
pub mod vapid;

pub use category::{NotificationCategory, NotificationTemplate};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use preferences::{NotificationPreferences, PreferencesPatch};
pub use transport::{PushError, PushPayload, PushTransport, WebPushTransport};
pub use vapid::VapidKeys;
