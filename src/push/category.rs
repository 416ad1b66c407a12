//! Notification categories and their default presentation.
//!
//! The set of categories is closed. Each maps to exactly one preference
//! flag (see [`super::NotificationPreferences::allows`]) and one default
//! template. A category string that does not parse is not an error: it
//! bypasses the preference check and uses the generic template.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of device-originated notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationCategory {
    /// Machine reached brewing temperature.
    MachineReady,
    /// Water tank ran dry.
    WaterEmpty,
    /// Descaling is due.
    DescaleDue,
    /// Maintenance is due.
    ServiceDue,
    /// Backflush is due.
    BackflushDue,
    /// Machine reported a fault.
    MachineError,
    /// Control board stopped responding.
    PicoOffline,
    /// A schedule fired.
    ScheduleTriggered,
    /// A brew finished.
    BrewComplete,
}

/// Default title, body, tag, and interaction flag for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTemplate {
    /// Notification title.
    pub title: &'static str,
    /// Body used when the device supplies no message.
    pub body: &'static str,
    /// Tag used to collapse repeated notifications.
    pub tag: &'static str,
    /// Keep the notification visible until the user acts on it.
    pub require_interaction: bool,
}

/// Template for notifications without a recognized category.
pub const GENERIC_TEMPLATE: NotificationTemplate = NotificationTemplate {
    title: "Notification",
    body: "You have a new notification",
    tag: "device-notification",
    require_interaction: false,
};

impl NotificationCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::MachineReady,
        Self::WaterEmpty,
        Self::DescaleDue,
        Self::ServiceDue,
        Self::BackflushDue,
        Self::MachineError,
        Self::PicoOffline,
        Self::ScheduleTriggered,
        Self::BrewComplete,
    ];

    /// Parses the wire name (e.g. `"WATER_EMPTY"`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MachineReady => "MACHINE_READY",
            Self::WaterEmpty => "WATER_EMPTY",
            Self::DescaleDue => "DESCALE_DUE",
            Self::ServiceDue => "SERVICE_DUE",
            Self::BackflushDue => "BACKFLUSH_DUE",
            Self::MachineError => "MACHINE_ERROR",
            Self::PicoOffline => "PICO_OFFLINE",
            Self::ScheduleTriggered => "SCHEDULE_TRIGGERED",
            Self::BrewComplete => "BREW_COMPLETE",
        }
    }

    /// Returns the default presentation for this category.
    #[must_use]
    pub const fn template(self) -> NotificationTemplate {
        match self {
            Self::MachineReady => NotificationTemplate {
                title: "Machine Ready",
                body: "Your espresso machine is ready to brew",
                tag: "machine-ready",
                require_interaction: false,
            },
            Self::WaterEmpty => NotificationTemplate {
                title: "Water Tank Empty",
                body: "Please refill the water tank",
                tag: "water-empty",
                require_interaction: true,
            },
            Self::DescaleDue => NotificationTemplate {
                title: "Descale Due",
                body: "Time to descale your machine",
                tag: "descale-due",
                require_interaction: false,
            },
            Self::ServiceDue => NotificationTemplate {
                title: "Service Due",
                body: "Maintenance recommended",
                tag: "service-due",
                require_interaction: false,
            },
            Self::BackflushDue => NotificationTemplate {
                title: "Backflush Reminder",
                body: "Time to backflush your machine",
                tag: "backflush-due",
                require_interaction: false,
            },
            Self::MachineError => NotificationTemplate {
                title: "Machine Error",
                body: "Your machine needs attention",
                tag: "machine-error",
                require_interaction: true,
            },
            Self::PicoOffline => NotificationTemplate {
                title: "Control Board Offline",
                body: "The control board is not responding",
                tag: "pico-offline",
                require_interaction: true,
            },
            Self::ScheduleTriggered => NotificationTemplate {
                title: "Schedule Triggered",
                body: "A schedule has been triggered",
                tag: "schedule-triggered",
                require_interaction: false,
            },
            Self::BrewComplete => NotificationTemplate {
                title: "Brew Complete",
                body: "Your coffee is ready!",
                tag: "brew-complete",
                require_interaction: false,
            },
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
