//! Per-user notification preferences.
//!
//! One row per user, created lazily with every flag enabled and updated by
//! partial patch. Each [`NotificationCategory`] maps to exactly one flag.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::NotificationCategory;

/// Opt-in flags, one per notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct NotificationPreferences {
    /// [`NotificationCategory::MachineReady`]
    pub machine_ready: bool,
    /// [`NotificationCategory::WaterEmpty`]
    pub water_empty: bool,
    /// [`NotificationCategory::DescaleDue`]
    pub descale_due: bool,
    /// [`NotificationCategory::ServiceDue`]
    pub service_due: bool,
    /// [`NotificationCategory::BackflushDue`]
    pub backflush_due: bool,
    /// [`NotificationCategory::MachineError`]
    pub machine_error: bool,
    /// [`NotificationCategory::PicoOffline`]
    pub pico_offline: bool,
    /// [`NotificationCategory::ScheduleTriggered`]
    pub schedule_triggered: bool,
    /// [`NotificationCategory::BrewComplete`]
    pub brew_complete: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            machine_ready: true,
            water_empty: true,
            descale_due: true,
            service_due: true,
            backflush_due: true,
            machine_error: true,
            pico_offline: true,
            schedule_triggered: true,
            brew_complete: true,
        }
    }
}

impl NotificationPreferences {
    /// Returns `true` if notifications of `category` are enabled.
    #[must_use]
    pub const fn allows(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::MachineReady => self.machine_ready,
            NotificationCategory::WaterEmpty => self.water_empty,
            NotificationCategory::DescaleDue => self.descale_due,
            NotificationCategory::ServiceDue => self.service_due,
            NotificationCategory::BackflushDue => self.backflush_due,
            NotificationCategory::MachineError => self.machine_error,
            NotificationCategory::PicoOffline => self.pico_offline,
            NotificationCategory::ScheduleTriggered => self.schedule_triggered,
            NotificationCategory::BrewComplete => self.brew_complete,
        }
    }

    /// Applies the fields present in `patch`, leaving the rest untouched.
    pub fn apply(&mut self, patch: &PreferencesPatch) {
        let fields = [
            (&mut self.machine_ready, patch.machine_ready),
            (&mut self.water_empty, patch.water_empty),
            (&mut self.descale_due, patch.descale_due),
            (&mut self.service_due, patch.service_due),
            (&mut self.backflush_due, patch.backflush_due),
            (&mut self.machine_error, patch.machine_error),
            (&mut self.pico_offline, patch.pico_offline),
            (&mut self.schedule_triggered, patch.schedule_triggered),
            (&mut self.brew_complete, patch.brew_complete),
        ];
        for (flag, value) in fields {
            if let Some(value) = value {
                *flag = value;
            }
        }
    }
}

/// Partial update of [`NotificationPreferences`]; absent fields are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    /// New value for `machineReady`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ready: Option<bool>,
    /// New value for `waterEmpty`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_empty: Option<bool>,
    /// New value for `descaleDue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descale_due: Option<bool>,
    /// New value for `serviceDue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_due: Option<bool>,
    /// New value for `backflushDue`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backflush_due: Option<bool>,
    /// New value for `machineError`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_error: Option<bool>,
    /// New value for `picoOffline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pico_offline: Option<bool>,
    /// New value for `scheduleTriggered`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_triggered: Option<bool>,
    /// New value for `brewComplete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brew_complete: Option<bool>,
}

impl PreferencesPatch {
    /// A patch that sets a single category's flag.
    #[must_use]
    pub fn single(category: NotificationCategory, enabled: bool) -> Self {
        let mut patch = Self::default();
        let slot = match category {
            NotificationCategory::MachineReady => &mut patch.machine_ready,
            NotificationCategory::WaterEmpty => &mut patch.water_empty,
            NotificationCategory::DescaleDue => &mut patch.descale_due,
            NotificationCategory::ServiceDue => &mut patch.service_due,
            NotificationCategory::BackflushDue => &mut patch.backflush_due,
            NotificationCategory::MachineError => &mut patch.machine_error,
            NotificationCategory::PicoOffline => &mut patch.pico_offline,
            NotificationCategory::ScheduleTriggered => &mut patch.schedule_triggered,
            NotificationCategory::BrewComplete => &mut patch.brew_complete,
        };
        *slot = Some(enabled);
        patch
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_everything() {
        let prefs = NotificationPreferences::default();
        assert!(NotificationCategory::ALL.into_iter().all(|c| prefs.allows(c)));
    }

    #[test]
    fn each_category_maps_to_its_own_flag() {
        for category in NotificationCategory::ALL {
            let mut prefs = NotificationPreferences::default();
            prefs.apply(&PreferencesPatch::single(category, false));
            for other in NotificationCategory::ALL {
                assert_eq!(prefs.allows(other), other != category, "{category} vs {other}");
            }
        }
    }

    #[test]
    fn patch_leaves_absent_fields() {
        let mut prefs = NotificationPreferences::default();
        let Ok(patch) = serde_json::from_str::<PreferencesPatch>(r#"{"waterEmpty":false}"#) else {
            panic!("valid patch");
        };
        prefs.apply(&patch);
        assert!(!prefs.water_empty);
        assert!(prefs.machine_ready);
        assert!(prefs.brew_complete);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(NotificationPreferences::default()).unwrap_or_default();
        assert_eq!(json["scheduleTriggered"], true);
    }
}
