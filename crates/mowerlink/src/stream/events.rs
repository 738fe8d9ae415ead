//! Typed events delivered to stream callbacks.
//!
//! Only the fields the dispatcher and typical consumers need are modelled;
//! everything else in the vendor payload is ignored. Enumerations coming from
//! the vendor (mode, activity, state, ...) are kept as plain strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handshake frame sent by the server right after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Live status of one mower.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "id")]
    pub device_id: String,
    #[serde(default)]
    pub attributes: StatusAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAttributes {
    #[serde(default)]
    pub battery: Option<Battery>,
    #[serde(default)]
    pub mower: Option<MowerActivity>,
    #[serde(default)]
    pub planner: Option<Planner>,
    #[serde(default)]
    pub metadata: Option<StatusMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    pub battery_percent: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MowerActivity {
    pub mode: Option<String>,
    pub activity: Option<String>,
    pub state: Option<String>,
    pub error_code: Option<i64>,
}

/// Planner block of a status event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Planner {
    /// Next scheduled start in epoch milliseconds, `0` when none.
    pub next_start_timestamp: Option<i64>,
    #[serde(rename = "override")]
    pub planner_override: Option<PlannerOverride>,
    pub restricted_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerOverride {
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusMetadata {
    pub connected: Option<bool>,
    pub status_timestamp: Option<i64>,
}

impl Planner {
    /// Next scheduled start, if the planner has one.
    pub fn next_start(&self) -> Option<DateTime<Utc>> {
        self.next_start_timestamp
            .filter(|ts| *ts > 0)
            .and_then(DateTime::from_timestamp_millis)
    }

    pub fn override_action(&self) -> Option<&str> {
        self.planner_override
            .as_ref()
            .and_then(|o| o.action.as_deref())
    }
}

/// Settings change of one mower.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SettingsEvent {
    #[serde(rename = "id")]
    pub device_id: String,
    #[serde(default)]
    pub attributes: SettingsAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsAttributes {
    pub calendar: Option<Calendar>,
    pub cutting_height: Option<u8>,
}

/// Weekly mowing calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Calendar {
    pub tasks: Vec<CalendarTask>,
}

/// One calendar slot. `start` and `duration` are minutes after midnight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CalendarTask {
    pub start: u32,
    pub duration: u32,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl CalendarTask {
    /// Whether the slot is active on at least one weekday.
    pub fn is_active(&self) -> bool {
        self.duration > 0
            && (self.monday
                || self.tuesday
                || self.wednesday
                || self.thursday
                || self.friday
                || self.saturday
                || self.sunday)
    }
}

/// Schedule view derived from the latest settings and status of a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEvent {
    pub device_id: String,
    /// Next planned start reported by the planner.
    pub next_start: Option<DateTime<Utc>>,
    pub restricted_reason: Option<String>,
    pub override_action: Option<String>,
    /// Calendar slots from the last settings event.
    pub tasks: Vec<CalendarTask>,
}

impl ScheduleEvent {
    pub(crate) fn from_parts(device_id: &str, calendar: &Calendar, planner: &Planner) -> Self {
        Self {
            device_id: device_id.to_string(),
            next_start: planner.next_start(),
            restricted_reason: planner.restricted_reason.clone(),
            override_action: planner.override_action().map(str::to_string),
            tasks: calendar.tasks.clone(),
        }
    }

    /// Whether the calendar has at least one active slot.
    pub fn has_active_tasks(&self) -> bool {
        self.tasks.iter().any(CalendarTask::is_active)
    }
}
