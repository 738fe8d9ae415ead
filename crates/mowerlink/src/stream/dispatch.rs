//! Callback registry and event dispatch.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::events::{Calendar, ConnectedEvent, Planner, ScheduleEvent, SettingsEvent, StatusEvent};
use super::frames::InboundFrame;
use crate::error::MowerError;

/// Error a callback may return. It is logged and otherwise ignored.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of every stream callback.
pub type CallbackResult = std::result::Result<(), CallbackError>;

pub(crate) type Callback<T> = Arc<dyn Fn(&T) -> CallbackResult + Send + Sync>;

/// One slot per callback kind. Registering replaces the previous callback.
#[derive(Default)]
pub(crate) struct StreamCallbacks {
    pub connected: Option<Callback<ConnectedEvent>>,
    pub disconnected: Option<Callback<()>>,
    pub error: Option<Callback<MowerError>>,
    pub status: Option<Callback<StatusEvent>>,
    pub settings: Option<Callback<SettingsEvent>>,
    pub schedule: Option<Callback<ScheduleEvent>>,
}

pub(crate) type SharedCallbacks = Arc<RwLock<StreamCallbacks>>;

/// Run a callback, containing both returned errors and panics.
fn invoke<T>(name: &'static str, callback: Option<Callback<T>>, value: &T) {
    let Some(callback) = callback else {
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(callback = name, error = %e, "Stream callback failed"),
        Err(_) => error!(callback = name, "Stream callback panicked"),
    }
}

/// Correlation entries older than this are dropped.
pub(crate) const CORRELATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of devices tracked for schedule correlation.
pub(crate) const MAX_TRACKED_DEVICES: usize = 1024;

#[derive(Debug)]
struct DeviceSnapshot {
    calendar: Option<Calendar>,
    planner: Option<Planner>,
    last_seen: Instant,
}

impl DeviceSnapshot {
    fn schedule(&self, device_id: &str) -> Option<ScheduleEvent> {
        let calendar = self.calendar.as_ref()?;
        let planner = self.planner.as_ref()?;
        Some(ScheduleEvent::from_parts(device_id, calendar, planner))
    }
}

/// Joins settings (calendar) and status (planner) per device.
///
/// A schedule is produced only once both halves have been seen for a device,
/// and again whenever either half is updated afterwards.
#[derive(Debug)]
pub(crate) struct ScheduleCorrelator {
    devices: HashMap<String, DeviceSnapshot>,
    ttl: Duration,
    capacity: usize,
}

impl Default for ScheduleCorrelator {
    fn default() -> Self {
        Self::with_limits(CORRELATION_TTL, MAX_TRACKED_DEVICES)
    }
}

impl ScheduleCorrelator {
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            devices: HashMap::new(),
            ttl,
            capacity,
        }
    }

    pub fn on_calendar(
        &mut self,
        device_id: &str,
        calendar: &Calendar,
        now: Instant,
    ) -> Option<ScheduleEvent> {
        let snapshot = self.touch(device_id, now);
        snapshot.calendar = Some(calendar.clone());
        snapshot.schedule(device_id)
    }

    pub fn on_planner(
        &mut self,
        device_id: &str,
        planner: &Planner,
        now: Instant,
    ) -> Option<ScheduleEvent> {
        let snapshot = self.touch(device_id, now);
        snapshot.planner = Some(planner.clone());
        snapshot.schedule(device_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    fn touch(&mut self, device_id: &str, now: Instant) -> &mut DeviceSnapshot {
        if !self.devices.contains_key(device_id) {
            self.prune(now);
        }

        let snapshot = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceSnapshot {
                calendar: None,
                planner: None,
                last_seen: now,
            });
        snapshot.last_seen = now;
        snapshot
    }

    /// Drop stale entries, then the oldest ones until there is room for one more.
    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.devices
            .retain(|_, snapshot| now.duration_since(snapshot.last_seen) <= ttl);

        while !self.devices.is_empty() && self.devices.len() >= self.capacity {
            let oldest = self
                .devices
                .iter()
                .min_by_key(|(_, snapshot)| snapshot.last_seen)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                debug!(device_id = %id, "Evicting schedule correlation entry");
                self.devices.remove(&id);
            }
        }
    }
}

/// Routes classified frames to the registered callbacks.
pub(crate) struct EventDispatcher {
    callbacks: SharedCallbacks,
    correlator: ScheduleCorrelator,
}

impl EventDispatcher {
    pub fn new(callbacks: SharedCallbacks) -> Self {
        Self {
            callbacks,
            correlator: ScheduleCorrelator::default(),
        }
    }

    pub fn dispatch(&mut self, frame: InboundFrame, now: Instant) {
        match frame {
            InboundFrame::Status(event) => {
                let schedule = event.attributes.planner.as_ref().and_then(|planner| {
                    self.correlator.on_planner(&event.device_id, planner, now)
                });
                let callback = self.callbacks.read().status.clone();
                invoke("status", callback, &event);
                self.emit_schedule(schedule);
            }
            InboundFrame::Settings(event) => {
                let schedule = event.attributes.calendar.as_ref().and_then(|calendar| {
                    self.correlator.on_calendar(&event.device_id, calendar, now)
                });
                let callback = self.callbacks.read().settings.clone();
                invoke("settings", callback, &event);
                self.emit_schedule(schedule);
            }
            InboundFrame::Positions => trace!("Ignoring positions frame"),
            InboundFrame::Connected(_) => trace!("Handshake frame reached dispatcher"),
            InboundFrame::Unrecognized(kind) => {
                warn!(kind = %kind, "Ignoring unrecognized event stream frame")
            }
        }
    }

    fn emit_schedule(&self, schedule: Option<ScheduleEvent>) {
        if let Some(schedule) = schedule {
            let callback = self.callbacks.read().schedule.clone();
            invoke("schedule", callback, &schedule);
        }
    }

    pub fn connected(&self, event: &ConnectedEvent) {
        let callback = self.callbacks.read().connected.clone();
        invoke("connected", callback, event);
    }

    pub fn disconnected(&self) {
        let callback = self.callbacks.read().disconnected.clone();
        invoke("disconnected", callback, &());
    }

    pub fn error(&self, error: &MowerError) {
        let callback = self.callbacks.read().error.clone();
        invoke("error", callback, error);
    }
}
