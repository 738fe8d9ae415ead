//! Connection and keep-alive state of the event stream.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle of the single transport owned by the stream service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// Transport asked to open, no open signal yet.
    Connecting,
    /// Transport reported open.
    Connected,
    /// Transport closed or failed to open.
    Disconnected,
}

impl ConnectionState {
    /// Whether `self -> next` is a documented transition.
    ///
    /// Any state may go back to `Idle` when the service stops.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Connecting)
                | (Disconnected, Connecting)
                | (Connecting, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why a keep-alive tick decided to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectReason {
    /// The transport reports it is not connected.
    NotConnected,
    /// No event arrived on this connection within the threshold.
    NoEventsSinceOpen,
    /// The last event is older than the threshold.
    EventSilence,
}

/// Timing bookkeeping for the keep-alive loop.
#[derive(Debug, Default)]
pub(crate) struct KeepAliveState {
    /// Last parsed frame on the current connection. Unset on every new connection.
    pub last_event_at: Option<Instant>,
    /// When the current connection was opened.
    pub started_at: Option<Instant>,
    /// Guard shared by the timer path and the disconnect path.
    pub reconnecting: bool,
    /// Deadline of the next keep-alive tick, if armed.
    pub next_tick: Option<Instant>,
}

impl KeepAliveState {
    /// Record a freshly opened connection.
    pub fn reset_for_new_connection(&mut self, now: Instant) {
        self.last_event_at = None;
        self.started_at = Some(now);
    }

    /// Decide whether the current connection has to be replaced.
    pub fn reconnect_reason(
        &self,
        transport_connected: bool,
        now: Instant,
        threshold: Duration,
    ) -> Option<ReconnectReason> {
        if !transport_connected {
            return Some(ReconnectReason::NotConnected);
        }

        match (self.last_event_at, self.started_at) {
            (None, Some(started_at)) if now.duration_since(started_at) > threshold => {
                Some(ReconnectReason::NoEventsSinceOpen)
            }
            (Some(last_event_at), _) if now.duration_since(last_event_at) > threshold => {
                Some(ReconnectReason::EventSilence)
            }
            _ => None,
        }
    }

    /// Arm the next tick, unless a reconnect is running; its completion rearms instead.
    ///
    /// This is the only place the keep-alive deadline is computed.
    pub fn schedule_next_tick(&mut self, now: Instant, interval: Duration) {
        self.next_tick = (!self.reconnecting).then(|| now + interval);
    }

    /// Disarm the timer.
    pub fn cancel_tick(&mut self) {
        self.next_tick = None;
    }

    /// Whether an armed tick has reached its deadline.
    pub fn tick_due(&self, now: Instant) -> bool {
        self.next_tick.is_some_and(|deadline| deadline <= now)
    }
}
