//! Resilient event stream.
//!
//! # Architecture
//!
//! - [`StreamTransport`]: socket abstraction reporting through [`TransportSignals`]
//! - [`WebSocketTransport`]: websocket implementation with bearer authentication
//! - [`EventStreamService`]: connection state, keep-alive, reconnect and dispatch
//! - `frames` / `dispatch`: frame classification, callbacks and schedule correlation

mod dispatch;
mod events;
mod frames;
mod service;
mod state;
mod transport;
mod websocket;

pub use dispatch::{CallbackError, CallbackResult};
pub use events::{
    Battery, Calendar, CalendarTask, ConnectedEvent, MowerActivity, Planner, PlannerOverride,
    ScheduleEvent, SettingsAttributes, SettingsEvent, StatusAttributes, StatusEvent,
    StatusMetadata,
};
pub use frames::{InboundFrame, parse_frame};
pub use service::EventStreamService;
pub use state::ConnectionState;
pub use transport::{StreamTransport, TransportSignal, TransportSignals};
pub use websocket::WebSocketTransport;
