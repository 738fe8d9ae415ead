//! Inbound frame classification.

use serde_json::Value;

use super::events::{ConnectedEvent, SettingsEvent, StatusEvent};
use crate::error::{MowerError, Result};

const TYPE_CONNECTED: &str = "connected";
const TYPE_STATUS: &str = "status-event";
const TYPE_SETTINGS: &str = "settings-event";
const TYPE_POSITIONS: &str = "positions-event";

/// A parsed frame, classified by its `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Connection handshake.
    Connected(ConnectedEvent),
    Status(StatusEvent),
    Settings(SettingsEvent),
    /// Position history. Accepted but not forwarded.
    Positions,
    /// Well-formed frame of a kind this crate does not handle.
    Unrecognized(String),
}

impl InboundFrame {
    pub fn kind(&self) -> &str {
        match self {
            Self::Connected(_) => TYPE_CONNECTED,
            Self::Status(_) => TYPE_STATUS,
            Self::Settings(_) => TYPE_SETTINGS,
            Self::Positions => TYPE_POSITIONS,
            Self::Unrecognized(kind) => kind,
        }
    }
}

/// Parse a text frame.
///
/// Invalid JSON, a missing `type` field, or a known type with a payload that
/// does not match its schema yields [`MowerError::Protocol`].
pub fn parse_frame(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| MowerError::protocol(format!("invalid JSON: {e}")))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MowerError::protocol("frame has no type field"))?
        .to_string();

    let frame = match kind.as_str() {
        TYPE_CONNECTED => InboundFrame::Connected(decode(&kind, value)?),
        TYPE_STATUS => InboundFrame::Status(decode(&kind, value)?),
        TYPE_SETTINGS => InboundFrame::Settings(decode(&kind, value)?),
        TYPE_POSITIONS => InboundFrame::Positions,
        _ => InboundFrame::Unrecognized(kind),
    };

    Ok(frame)
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| MowerError::protocol(format!("invalid {kind}: {e}")))
}
