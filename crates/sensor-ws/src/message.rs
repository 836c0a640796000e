//! Wire messages and event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names emitted on the bus.
pub mod events {
    /// Transport opened. Payload: [`super::ConnectedEvent`].
    pub const CONNECTED: &str = "connected";
    /// An established connection ended. Payload: [`super::DisconnectedEvent`].
    pub const DISCONNECTED: &str = "disconnected";
    /// Every decoded inbound frame, unmodified.
    pub const MESSAGE: &str = "message";
    /// `data` of a `sensor_update` frame.
    pub const SENSOR_UPDATE: &str = "sensor_update";
    /// `data` of an `anomaly_detected` frame.
    pub const ANOMALY: &str = "anomaly";
    /// Transport-level error report. Payload: [`super::ErrorEvent`].
    pub const ERROR: &str = "error";
    /// Retries exhausted. Payload: [`super::MaxReconnectAttemptsEvent`].
    pub const MAX_RECONNECT_ATTEMPTS: &str = "max_reconnect_attempts";

    /// All event names, in no particular order.
    pub const ALL: [&str; 7] = [
        CONNECTED,
        DISCONNECTED,
        MESSAGE,
        SENSOR_UPDATE,
        ANOMALY,
        ERROR,
        MAX_RECONNECT_ATTEMPTS,
    ];
}

static NULL: Value = Value::Null;

// ============================================================================
// Inbound
// ============================================================================

/// Classification of an inbound frame by its `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    SensorUpdate,
    AnomalyDetected,
    /// Unknown or missing discriminator. Only the generic `message` event fires.
    Other,
}

impl FrameKind {
    pub fn from_type(frame_type: Option<&str>) -> Self {
        match frame_type {
            Some("sensor_update") => Self::SensorUpdate,
            Some("anomaly_detected") => Self::AnomalyDetected,
            _ => Self::Other,
        }
    }

    /// Stable label (`sensor_update`, `anomaly_detected`, `other`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SensorUpdate => "sensor_update",
            Self::AnomalyDetected => "anomaly_detected",
            Self::Other => "other",
        }
    }

    /// Bus event the frame's `data` is re-emitted under, if any.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::SensorUpdate => Some(events::SENSOR_UPDATE),
            Self::AnomalyDetected => Some(events::ANOMALY),
            Self::Other => None,
        }
    }
}

/// A decoded inbound frame: `{ "type": string, "data": object }`.
///
/// Any valid JSON is accepted; a frame without `type` or `data` is still
/// delivered on the generic `message` event.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    raw: Value,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let raw = serde_json::from_str(text)?;
        Ok(Self { raw })
    }

    /// The `type` discriminator.
    pub fn frame_type(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    pub fn kind(&self) -> FrameKind {
        FrameKind::from_type(self.frame_type())
    }

    /// The `data` field, or `null` when absent.
    pub fn data(&self) -> &Value {
        self.raw.get("data").unwrap_or(&NULL)
    }

    /// The whole decoded frame.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    pub fn into_value(self) -> Value {
        self.raw
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Control messages understood by the sensor stream server.
///
/// Serialized as `{"type": "subscribe", "sensor_id": 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    Subscribe { sensor_id: u32 },
    Unsubscribe { sensor_id: u32 },
    GetLatest { sensor_id: u32 },
}

impl ControlRequest {
    pub fn sensor_id(&self) -> u32 {
        match self {
            Self::Subscribe { sensor_id }
            | Self::Unsubscribe { sensor_id }
            | Self::GetLatest { sensor_id } => *sensor_id,
        }
    }
}

// ============================================================================
// Lifecycle event payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedEvent {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectedEvent {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxReconnectAttemptsEvent {
    pub attempts: u32,
}

/// Serialize a lifecycle payload for the bus.
pub(crate) fn to_payload<T: Serialize>(event: &T) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}
