//! `roverpos-types` – shared data model for the rover position pipeline.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`TimestampedValue`] – the unit of data flowing between pipeline stages.
//! - [`math`] – [`Vector`][math::Vector] and [`Quaternion`][math::Quaternion].
//! - [`sensor`] – raw 9-axis IMU samples and Decawave UWB location responses.
//! - [`estimate`] – attitude/position algorithm inputs and outputs.
//! - [`BusMessage`] – the envelope published on the message bus.
//! - [`RoverError`] – the workspace-wide error taxonomy.

pub mod estimate;
pub mod math;
pub mod sensor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use estimate::{AttitudeOutput, AttitudeStatus, Position, PositionInput};
pub use math::{Quaternion, TaitBryan, Vector};
pub use sensor::{DwmDistanceAndPosition, DwmLocationResponse, DwmPosition, NineDoFData};

// ────────────────────────────────────────────────────────────────────────────
// TimestampedValue
// ────────────────────────────────────────────────────────────────────────────

/// A value paired with the monotonic clock reading (seconds) at which it was
/// sampled or derived.
///
/// Immutable once constructed: stages read it through a shared reference and
/// build a new instance when they derive something from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue<T> {
    value: T,
    timestamp: f64,
}

impl<T> TimestampedValue<T> {
    pub fn new(value: T, timestamp: f64) -> Self {
        Self { value, timestamp }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Derive a new value carrying the same timestamp.
    pub fn map<U, F: FnOnce(&T) -> U>(&self, f: F) -> TimestampedValue<U> {
        TimestampedValue {
            value: f(&self.value),
            timestamp: self.timestamp,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Message bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Body of a bus message: JSON text or a raw binary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    /// The payload as UTF-8 text, if it is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }
}

/// Unified envelope routed over the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"data/position"` or `"heading/start"`
    pub topic: String,
    pub payload: Payload,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
            payload,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error taxonomy.
///
/// * `Validation` – malformed in-memory data; the offending sample is dropped.
/// * `Io` – hardware, file or publish failure; fatal to the provider or sink
///   that raised it.
/// * `ContractViolation` – a programming error (e.g. `receive` on a closed
///   filter); never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoverError {
    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("I/O Error on {component}: {details}")]
    Io { component: String, details: String },

    #[error("Contract Violation: {0}")]
    ContractViolation(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl RoverError {
    /// Build an [`RoverError::Io`] from any displayable failure.
    pub fn io(component: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RoverError::Io {
            component: component.into(),
            details: err.to_string(),
        }
    }

    /// Whether a polling loop must stop after seeing this error.
    ///
    /// Validation and serialization failures only cost the current sample.
    pub fn is_fatal_for_loop(&self) -> bool {
        matches!(self, RoverError::Io { .. } | RoverError::ContractViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamped_value_map_preserves_timestamp() {
        let ts = TimestampedValue::new(21i32, 12.5);
        let doubled = ts.map(|v| v * 2);
        assert_eq!(*doubled.value(), 42);
        assert!((doubled.timestamp() - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn timestamped_value_serialization_roundtrip() {
        let ts = TimestampedValue::new(Vector::new(1.0, 2.0, 3.0), 100.0);
        let json = serde_json::to_string(&ts).unwrap();
        let back: TimestampedValue<Vector> = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn payload_accessors() {
        let text = Payload::Text("{\"a\":1}".to_string());
        assert_eq!(text.as_text(), Some("{\"a\":1}"));
        assert_eq!(text.as_bytes(), b"{\"a\":1}");

        let bytes = Payload::Bytes(vec![1, 2, 3]);
        assert!(bytes.as_text().is_none());
        assert_eq!(bytes.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn bus_message_roundtrip() {
        let msg = BusMessage::new("data/position", Payload::Bytes(vec![0xAA, 0x55]));
        let json = serde_json::to_string(&msg).unwrap();
        let back: BusMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.topic, "data/position");
        assert_eq!(back.payload, msg.payload);
    }

    #[test]
    fn rover_error_display() {
        let err = RoverError::io("decawave", "serial port vanished");
        assert!(err.to_string().contains("decawave"));
        assert!(err.to_string().contains("serial port vanished"));

        let err2 = RoverError::ContractViolation("receive on closed filter".to_string());
        assert!(err2.to_string().contains("Contract Violation"));
    }

    #[test]
    fn only_io_and_contract_violations_are_fatal() {
        assert!(RoverError::io("imu", "timeout").is_fatal_for_loop());
        assert!(RoverError::ContractViolation("x".into()).is_fatal_for_loop());
        assert!(!RoverError::Validation("x".into()).is_fatal_for_loop());
        assert!(!RoverError::Serialization("x".into()).is_fatal_for_loop());
    }
}
