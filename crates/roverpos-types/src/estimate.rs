//! Inputs and outputs of the estimation algorithms.

use serde::{Deserialize, Serialize};

use crate::math::{Quaternion, Vector};
use crate::{RoverError, TimestampedValue};

// ────────────────────────────────────────────────────────────────────────────
// Attitude
// ────────────────────────────────────────────────────────────────────────────

/// Health of an attitude solution. The discriminant is the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttitudeStatus {
    /// The algorithm has not seen enough data to produce a solution.
    #[default]
    Uninitialised = 0,
    /// Solution tracking normally.
    Ok = 1,
    /// The vehicle is accelerating hard; the accelerometer's gravity
    /// reference is unreliable and the solution leans on the gyroscope.
    Accelerating = 2,
}

impl From<AttitudeStatus> for u8 {
    fn from(status: AttitudeStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for AttitudeStatus {
    type Error = RoverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AttitudeStatus::Uninitialised),
            1 => Ok(AttitudeStatus::Ok),
            2 => Ok(AttitudeStatus::Accelerating),
            other => Err(RoverError::Validation(format!(
                "unknown attitude status {other}"
            ))),
        }
    }
}

/// Output of an attitude algorithm for a single 9-axis sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttitudeOutput {
    pub attitude: Quaternion,
    /// Body-frame acceleration as measured alongside the attitude.
    pub acceleration: Vector,
    pub status: AttitudeStatus,
}

// ────────────────────────────────────────────────────────────────────────────
// Position
// ────────────────────────────────────────────────────────────────────────────

/// Full kinematic state snapshot in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub attitude: Quaternion,
    pub acceleration: Vector,
    pub velocity: Vector,
    pub position: Vector,
}

/// Composite input to a position algorithm.
///
/// Each field is optional but at least one is always present; the
/// constructors refuse to build an empty instance, and so does
/// deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPositionInput")]
pub struct PositionInput {
    attitude: Option<TimestampedValue<AttitudeOutput>>,
    velocity: Option<TimestampedValue<Vector>>,
    position: Option<TimestampedValue<Vector>>,
}

/// Wire shape of [`PositionInput`], validated through [`PositionInput::new`].
#[derive(Deserialize)]
struct RawPositionInput {
    #[serde(default)]
    attitude: Option<TimestampedValue<AttitudeOutput>>,
    #[serde(default)]
    velocity: Option<TimestampedValue<Vector>>,
    #[serde(default)]
    position: Option<TimestampedValue<Vector>>,
}

impl TryFrom<RawPositionInput> for PositionInput {
    type Error = RoverError;

    fn try_from(raw: RawPositionInput) -> Result<Self, Self::Error> {
        Self::new(raw.attitude, raw.velocity, raw.position)
    }
}

impl PositionInput {
    /// # Errors
    ///
    /// Returns [`RoverError::ContractViolation`] when all three fields are
    /// `None`.
    pub fn new(
        attitude: Option<TimestampedValue<AttitudeOutput>>,
        velocity: Option<TimestampedValue<Vector>>,
        position: Option<TimestampedValue<Vector>>,
    ) -> Result<Self, RoverError> {
        if attitude.is_none() && velocity.is_none() && position.is_none() {
            return Err(RoverError::ContractViolation(
                "PositionInput requires at least one of attitude, velocity or position".into(),
            ));
        }
        Ok(Self {
            attitude,
            velocity,
            position,
        })
    }

    pub fn from_attitude(attitude: TimestampedValue<AttitudeOutput>) -> Self {
        Self {
            attitude: Some(attitude),
            velocity: None,
            position: None,
        }
    }

    pub fn from_velocity(velocity: TimestampedValue<Vector>) -> Self {
        Self {
            attitude: None,
            velocity: Some(velocity),
            position: None,
        }
    }

    pub fn from_position(position: TimestampedValue<Vector>) -> Self {
        Self {
            attitude: None,
            velocity: None,
            position: Some(position),
        }
    }

    pub fn attitude(&self) -> Option<&TimestampedValue<AttitudeOutput>> {
        self.attitude.as_ref()
    }

    pub fn velocity(&self) -> Option<&TimestampedValue<Vector>> {
        self.velocity.as_ref()
    }

    pub fn position(&self) -> Option<&TimestampedValue<Vector>> {
        self.position.as_ref()
    }

    /// The newest timestamp among the present fields.
    pub fn timestamp(&self) -> f64 {
        [
            self.attitude.map(|a| a.timestamp()),
            self.velocity.map(|v| v.timestamp()),
            self.position.map(|p| p.timestamp()),
        ]
        .into_iter()
        .flatten()
        .fold(f64::NEG_INFINITY, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attitude_at(t: f64) -> TimestampedValue<AttitudeOutput> {
        TimestampedValue::new(AttitudeOutput::default(), t)
    }

    #[test]
    fn empty_position_input_is_rejected() {
        let result = PositionInput::new(None, None, None);
        assert!(matches!(result, Err(RoverError::ContractViolation(_))));
    }

    #[test]
    fn empty_position_input_is_not_deserialized() {
        let all_null = r#"{"attitude":null,"velocity":null,"position":null}"#;
        assert!(serde_json::from_str::<PositionInput>(all_null).is_err());
        assert!(serde_json::from_str::<PositionInput>("{}").is_err());
    }

    #[test]
    fn position_input_json_roundtrip() {
        let input = PositionInput::from_position(TimestampedValue::new(Vector::new(1.0, 2.0, 0.0), 4.0));
        let json = serde_json::to_string(&input).unwrap();
        assert_eq!(serde_json::from_str::<PositionInput>(&json).unwrap(), input);
    }

    #[test]
    fn any_single_field_is_accepted() {
        assert!(PositionInput::new(Some(attitude_at(1.0)), None, None).is_ok());
        assert!(
            PositionInput::new(None, Some(TimestampedValue::new(Vector::zero(), 1.0)), None)
                .is_ok()
        );
        assert!(
            PositionInput::new(None, None, Some(TimestampedValue::new(Vector::zero(), 1.0)))
                .is_ok()
        );
    }

    #[test]
    fn timestamp_is_newest_present_field() {
        let input = PositionInput::new(
            Some(attitude_at(3.0)),
            None,
            Some(TimestampedValue::new(Vector::zero(), 7.5)),
        )
        .unwrap();
        assert!((input.timestamp() - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn status_wire_values() {
        assert_eq!(u8::from(AttitudeStatus::Ok), 1);
        assert_eq!(AttitudeStatus::try_from(2).unwrap(), AttitudeStatus::Accelerating);
        assert!(matches!(
            AttitudeStatus::try_from(9),
            Err(RoverError::Validation(_))
        ));
    }
}
