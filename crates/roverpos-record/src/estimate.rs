//! Converters for estimator outputs.
//!
//! | Type | Row |
//! |---|---|
//! | `AttitudeOutput` | `w, x, y, z, ax, ay, az, status` |
//! | `Position` | `w, x, y, z, ax, ay, az, vx, vy, vz, px, py, pz` |

use roverpos_types::{AttitudeOutput, AttitudeStatus, Position, RoverError};

use crate::converter::{
    expect_arity, parse_field, CsvConverter, QuaternionCsvConverter, VectorCsvConverter,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct AttitudeOutputCsvConverter;

impl AttitudeOutputCsvConverter {
    pub const COLUMNS: usize = 8;
}

impl CsvConverter<AttitudeOutput> for AttitudeOutputCsvConverter {
    fn to_row(&self, value: &AttitudeOutput) -> Vec<String> {
        let mut row = QuaternionCsvConverter.to_row(&value.attitude);
        row.extend(VectorCsvConverter.to_row(&value.acceleration));
        row.push(u8::from(value.status).to_string());
        row
    }

    fn to_object(&self, row: &[String]) -> Result<AttitudeOutput, RoverError> {
        expect_arity(row, Self::COLUMNS, "AttitudeOutput")?;
        let status: u8 = parse_field(row, 7)?;
        Ok(AttitudeOutput {
            attitude: QuaternionCsvConverter.to_object(&row[0..4])?,
            acceleration: VectorCsvConverter.to_object(&row[4..7])?,
            status: AttitudeStatus::try_from(status)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PositionCsvConverter;

impl PositionCsvConverter {
    pub const COLUMNS: usize = 13;
}

impl CsvConverter<Position> for PositionCsvConverter {
    fn to_row(&self, value: &Position) -> Vec<String> {
        let mut row = QuaternionCsvConverter.to_row(&value.attitude);
        row.extend(VectorCsvConverter.to_row(&value.acceleration));
        row.extend(VectorCsvConverter.to_row(&value.velocity));
        row.extend(VectorCsvConverter.to_row(&value.position));
        row
    }

    fn to_object(&self, row: &[String]) -> Result<Position, RoverError> {
        expect_arity(row, Self::COLUMNS, "Position")?;
        Ok(Position {
            attitude: QuaternionCsvConverter.to_object(&row[0..4])?,
            acceleration: VectorCsvConverter.to_object(&row[4..7])?,
            velocity: VectorCsvConverter.to_object(&row[7..10])?,
            position: VectorCsvConverter.to_object(&row[10..13])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::TimestampedCsvConverter;
    use roverpos_types::{Quaternion, TimestampedValue, Vector};

    #[test]
    fn attitude_output_row_ends_with_integer_status() {
        let output = AttitudeOutput {
            attitude: Quaternion::identity(),
            acceleration: Vector::new(0.0, 0.0, 1.0),
            status: AttitudeStatus::Accelerating,
        };
        let row = AttitudeOutputCsvConverter.to_row(&output);
        assert_eq!(row.len(), AttitudeOutputCsvConverter::COLUMNS);
        assert_eq!(row[7], "2");
        assert_eq!(AttitudeOutputCsvConverter.to_object(&row).unwrap(), output);
    }

    #[test]
    fn attitude_output_unknown_status_is_rejected() {
        let mut row = AttitudeOutputCsvConverter.to_row(&AttitudeOutput::default());
        row[7] = "7".into();
        assert!(matches!(
            AttitudeOutputCsvConverter.to_object(&row),
            Err(RoverError::Validation(_))
        ));
    }

    #[test]
    fn timestamped_position_roundtrip() {
        let position = Position {
            attitude: Quaternion::new(0.5, 0.5, 0.5, 0.5),
            acceleration: Vector::new(0.1, 0.0, -0.1),
            velocity: Vector::new(1.5, -0.25, 0.0),
            position: Vector::new(12.0, 8.75, 0.3),
        };
        let converter = TimestampedCsvConverter::new(PositionCsvConverter);
        let value = TimestampedValue::new(position, 42.125);
        let row = converter.to_row(&value);
        assert_eq!(row.len(), PositionCsvConverter::COLUMNS + 1);
        assert_eq!(converter.to_object(&row).unwrap(), value);
    }
}
