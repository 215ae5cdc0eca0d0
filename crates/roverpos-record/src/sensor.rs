//! Converters for raw sensor samples.
//!
//! | Type | Row |
//! |---|---|
//! | `NineDoFData` | `ax, ay, az, gx, gy, gz, mx, my, mz, temperature` |
//! | `DwmPosition` | `x, y, z, quality_factor` (integers) |
//! | `DwmLocationResponse` | `<tag DwmPosition>, anchor_count, { address, distance, distance_quality, <anchor DwmPosition> } × anchor_count` |

use roverpos_types::{DwmDistanceAndPosition, DwmLocationResponse, DwmPosition, NineDoFData, RoverError};

use crate::converter::{expect_arity, format_f64, parse_field, CsvConverter, VectorCsvConverter};

#[derive(Debug, Clone, Copy, Default)]
pub struct NineDoFDataCsvConverter;

impl NineDoFDataCsvConverter {
    pub const COLUMNS: usize = 10;
}

impl CsvConverter<NineDoFData> for NineDoFDataCsvConverter {
    fn to_row(&self, value: &NineDoFData) -> Vec<String> {
        let mut row = VectorCsvConverter.to_row(&value.acceleration);
        row.extend(VectorCsvConverter.to_row(&value.angular_velocity));
        row.extend(VectorCsvConverter.to_row(&value.magnetic_field));
        row.push(format_f64(value.temperature));
        row
    }

    fn to_object(&self, row: &[String]) -> Result<NineDoFData, RoverError> {
        expect_arity(row, Self::COLUMNS, "NineDoFData")?;
        Ok(NineDoFData {
            acceleration: VectorCsvConverter.to_object(&row[0..3])?,
            angular_velocity: VectorCsvConverter.to_object(&row[3..6])?,
            magnetic_field: VectorCsvConverter.to_object(&row[6..9])?,
            temperature: parse_field(row, 9)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DwmPositionCsvConverter;

impl DwmPositionCsvConverter {
    pub const COLUMNS: usize = 4;
}

impl CsvConverter<DwmPosition> for DwmPositionCsvConverter {
    fn to_row(&self, value: &DwmPosition) -> Vec<String> {
        vec![
            value.x.to_string(),
            value.y.to_string(),
            value.z.to_string(),
            value.quality_factor.to_string(),
        ]
    }

    fn to_object(&self, row: &[String]) -> Result<DwmPosition, RoverError> {
        expect_arity(row, Self::COLUMNS, "DwmPosition")?;
        Ok(DwmPosition::new(
            parse_field(row, 0)?,
            parse_field(row, 1)?,
            parse_field(row, 2)?,
            parse_field(row, 3)?,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DwmLocationResponseCsvConverter;

const ANCHOR_COLUMNS: usize = 3 + DwmPositionCsvConverter::COLUMNS;

impl CsvConverter<DwmLocationResponse> for DwmLocationResponseCsvConverter {
    fn to_row(&self, value: &DwmLocationResponse) -> Vec<String> {
        let mut row = DwmPositionCsvConverter.to_row(&value.tag_position);
        row.push(value.anchors.len().to_string());
        for anchor in &value.anchors {
            row.push(anchor.address.to_string());
            row.push(anchor.distance.to_string());
            row.push(anchor.distance_quality.to_string());
            row.extend(DwmPositionCsvConverter.to_row(&anchor.position));
        }
        row
    }

    fn to_object(&self, row: &[String]) -> Result<DwmLocationResponse, RoverError> {
        let header = DwmPositionCsvConverter::COLUMNS + 1;
        if row.len() < header {
            return Err(RoverError::Validation(format!(
                "DwmLocationResponse row needs at least {header} columns, got {}",
                row.len()
            )));
        }
        let anchor_count: usize = parse_field(row, DwmPositionCsvConverter::COLUMNS)?;
        expect_arity(
            row,
            header.saturating_add(anchor_count.saturating_mul(ANCHOR_COLUMNS)),
            "DwmLocationResponse",
        )?;

        let tag_position = DwmPositionCsvConverter.to_object(&row[..DwmPositionCsvConverter::COLUMNS])?;
        let anchors = row[header..]
            .chunks_exact(ANCHOR_COLUMNS)
            .map(|chunk| {
                Ok(DwmDistanceAndPosition {
                    address: parse_field(chunk, 0)?,
                    distance: parse_field(chunk, 1)?,
                    distance_quality: parse_field(chunk, 2)?,
                    position: DwmPositionCsvConverter.to_object(&chunk[3..])?,
                })
            })
            .collect::<Result<Vec<_>, RoverError>>()?;

        Ok(DwmLocationResponse {
            tag_position,
            anchors,
        })
    }
}
