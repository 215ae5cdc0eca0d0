//! The [`CsvConverter`] contract and converters for the math primitives.
//!
//! A converter maps a typed value to a flat row of strings and back. The
//! round-trip law `to_object(&to_row(x)) == x` holds for every converter in
//! this crate; floats are written in Rust's shortest round-trip form so the
//! law holds bit-for-bit.
//!
//! | Type | Row |
//! |---|---|
//! | `Vector` | `x, y, z` |
//! | `Quaternion` | `w, x, y, z` |
//! | `TimestampedValue<T>` | `<T's columns>, timestamp` |

use std::str::FromStr;

use roverpos_types::{Quaternion, RoverError, TimestampedValue, Vector};

/// Bidirectional mapping between `T` and a CSV row.
pub trait CsvConverter<T>: Send {
    fn to_row(&self, value: &T) -> Vec<String>;

    /// # Errors
    ///
    /// Returns [`RoverError::Validation`] for a row of the wrong arity or a
    /// field that does not parse.
    fn to_object(&self, row: &[String]) -> Result<T, RoverError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Field helpers
// ────────────────────────────────────────────────────────────────────────────

pub(crate) fn format_f64(value: f64) -> String {
    // Debug keeps a trailing ".0" on integral values and is round-trip exact.
    format!("{value:?}")
}

pub(crate) fn parse_field<F: FromStr>(row: &[String], index: usize) -> Result<F, RoverError> {
    let raw = row.get(index).ok_or_else(|| {
        RoverError::Validation(format!("missing column {index} in row of {}", row.len()))
    })?;
    raw.trim().parse::<F>().map_err(|_| {
        RoverError::Validation(format!("column {index}: cannot parse {raw:?}"))
    })
}

pub(crate) fn expect_arity(row: &[String], expected: usize, what: &str) -> Result<(), RoverError> {
    if row.len() != expected {
        return Err(RoverError::Validation(format!(
            "{what} row must have {expected} columns, got {}",
            row.len()
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Vector / Quaternion
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct VectorCsvConverter;

impl VectorCsvConverter {
    pub const COLUMNS: usize = 3;
}

impl CsvConverter<Vector> for VectorCsvConverter {
    fn to_row(&self, value: &Vector) -> Vec<String> {
        vec![format_f64(value.x), format_f64(value.y), format_f64(value.z)]
    }

    fn to_object(&self, row: &[String]) -> Result<Vector, RoverError> {
        expect_arity(row, Self::COLUMNS, "Vector")?;
        Ok(Vector::new(
            parse_field(row, 0)?,
            parse_field(row, 1)?,
            parse_field(row, 2)?,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuaternionCsvConverter;

impl QuaternionCsvConverter {
    pub const COLUMNS: usize = 4;
}

impl CsvConverter<Quaternion> for QuaternionCsvConverter {
    fn to_row(&self, value: &Quaternion) -> Vec<String> {
        vec![
            format_f64(value.w),
            format_f64(value.x),
            format_f64(value.y),
            format_f64(value.z),
        ]
    }

    fn to_object(&self, row: &[String]) -> Result<Quaternion, RoverError> {
        expect_arity(row, Self::COLUMNS, "Quaternion")?;
        Ok(Quaternion::new(
            parse_field(row, 0)?,
            parse_field(row, 1)?,
            parse_field(row, 2)?,
            parse_field(row, 3)?,
        ))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TimestampedValue
// ────────────────────────────────────────────────────────────────────────────

/// Wraps the converter for `T` and appends the timestamp as the last column.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampedCsvConverter<C> {
    inner: C,
}

impl<C> TimestampedCsvConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<T, C: CsvConverter<T>> CsvConverter<TimestampedValue<T>> for TimestampedCsvConverter<C> {
    fn to_row(&self, value: &TimestampedValue<T>) -> Vec<String> {
        let mut row = self.inner.to_row(value.value());
        row.push(format_f64(value.timestamp()));
        row
    }

    fn to_object(&self, row: &[String]) -> Result<TimestampedValue<T>, RoverError> {
        let Some((last, fields)) = row.split_last() else {
            return Err(RoverError::Validation(
                "timestamped row must have at least one column".into(),
            ));
        };
        let timestamp: f64 = last.trim().parse().map_err(|_| {
            RoverError::Validation(format!("cannot parse timestamp {last:?}"))
        })?;
        if !timestamp.is_finite() {
            return Err(RoverError::Validation(format!("timestamp must be finite, got {last:?}")));
        }
        let value = self.inner.to_object(fields)?;
        Ok(TimestampedValue::new(value, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn vector_roundtrip() {
        let v = Vector::new(-0.1, 1e-9, 12345.678);
        let back = VectorCsvConverter.to_object(&VectorCsvConverter.to_row(&v)).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn quaternion_roundtrip() {
        let q = Quaternion::new(0.7071067811865476, 0.0, -0.7071067811865476, 1.0 / 3.0);
        let converter = QuaternionCsvConverter;
        let back = converter.to_object(&converter.to_row(&q)).unwrap();
        assert_eq!(q, back);
    }

    #[test]
    fn timestamped_vector_row_layout() {
        let converter = TimestampedCsvConverter::new(VectorCsvConverter);
        let value = TimestampedValue::new(Vector::new(1.2, 3.4, 5.6), 100.0);

        let r = converter.to_row(&value);
        assert_eq!(r, row(&["1.2", "3.4", "5.6", "100.0"]));

        let back = converter.to_object(&r).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn timestamped_quaternion_roundtrip() {
        let converter = TimestampedCsvConverter::new(QuaternionCsvConverter);
        let value = TimestampedValue::new(Quaternion::identity(), 0.000_001);
        let back = converter.to_object(&converter.to_row(&value)).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn wrong_arity_is_a_validation_error() {
        let result = VectorCsvConverter.to_object(&row(&["1", "2"]));
        assert!(matches!(result, Err(RoverError::Validation(_))));

        let result = QuaternionCsvConverter.to_object(&row(&["1", "2", "3"]));
        assert!(matches!(result, Err(RoverError::Validation(_))));
    }

    #[test]
    fn timestamped_converter_rejects_empty_and_short_rows() {
        let converter = TimestampedCsvConverter::new(VectorCsvConverter);
        assert!(matches!(
            converter.to_object(&[]),
            Err(RoverError::Validation(_))
        ));
        // Timestamp popped, leaving only two vector columns.
        assert!(matches!(
            converter.to_object(&row(&["1", "2", "3"])),
            Err(RoverError::Validation(_))
        ));
    }

    #[test]
    fn non_finite_timestamp_is_a_validation_error() {
        let converter = TimestampedCsvConverter::new(VectorCsvConverter);
        for stamp in ["inf", "-inf", "NaN"] {
            assert!(matches!(
                converter.to_object(&row(&["1", "2", "3", stamp])),
                Err(RoverError::Validation(_))
            ));
        }
    }

    #[test]
    fn unparsable_field_is_a_validation_error() {
        let result = VectorCsvConverter.to_object(&row(&["1", "two", "3"]));
        assert!(matches!(result, Err(RoverError::Validation(_))));
    }

    #[test]
    fn fields_tolerate_surrounding_whitespace() {
        let v = VectorCsvConverter.to_object(&row(&[" 1.0", "2.0 ", " 3"])).unwrap();
        assert_eq!(v, Vector::new(1.0, 2.0, 3.0));
    }
}
