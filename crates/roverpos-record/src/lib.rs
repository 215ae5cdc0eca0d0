//! `roverpos-record` – CSV recording and replay.
//!
//! Recording a run to disk and replaying it later is what makes the
//! estimation algorithms testable offline, so every type that flows through
//! the pipeline has a bidirectional row mapping here.
//!
//! # Modules
//!
//! - [`converter`] – the [`CsvConverter`] trait plus converters for the math
//!   primitives and the [`TimestampedCsvConverter`] wrapper.
//! - [`sensor`] – converters for raw IMU samples and Decawave responses.
//! - [`estimate`] – converters for attitude and position outputs.
//! - [`file`] – [`CsvRecordWriter`] / [`CsvRecordReader`]: typed row I/O on
//!   top of the `csv` crate.

pub mod converter;
pub mod estimate;
pub mod file;
pub mod sensor;

pub use converter::{
    CsvConverter, QuaternionCsvConverter, TimestampedCsvConverter, VectorCsvConverter,
};
pub use estimate::{AttitudeOutputCsvConverter, PositionCsvConverter};
pub use file::{CsvRecordReader, CsvRecordWriter};
pub use sensor::{DwmLocationResponseCsvConverter, DwmPositionCsvConverter, NineDoFDataCsvConverter};
