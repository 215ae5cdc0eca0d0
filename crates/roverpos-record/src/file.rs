//! Typed CSV files.
//!
//! Files carry no header row. Rows may differ in length (a Decawave
//! response row grows with its anchor count), so both ends run the `csv`
//! crate in flexible mode.

use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use roverpos_types::RoverError;
use tracing::debug;

use crate::converter::CsvConverter;

fn csv_error(path: &Path, err: impl std::fmt::Display) -> RoverError {
    RoverError::io(format!("csv:{}", path.display()), err)
}

// ────────────────────────────────────────────────────────────────────────────
// Writer
// ────────────────────────────────────────────────────────────────────────────

/// Appends typed values as rows. Every row is flushed as it is written so a
/// recording survives an unclean shutdown.
pub struct CsvRecordWriter<T, C> {
    writer: csv::Writer<Box<dyn Write + Send>>,
    converter: C,
    path: PathBuf,
    _marker: PhantomData<fn(&T)>,
}

impl<T, C: CsvConverter<T>> CsvRecordWriter<T, C> {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>, converter: C) -> Result<Self, RoverError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| csv_error(&path, e))?;
        debug!(path = %path.display(), "csv recording opened");
        Ok(Self::from_writer(Box::new(file), converter, path))
    }

    /// Wrap an arbitrary sink; `label` only appears in error messages.
    pub fn from_writer(
        sink: Box<dyn Write + Send>,
        converter: C,
        label: impl Into<PathBuf>,
    ) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(sink);
        Self {
            writer,
            converter,
            path: label.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, value: &T) -> Result<(), RoverError> {
        let row = self.converter.to_row(value);
        self.writer
            .write_record(&row)
            .map_err(|e| csv_error(&self.path, e))?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), RoverError> {
        self.writer.flush().map_err(|e| csv_error(&self.path, e))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reader
// ────────────────────────────────────────────────────────────────────────────

/// Iterates typed values back out of a recording, one row at a time.
pub struct CsvRecordReader<T, C> {
    records: csv::StringRecordsIntoIter<File>,
    converter: C,
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C: CsvConverter<T>> CsvRecordReader<T, C> {
    pub fn open(path: impl AsRef<Path>, converter: C) -> Result<Self, RoverError> {
        let path = path.as_ref().to_path_buf();
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .map_err(|e| csv_error(&path, e))?;
        debug!(path = %path.display(), "csv replay opened");
        Ok(Self {
            records: reader.into_records(),
            converter,
            path,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T, C: CsvConverter<T>> Iterator for CsvRecordReader<T, C> {
    /// A malformed row yields `Err(Validation)` and the iterator carries on
    /// with the next row; an unreadable file yields `Err(Io)`.
    type Item = Result<T, RoverError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(csv_error(&self.path, e))),
        };
        let row: Vec<String> = record.iter().map(str::to_owned).collect();
        Some(self.converter.to_object(&row))
    }
}
