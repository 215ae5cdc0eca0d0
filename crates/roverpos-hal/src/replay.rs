//! Replay a CSV recording as if it were a live sensor.
//!
//! Rows are `TimestampedValue` rows as written by the recording sink; the
//! recorded timestamps are emitted unchanged. In [`ReplayPace::RealTime`]
//! the gaps between rows are reproduced against the wall clock, in
//! [`ReplayPace::Fast`] rows are released as fast as the loop consumes
//! them.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use roverpos_record::{CsvConverter, CsvRecordReader, TimestampedCsvConverter};
use roverpos_types::{RoverError, TimestampedValue};
use tracing::{debug, info, warn};

use crate::provider::DataProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPace {
    #[default]
    RealTime,
    Fast,
}

/// Maps recording time onto the wall clock, anchored at the first row.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    wall: Instant,
    recorded: f64,
}

impl Anchor {
    /// `None` when the offset does not fit the wall clock.
    fn due(&self, timestamp: f64) -> Option<Instant> {
        let offset = Duration::try_from_secs_f64((timestamp - self.recorded).max(0.0)).ok()?;
        self.wall.checked_add(offset)
    }
}

pub struct ReplayProvider<T, C> {
    id: String,
    reader: CsvRecordReader<TimestampedValue<T>, TimestampedCsvConverter<C>>,
    pace: ReplayPace,
    pending: Option<Result<TimestampedValue<T>, RoverError>>,
    anchor: Option<Anchor>,
    exhausted: bool,
    closed: bool,
    replayed: u64,
}

impl<T, C: CsvConverter<T>> ReplayProvider<T, C> {
    pub fn open(
        id: impl Into<String>,
        path: impl AsRef<Path>,
        converter: C,
        pace: ReplayPace,
    ) -> Result<Self, RoverError> {
        let id = id.into();
        let reader = CsvRecordReader::open(path.as_ref(), TimestampedCsvConverter::new(converter))?;
        info!(provider = %id, path = %path.as_ref().display(), ?pace, "replay opened");
        Ok(Self {
            id,
            reader,
            pace,
            pending: None,
            anchor: None,
            exhausted: false,
            closed: false,
            replayed: 0,
        })
    }

    /// Pull the next row into `pending` if it is empty. `false` at end of
    /// file.
    fn fill(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        if self.exhausted || self.closed {
            return false;
        }
        match self.reader.next() {
            Some(row) => {
                if let Ok(value) = &row
                    && self.anchor.is_none()
                {
                    self.anchor = Some(Anchor {
                        wall: Instant::now(),
                        recorded: value.timestamp(),
                    });
                }
                self.pending = Some(row);
                true
            }
            None => {
                self.exhausted = true;
                debug!(provider = %self.id, rows = self.replayed, "replay reached end of file");
                false
            }
        }
    }

    /// When the pending row may be released. `None` means now.
    ///
    /// A row whose timestamp cannot be placed on the wall clock is turned
    /// into a validation error and released at once.
    fn pending_due(&mut self) -> Option<Instant> {
        if self.pace == ReplayPace::Fast {
            return None;
        }
        let (Some(Ok(value)), Some(anchor)) = (&self.pending, &self.anchor) else {
            return None;
        };
        let timestamp = value.timestamp();
        let due = anchor.due(timestamp);
        if due.is_none() {
            warn!(provider = %self.id, timestamp, "row timestamp out of range for real-time replay");
            self.pending = Some(Err(RoverError::Validation(format!(
                "timestamp {timestamp} out of range for real-time replay"
            ))));
        }
        due
    }
}

impl<T: Send, C: CsvConverter<T>> DataProvider<T> for ReplayProvider<T, C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        if !self.fill() {
            return false;
        }
        let Some(due) = self.pending_due() else {
            return true;
        };
        let now = Instant::now();
        if due <= now {
            return true;
        }
        if due - now > timeout {
            thread::sleep(timeout);
            return false;
        }
        thread::sleep(due - now);
        true
    }

    fn get(&mut self) -> Result<TimestampedValue<T>, RoverError> {
        if self.closed {
            return Err(RoverError::io(&self.id, "provider closed"));
        }
        if !self.fill() {
            return Err(RoverError::io(&self.id, "end of recording"));
        }
        if let Some(due) = self.pending_due() {
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        match self.pending.take() {
            Some(row) => {
                if row.is_ok() {
                    self.replayed += 1;
                }
                row
            }
            None => Err(RoverError::io(&self.id, "end of recording")),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending = None;
            info!(provider = %self.id, rows = self.replayed, "replay closed");
        }
    }

    fn is_exhausted(&self) -> bool {
        self.closed || (self.exhausted && self.pending.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roverpos_record::{CsvRecordWriter, VectorCsvConverter};
    use roverpos_types::Vector;

    fn write_recording(path: &Path, rows: &[(f64, f64)]) {
        let converter = TimestampedCsvConverter::new(VectorCsvConverter);
        let mut writer = CsvRecordWriter::create(path, converter).unwrap();
        for &(x, t) in rows {
            writer.write(&TimestampedValue::new(Vector::new(x, 0.0, 0.0), t)).unwrap();
        }
    }

    #[test]
    fn fast_replay_yields_every_row_with_recorded_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uwb.csv");
        write_recording(&path, &[(1.0, 10.0), (2.0, 10.5), (3.0, 11.0)]);

        let mut provider =
            ReplayProvider::open("uwb", &path, VectorCsvConverter, ReplayPace::Fast).unwrap();

        let mut seen = Vec::new();
        while provider.poll(Duration::from_millis(1)) {
            seen.push(provider.get().unwrap());
        }
        assert!(provider.is_exhausted());
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].value().x, 2.0);
        assert!((seen[2].timestamp() - 11.0).abs() < 1e-12);
    }

    #[test]
    fn realtime_replay_holds_back_future_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imu.csv");
        write_recording(&path, &[(1.0, 0.0), (2.0, 5.0)]);

        let mut provider =
            ReplayProvider::open("imu", &path, VectorCsvConverter, ReplayPace::RealTime).unwrap();

        assert!(provider.poll(Duration::from_millis(1)));
        provider.get().unwrap();
        // Second row is five seconds out.
        assert!(!provider.poll(Duration::from_millis(5)));
        assert!(!provider.is_exhausted());
    }

    #[test]
    fn malformed_row_surfaces_once_then_replay_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "1.0,2.0,3.0,0.0\nbroken\n4.0,5.0,6.0,0.1\n").unwrap();

        let mut provider =
            ReplayProvider::open("bad", &path, VectorCsvConverter, ReplayPace::Fast).unwrap();

        assert!(provider.get().is_ok());
        assert!(matches!(provider.get(), Err(RoverError::Validation(_))));
        assert_eq!(provider.get().unwrap().value().z, 6.0);
        assert!(!provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Io { .. })));
    }

    #[test]
    fn out_of_range_timestamp_is_dropped_in_realtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("far.csv");
        std::fs::write(&path, "1.0,2.0,3.0,0.0\n4.0,5.0,6.0,1e300\n7.0,8.0,9.0,0.01\n").unwrap();

        let mut provider =
            ReplayProvider::open("far", &path, VectorCsvConverter, ReplayPace::RealTime).unwrap();

        assert!(provider.poll(Duration::from_millis(1)));
        provider.get().unwrap();
        assert!(provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Validation(_))));
        assert!(provider.poll(Duration::from_secs(1)));
        assert_eq!(provider.get().unwrap().value().z, 9.0);
    }

    #[test]
    fn non_finite_timestamp_is_dropped_in_realtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inf.csv");
        std::fs::write(&path, "1.0,2.0,3.0,0.0\n4.0,5.0,6.0,inf\n7.0,8.0,9.0,NaN\n").unwrap();

        let mut provider =
            ReplayProvider::open("inf", &path, VectorCsvConverter, ReplayPace::RealTime).unwrap();

        provider.get().unwrap();
        assert!(provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Validation(_))));
        assert!(provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Validation(_))));
        assert!(!provider.poll(Duration::from_millis(1)));
        assert!(provider.is_exhausted());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.csv");
        write_recording(&path, &[(1.0, 0.0)]);

        let mut provider =
            ReplayProvider::open("v", &path, VectorCsvConverter, ReplayPace::Fast).unwrap();
        provider.close();
        provider.close();
        assert!(provider.is_exhausted());
        assert!(!provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Io { .. })));
    }

    #[test]
    fn missing_recording_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReplayProvider::open(
            "missing",
            dir.path().join("nope.csv"),
            VectorCsvConverter,
            ReplayPace::Fast,
        );
        assert!(matches!(result, Err(RoverError::Io { .. })));
    }
}
