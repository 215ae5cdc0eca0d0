//! Terminal-capable filters: bus publishers and the CSV recorder.
//!
//! Every sink passes its input through unchanged, so a sink can sit in the
//! middle of a chain. A sink that hits an I/O failure closes itself and
//! reports the error; its siblings are unaffected.

use std::path::Path;
use std::sync::Arc;

use roverpos_middleware::{Publisher, publish_json};
use roverpos_record::{CsvConverter, CsvRecordWriter, TimestampedCsvConverter};
use roverpos_types::{Payload, RoverError, TimestampedValue};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::filter::{Chain, DataFilter, FilterCore};

/// Close `core` on an I/O failure and log it; other errors pass untouched.
fn fail<O>(core: &mut FilterCore<O>, err: RoverError) -> RoverError {
    if matches!(err, RoverError::Io { .. }) {
        error!(filter = core.name(), error = %err, "sink failed, closing");
        core.close();
    }
    err
}

// ────────────────────────────────────────────────────────────────────────────
// PublishFilter
// ────────────────────────────────────────────────────────────────────────────

/// Publishes each value, with its timestamp, as JSON on one topic.
pub struct PublishFilter<T> {
    core: FilterCore<T>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl<T> PublishFilter<T> {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            core: FilterCore::new(format!("publish:{topic}")),
            publisher,
            topic,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<T: Serialize + Send> DataFilter<T> for PublishFilter<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        if let Err(e) = publish_json(self.publisher.as_ref(), &self.topic, data) {
            return Err(fail(&mut self.core, e));
        }
        self.core.send(data)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T> Chain<T> for PublishFilter<T> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PublishBytesFilter
// ────────────────────────────────────────────────────────────────────────────

/// Publishes each value's raw bytes on one topic. The timestamp is not sent;
/// frames that need it carry their own.
pub struct PublishBytesFilter<T> {
    core: FilterCore<T>,
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl<T> PublishBytesFilter<T> {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            core: FilterCore::new(format!("publish_bytes:{topic}")),
            publisher,
            topic,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }
}

impl<T: AsRef<[u8]> + Send> DataFilter<T> for PublishBytesFilter<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let payload = Payload::Bytes(data.value().as_ref().to_vec());
        if let Err(e) = self.publisher.publish(&self.topic, payload) {
            return Err(fail(&mut self.core, e));
        }
        self.core.send(data)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T> Chain<T> for PublishBytesFilter<T> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ToCsvFilter
// ────────────────────────────────────────────────────────────────────────────

/// Appends each value and its timestamp as a CSV row.
///
/// With a duration set, recording stops once that many seconds of data time
/// have passed since the first row: the file is flushed and released, and
/// values keep passing through.
pub struct ToCsvFilter<T, C> {
    core: FilterCore<T>,
    writer: Option<CsvRecordWriter<TimestampedValue<T>, TimestampedCsvConverter<C>>>,
    duration: Option<f64>,
    started_at: Option<f64>,
    rows: u64,
}

impl<T, C: CsvConverter<T>> ToCsvFilter<T, C> {
    /// Create (or truncate) the recording at `path`.
    pub fn create(path: impl AsRef<Path>, converter: C) -> Result<Self, RoverError> {
        let writer = CsvRecordWriter::create(path.as_ref(), TimestampedCsvConverter::new(converter))?;
        info!(path = %path.as_ref().display(), "recording started");
        Ok(Self::from_record_writer(writer))
    }

    /// Record into an arbitrary sink; `label` names it in logs and errors.
    pub fn from_writer(
        sink: Box<dyn std::io::Write + Send>,
        converter: C,
        label: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::from_record_writer(CsvRecordWriter::from_writer(
            sink,
            TimestampedCsvConverter::new(converter),
            label,
        ))
    }

    fn from_record_writer(
        writer: CsvRecordWriter<TimestampedValue<T>, TimestampedCsvConverter<C>>,
    ) -> Self {
        let name = format!("csv:{}", writer.path().display());
        Self {
            core: FilterCore::new(name),
            writer: Some(writer),
            duration: None,
            started_at: None,
            rows: 0,
        }
    }

    /// Stop writing after `seconds` of data time. Non-positive values mean
    /// no limit.
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = (seconds.is_finite() && seconds > 0.0).then_some(seconds);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }

    /// Whether rows are still being written.
    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    fn finish(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(filter = self.core.name(), error = %e, "final flush failed");
            }
            info!(filter = self.core.name(), rows = self.rows, "recording finished");
        }
    }
}

impl<T: Send, C: CsvConverter<T>> DataFilter<T> for ToCsvFilter<T, C> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let started_at = *self.started_at.get_or_insert(data.timestamp());
        if let Some(duration) = self.duration
            && data.timestamp() - started_at > duration
        {
            self.finish();
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write(data) {
                self.writer = None;
                return Err(fail(&mut self.core, e));
            }
            self.rows += 1;
        }
        self.core.send(data)
    }

    fn close(&mut self) {
        if self.core.is_closed() {
            return;
        }
        self.finish();
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T, C> Chain<T> for ToCsvFilter<T, C> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        self.core.downstream.add(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureFilter;
    use roverpos_middleware::EventBus;
    use roverpos_record::{CsvRecordReader, VectorCsvConverter};
    use roverpos_types::Vector;
    use std::io;

    struct DeadPublisher;

    impl Publisher for DeadPublisher {
        fn publish(&self, topic: &str, _payload: Payload) -> Result<(), RoverError> {
            Err(RoverError::io(format!("bus:{topic}"), "transport closed"))
        }
    }

    struct BrokenPipe;

    impl io::Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn vector_at(t: f64) -> TimestampedValue<Vector> {
        TimestampedValue::new(Vector::new(1.2, 3.4, 5.6), t)
    }

    #[test]
    fn publish_sends_json_and_passes_through() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("data/absolute/raw");
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter =
            PublishFilter::<Vector>::new(Arc::new(bus.clone()), "data/absolute/raw").then(capture);

        filter.receive(&vector_at(100.0)).unwrap();

        let message = sub.try_recv().unwrap();
        let decoded: TimestampedValue<Vector> =
            serde_json::from_str(message.payload.as_text().unwrap()).unwrap();
        assert_eq!(decoded, vector_at(100.0));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn publish_bytes_sends_raw_frame() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_topic("heading");
        let mut filter = PublishBytesFilter::<[u8; 3]>::new(Arc::new(bus.clone()), "heading");

        filter.receive(&TimestampedValue::new([1, 2, 3], 0.0)).unwrap();

        assert_eq!(sub.try_recv().unwrap().payload.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn publish_failure_closes_the_publisher() {
        let mut filter = PublishFilter::<Vector>::new(Arc::new(DeadPublisher), "data/position");
        let result = filter.receive(&vector_at(0.0));
        assert!(matches!(result, Err(RoverError::Io { .. })));
        assert!(filter.is_closed());
    }

    #[test]
    fn csv_row_carries_timestamp_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absolute.csv");
        let mut filter = ToCsvFilter::<Vector, _>::create(&path, VectorCsvConverter).unwrap();

        filter.receive(&vector_at(100.0)).unwrap();
        filter.close();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "1.2,3.4,5.6,100.0");
    }

    #[test]
    fn csv_recording_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absolute.csv");
        let mut filter = ToCsvFilter::<Vector, _>::create(&path, VectorCsvConverter).unwrap();
        for i in 0..5 {
            filter.receive(&vector_at(f64::from(i))).unwrap();
        }
        filter.close();

        let reader = CsvRecordReader::open(&path, TimestampedCsvConverter::new(VectorCsvConverter)).unwrap();
        let rows: Vec<TimestampedValue<Vector>> = reader.map(Result::unwrap).collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], vector_at(4.0));
    }

    #[test]
    fn duration_stops_writing_but_keeps_passing_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter = ToCsvFilter::<Vector, _>::create(&path, VectorCsvConverter)
            .unwrap()
            .with_duration(1.0)
            .then(capture);

        for i in 0..30 {
            filter.receive(&vector_at(f64::from(i) * 0.1)).unwrap();
        }

        assert!(!filter.is_recording());
        assert!(!filter.is_closed());
        assert_eq!(received.lock().unwrap().len(), 30);
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        // 0.0 through 1.0 inclusive.
        assert_eq!(lines, 11);
    }

    #[test]
    fn write_failure_closes_only_the_recorder() {
        let mut filter = ToCsvFilter::<Vector, _>::from_writer(Box::new(BrokenPipe), VectorCsvConverter, "pipe");
        let result = filter.receive(&vector_at(0.0));
        assert!(matches!(result, Err(RoverError::Io { .. })));
        assert!(filter.is_closed());
        assert!(matches!(filter.receive(&vector_at(1.0)), Err(RoverError::ContractViolation(_))));
    }

    #[test]
    fn recorder_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut filter = ToCsvFilter::<Vector, _>::create(dir.path().join("x.csv"), VectorCsvConverter).unwrap();
        filter.close();
        filter.close();
        assert!(filter.is_closed());
    }
}
