//! Runtime branch toggles.
//!
//! A [`FilterToggle`] owns one named branch on a fan-out tap. `start`
//! builds the branch from the command's [`ToggleOptions`] and attaches it;
//! `stop` detaches and closes it. Both are safe to call from the command
//! thread while the tap's loop keeps running.

use roverpos_filters::{DataFilter, FanOutHandle};
use roverpos_types::{Payload, RoverError, TimestampedValue};
use serde::Deserialize;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

fn default_duration() -> f64 {
    10.0
}

/// Parameters carried by a `.../start` command.
///
/// ```json
/// {"frequency": 5, "filename": "run1.csv", "duration": 30, "topic": "x/y", "samples": 200}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToggleOptions {
    /// Publish rate in Hz. Each branch has its own fallback.
    #[serde(default)]
    pub frequency: Option<f64>,
    /// Recording file name, relative to the recording directory.
    #[serde(default)]
    pub filename: Option<String>,
    /// Recording length in seconds of data time.
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Topic override for publishers.
    #[serde(default)]
    pub topic: Option<String>,
    /// Sample count for calibration runs.
    #[serde(default)]
    pub samples: Option<usize>,
}

impl Default for ToggleOptions {
    fn default() -> Self {
        Self {
            frequency: None,
            filename: None,
            duration: default_duration(),
            topic: None,
            samples: None,
        }
    }
}

impl ToggleOptions {
    pub fn frequency_or(&self, fallback: f64) -> f64 {
        self.frequency.unwrap_or(fallback)
    }

    /// Parse a command payload. An empty payload means all defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Serialization`] for a payload that is not a
    /// JSON object of the expected shape.
    pub fn from_payload(payload: &Payload) -> Result<Self, RoverError> {
        let bytes = payload.as_bytes();
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes).map_err(|e| RoverError::Serialization(format!("command payload: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toggle
// ─────────────────────────────────────────────────────────────────────────────

/// Type-erased start/stop switch, so the command dispatcher can hold
/// toggles for taps of different value types.
pub trait Toggle: Send + Sync {
    /// Name of the branch this toggle manages.
    fn name(&self) -> &str;

    /// Attach the branch; a no-op while it is already attached.
    fn start(&self, options: &ToggleOptions) -> Result<(), RoverError>;

    /// Detach and close the branch. `false` if it was not attached.
    fn stop(&self) -> bool;

    fn is_active(&self) -> bool;
}

/// Builds a branch from command options.
pub type BranchBuilder<T> =
    Box<dyn Fn(&ToggleOptions) -> Result<Box<dyn DataFilter<T>>, RoverError> + Send + Sync>;

pub struct FilterToggle<T> {
    branch: String,
    tap: FanOutHandle<T>,
    build: BranchBuilder<T>,
}

impl<T: 'static> FilterToggle<T> {
    pub fn new(branch: impl Into<String>, tap: FanOutHandle<T>, build: BranchBuilder<T>) -> Self {
        Self {
            branch: branch.into(),
            tap,
            build,
        }
    }
}

impl<T: Send + 'static> Toggle for FilterToggle<T> {
    fn name(&self) -> &str {
        &self.branch
    }

    fn start(&self, options: &ToggleOptions) -> Result<(), RoverError> {
        if self.tap.contains(&self.branch) {
            debug!(branch = %self.branch, "already active");
            return Ok(());
        }
        let inner = (self.build)(options)?;
        self.tap.add(Box::new(Branch {
            name: self.branch.clone(),
            inner,
        }));
        info!(branch = %self.branch, tap = self.tap.name(), ?options, "branch started");
        Ok(())
    }

    fn stop(&self) -> bool {
        match self.tap.remove(&self.branch) {
            Some(mut branch) => {
                branch.close();
                info!(branch = %self.branch, tap = self.tap.name(), "branch stopped");
                true
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        self.tap.contains(&self.branch)
    }
}

/// Gives a built branch the toggle's name so it can be found again.
///
/// An I/O failure means the branch's sink has closed itself; the whole
/// branch then closes so the tap detaches it and a later `start` rebuilds
/// it.
struct Branch<T> {
    name: String,
    inner: Box<dyn DataFilter<T>>,
}

impl<T> DataFilter<T> for Branch<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        let result = self.inner.receive(data);
        if let Err(RoverError::Io { .. }) = &result {
            warn!(branch = %self.name, "sink failed, branch closed");
            self.inner.close();
        }
        result
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Several toggles switched as one, e.g. the raw and scaled UWB publishers.
pub struct ToggleGroup {
    name: String,
    members: Vec<Box<dyn Toggle>>,
}

impl ToggleGroup {
    pub fn new(name: impl Into<String>, members: Vec<Box<dyn Toggle>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

impl Toggle for ToggleGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, options: &ToggleOptions) -> Result<(), RoverError> {
        for member in &self.members {
            if let Err(e) = member.start(options) {
                for started in &self.members {
                    started.stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn stop(&self) -> bool {
        self.members.iter().fold(false, |any, member| member.stop() || any)
    }

    fn is_active(&self) -> bool {
        self.members.iter().any(|member| member.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roverpos_filters::{CaptureFilter, Chain, FanOutFilter, SamplingFilter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<TimestampedValue<u32>>>>;

    fn capturing_toggle(tap: &FanOutFilter<u32>, sink: Arc<Mutex<Option<Captured>>>) -> FilterToggle<u32> {
        FilterToggle::new(
            "publisher",
            tap.handle(),
            Box::new(move |options: &ToggleOptions| -> Result<Box<dyn DataFilter<u32>>, RoverError> {
                let capture = CaptureFilter::<u32>::new("capture");
                *sink.lock().unwrap() = Some(capture.received());
                let sampling = SamplingFilter::<u32>::new(options.frequency_or(1.0))?.then(capture);
                Ok(Box::new(sampling) as Box<dyn DataFilter<u32>>)
            }),
        )
    }

    #[test]
    fn options_default_when_payload_is_empty() {
        let options = ToggleOptions::from_payload(&Payload::Text(String::new())).unwrap();
        assert_eq!(options, ToggleOptions::default());
        assert_eq!(options.frequency, None);
        assert_eq!(options.frequency_or(2.5), 2.5);
        assert_eq!(options.duration, 10.0);
    }

    #[test]
    fn options_parse_partial_payload() {
        let payload = Payload::Text(r#"{"frequency": 5, "filename": "run.csv"}"#.into());
        let options = ToggleOptions::from_payload(&payload).unwrap();
        assert_eq!(options.frequency_or(1.0), 5.0);
        assert_eq!(options.filename.as_deref(), Some("run.csv"));
        assert_eq!(options.duration, 10.0);
        assert!(options.topic.is_none());
    }

    #[test]
    fn options_reject_garbage() {
        let payload = Payload::Text("frequency=5".into());
        assert!(matches!(ToggleOptions::from_payload(&payload), Err(RoverError::Serialization(_))));
    }

    #[test]
    fn start_attaches_and_stop_detaches() {
        let mut tap = FanOutFilter::<u32>::new("tap");
        let sink = Arc::new(Mutex::new(None));
        let toggle = capturing_toggle(&tap, Arc::clone(&sink));

        toggle.start(&ToggleOptions::default()).unwrap();
        assert!(toggle.is_active());
        tap.receive(&TimestampedValue::new(1, 0.0)).unwrap();

        assert!(toggle.stop());
        assert!(!toggle.is_active());
        assert!(!toggle.stop());
        tap.receive(&TimestampedValue::new(2, 5.0)).unwrap();

        let received = sink.lock().unwrap().clone().unwrap();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn second_start_keeps_the_first_branch() {
        let tap = FanOutFilter::<u32>::new("tap");
        let toggle = capturing_toggle(&tap, Arc::new(Mutex::new(None)));
        toggle.start(&ToggleOptions::default()).unwrap();
        toggle.start(&ToggleOptions::default()).unwrap();
        assert_eq!(tap.handle().len(), 1);
    }

    #[test]
    fn invalid_frequency_leaves_tap_untouched() {
        let tap = FanOutFilter::<u32>::new("tap");
        let toggle = capturing_toggle(&tap, Arc::new(Mutex::new(None)));
        let options = ToggleOptions {
            frequency: Some(0.0),
            ..ToggleOptions::default()
        };
        assert!(matches!(toggle.start(&options), Err(RoverError::Validation(_))));
        assert!(tap.handle().is_empty());
    }

    #[test]
    fn group_switches_every_member() {
        let a = FanOutFilter::<u32>::new("a");
        let b = FanOutFilter::<u32>::new("b");
        let group = ToggleGroup::new(
            "both",
            vec![
                Box::new(capturing_toggle(&a, Arc::new(Mutex::new(None)))),
                Box::new(capturing_toggle(&b, Arc::new(Mutex::new(None)))),
            ],
        );
        group.start(&ToggleOptions::default()).unwrap();
        assert!(a.handle().contains("publisher") && b.handle().contains("publisher"));
        assert!(group.stop());
        assert!(!group.is_active());
    }

    #[test]
    fn failed_sink_can_be_restarted() {
        let mut tap = FanOutFilter::<u32>::new("tap");
        let builds = Arc::new(AtomicUsize::new(0));
        let healthy = Arc::new(Mutex::new(None));
        let toggle = FilterToggle::new("publisher", tap.handle(), {
            let builds = Arc::clone(&builds);
            let healthy = Arc::clone(&healthy);
            Box::new(move |_: &ToggleOptions| -> Result<Box<dyn DataFilter<u32>>, RoverError> {
                let sink = if builds.fetch_add(1, Ordering::SeqCst) == 0 {
                    CaptureFilter::<u32>::failing("capture", RoverError::io("bus", "down"))
                } else {
                    let capture = CaptureFilter::<u32>::new("capture");
                    *healthy.lock().unwrap() = Some(capture.received());
                    capture
                };
                Ok(Box::new(SamplingFilter::<u32>::new(1.0)?.then(sink)) as Box<dyn DataFilter<u32>>)
            })
        });

        toggle.start(&ToggleOptions::default()).unwrap();
        tap.receive(&TimestampedValue::new(1, 0.0)).unwrap();
        assert!(!toggle.is_active());
        assert!(tap.handle().is_empty());

        toggle.start(&ToggleOptions::default()).unwrap();
        assert!(toggle.is_active());
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        tap.receive(&TimestampedValue::new(2, 1.0)).unwrap();

        let received = healthy.lock().unwrap().clone().unwrap();
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
