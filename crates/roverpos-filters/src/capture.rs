//! Recording test double.
//!
//! Keeps every value it is sent, without bound, so it is compiled only for
//! tests: this crate's own, and other crates' through the `test-util`
//! feature.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use roverpos_types::{RoverError, TimestampedValue};

use crate::filter::DataFilter;

/// Records every value it receives. Optionally fails every `receive` with a
/// fixed error; an `Io` failure closes it, like a real sink.
pub struct CaptureFilter<T> {
    name: String,
    received: Arc<Mutex<Vec<TimestampedValue<T>>>>,
    closed: Arc<AtomicBool>,
    failure: Option<RoverError>,
}

impl<T> CaptureFilter<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            failure: None,
        }
    }

    pub fn failing(name: impl Into<String>, error: RoverError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(name)
        }
    }

    /// Shared view of everything received so far.
    pub fn received(&self) -> Arc<Mutex<Vec<TimestampedValue<T>>>> {
        Arc::clone(&self.received)
    }

    /// Shared view of the closed state.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl<T: Clone + Send> DataFilter<T> for CaptureFilter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        if self.is_closed() {
            return Err(RoverError::ContractViolation(format!(
                "receive on closed filter '{}'",
                self.name
            )));
        }
        if let Some(error) = self.failure.clone() {
            if matches!(error, RoverError::Io { .. }) {
                self.close();
            }
            return Err(error);
        }
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
