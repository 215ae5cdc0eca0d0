//! Type-preserving filters: sampling, scaling and fan-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use roverpos_perception::Scaler;
use roverpos_types::{RoverError, TimestampedValue};
use tracing::{debug, trace};

use crate::filter::{Chain, DataFilter, Downstream, FilterCore};

// ────────────────────────────────────────────────────────────────────────────
// SamplingFilter
// ────────────────────────────────────────────────────────────────────────────

/// Forwards a value only when at least `1 / frequency` seconds of data time
/// have passed since the last forwarded value. The first value always
/// passes.
pub struct SamplingFilter<T> {
    core: FilterCore<T>,
    period: f64,
    last_forwarded: Option<f64>,
}

impl<T> SamplingFilter<T> {
    /// # Errors
    ///
    /// Returns [`RoverError::Validation`] unless `frequency` is positive and
    /// finite.
    pub fn new(frequency: f64) -> Result<Self, RoverError> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(RoverError::Validation(format!(
                "sampling frequency must be positive, got {frequency}"
            )));
        }
        Ok(Self {
            core: FilterCore::new("sampling"),
            period: 1.0 / frequency,
            last_forwarded: None,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }
}

impl<T: Send> DataFilter<T> for SamplingFilter<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let due = match self.last_forwarded {
            None => true,
            Some(last) => data.timestamp() - last >= self.period,
        };
        if !due {
            trace!(filter = self.core.name(), timestamp = data.timestamp(), "sample skipped");
            return Ok(());
        }
        self.last_forwarded = Some(data.timestamp());
        self.core.send(data)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T> Chain<T> for SamplingFilter<T> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScalingFilter
// ────────────────────────────────────────────────────────────────────────────

/// Applies a [`Scaler`] and forwards the result with the original timestamp.
pub struct ScalingFilter<T> {
    core: FilterCore<T>,
    scaler: Box<dyn Scaler<T>>,
}

impl<T> ScalingFilter<T> {
    pub fn new<S: Scaler<T> + 'static>(scaler: S) -> Self {
        Self {
            core: FilterCore::new("scaling"),
            scaler: Box::new(scaler),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }
}

impl<T: Send> DataFilter<T> for ScalingFilter<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let scaled = data.map(|value| self.scaler.scale(value));
        self.core.send(&scaled)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<T> Chain<T> for ScalingFilter<T> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FanOutFilter
// ────────────────────────────────────────────────────────────────────────────

fn lock<O>(branches: &Mutex<Downstream<O>>) -> MutexGuard<'_, Downstream<O>> {
    branches.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Broadcasts each value, by reference, to every branch in registration
/// order.
///
/// A tap is the boundary of its branches: an I/O failure in one branch has
/// already closed that branch's sink, so it is logged and detached here and
/// not reported upstream.
///
/// The branch set lives behind a mutex so a [`FanOutHandle`] can attach and
/// detach branches from another thread while the filter itself sits inside
/// a running chain.
pub struct FanOutFilter<T> {
    name: String,
    closed: bool,
    branches: Arc<Mutex<Downstream<T>>>,
}

impl<T> FanOutFilter<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closed: false,
            branches: Arc::new(Mutex::new(Downstream::new())),
        }
    }

    pub fn handle(&self) -> FanOutHandle<T> {
        FanOutHandle {
            name: self.name.clone(),
            branches: Arc::clone(&self.branches),
        }
    }
}

impl<T: Send> DataFilter<T> for FanOutFilter<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self, data: &TimestampedValue<T>) -> Result<(), RoverError> {
        if self.closed {
            return Err(RoverError::ContractViolation(format!(
                "receive on closed filter '{}'",
                self.name
            )));
        }
        match lock(&self.branches).send(data) {
            Err(RoverError::Io { .. }) => Ok(()),
            other => other,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.branches).close();
            debug!(filter = %self.name, "fan-out closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T> Chain<T> for FanOutFilter<T> {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<T>>) {
        lock(&self.branches).add(filter);
    }
}

/// Attach and detach branches of a [`FanOutFilter`] from anywhere.
pub struct FanOutHandle<T> {
    name: String,
    branches: Arc<Mutex<Downstream<T>>>,
}

impl<T> FanOutHandle<T> {
    /// Name of the fan-out this handle controls.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, filter: Box<dyn DataFilter<T>>) {
        debug!(fan_out = %self.name, branch = filter.name(), "branch attached");
        lock(&self.branches).add(filter);
    }

    pub fn remove(&self, name: &str) -> Option<Box<dyn DataFilter<T>>> {
        let removed = lock(&self.branches).remove(name);
        if removed.is_some() {
            debug!(fan_out = %self.name, branch = name, "branch detached");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.branches).contains(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.branches).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.branches).is_empty()
    }
}

impl<T> Clone for FanOutHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            branches: Arc::clone(&self.branches),
        }
    }
}
