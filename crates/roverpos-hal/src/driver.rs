//! Hardware driver seam.
//!
//! A [`SensorDriver`] wraps a vendor library handle (the LSM9DS1 IMU, the
//! DWM1001 UWB tag). [`HardwareProvider`] adapts any driver to the
//! [`DataProvider`] contract by stamping each sample from a
//! [`MonotonicClock`].

use std::time::{Duration, Instant};

use roverpos_types::{RoverError, TimestampedValue};
use tracing::{debug, info};

use crate::provider::DataProvider;

/// Seconds elapsed since the clock was created. Never goes backwards.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A blocking sensor handle.
pub trait SensorDriver: Send {
    type Sample;

    /// Stable identifier for this device, e.g. `"lsm9ds1"`.
    fn id(&self) -> &str;

    /// `true` iff a sample becomes ready within `timeout_ms`.
    fn data_ready(&mut self, timeout_ms: u64) -> bool;

    /// Read the next sample, blocking if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Io`] if the device cannot be read.
    fn read(&mut self) -> Result<Self::Sample, RoverError>;

    fn close(&mut self);

    /// `true` when the device will never report data again.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// [`DataProvider`] over a [`SensorDriver`].
pub struct HardwareProvider<D> {
    id: String,
    driver: D,
    clock: MonotonicClock,
    closed: bool,
}

impl<D: SensorDriver> HardwareProvider<D> {
    pub fn new(id: impl Into<String>, driver: D, clock: MonotonicClock) -> Self {
        let id = id.into();
        info!(provider = %id, driver = driver.id(), "hardware provider opened");
        Self {
            id,
            driver,
            clock,
            closed: false,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: SensorDriver> DataProvider<D::Sample> for HardwareProvider<D> {
    fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        if self.closed {
            return false;
        }
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.driver.data_ready(timeout_ms)
    }

    fn get(&mut self) -> Result<TimestampedValue<D::Sample>, RoverError> {
        if self.closed {
            return Err(RoverError::io(&self.id, "provider closed"));
        }
        let sample = self.driver.read()?;
        Ok(TimestampedValue::new(sample, self.clock.now()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.driver.close();
            debug!(provider = %self.id, "hardware provider closed");
        }
    }

    fn is_exhausted(&self) -> bool {
        self.closed || self.driver.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ScriptedDriver;

    #[test]
    fn clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn samples_are_stamped_in_order() {
        let driver = ScriptedDriver::new("scripted", vec![Ok(1u32), Ok(2u32)]);
        let mut provider = HardwareProvider::new("test", driver, MonotonicClock::new());

        assert!(provider.poll(Duration::from_millis(1)));
        let first = provider.get().unwrap();
        assert!(provider.poll(Duration::from_millis(1)));
        let second = provider.get().unwrap();

        assert_eq!(*first.value(), 1);
        assert_eq!(*second.value(), 2);
        assert!(second.timestamp() >= first.timestamp());
        assert!(provider.is_exhausted());
    }

    #[test]
    fn driver_errors_propagate() {
        let driver = ScriptedDriver::<u32>::new(
            "scripted",
            vec![Err(RoverError::io("i2c", "nack"))],
        );
        let mut provider = HardwareProvider::new("test", driver, MonotonicClock::new());
        assert!(matches!(provider.get(), Err(RoverError::Io { .. })));
    }

    #[test]
    fn close_is_idempotent_and_reaches_driver_once() {
        let driver = ScriptedDriver::new("scripted", vec![Ok(1u8)]);
        let closes = driver.close_count();
        let mut provider = HardwareProvider::new("test", driver, MonotonicClock::new());

        provider.close();
        provider.close();

        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!provider.poll(Duration::from_millis(1)));
        assert!(matches!(provider.get(), Err(RoverError::Io { .. })));
    }
}
