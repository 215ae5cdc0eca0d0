//! Drivers that need no hardware.
//!
//! [`ScriptedDriver`] replays a fixed list of results and is the workhorse
//! of the loop tests. [`SimImuDriver`] and [`SimDecawaveDriver`] synthesise a
//! stationary rover at a fixed rate so the whole service can run headless.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use roverpos_types::{DwmLocationResponse, DwmPosition, NineDoFData, RoverError, Vector};

use crate::driver::SensorDriver;

// ────────────────────────────────────────────────────────────────────────────
// Scripted driver
// ────────────────────────────────────────────────────────────────────────────

/// Returns each scripted result once, in order, then reports exhaustion.
pub struct ScriptedDriver<S> {
    id: String,
    script: VecDeque<Result<S, RoverError>>,
    closes: Arc<AtomicUsize>,
}

impl<S> ScriptedDriver<S> {
    pub fn new(id: impl Into<String>, script: Vec<Result<S, RoverError>>) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `close()` calls, readable after the driver has been
    /// moved into a provider.
    pub fn close_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closes)
    }
}

impl<S: Send> SensorDriver for ScriptedDriver<S> {
    type Sample = S;

    fn id(&self) -> &str {
        &self.id
    }

    fn data_ready(&mut self, _timeout_ms: u64) -> bool {
        !self.script.is_empty()
    }

    fn read(&mut self) -> Result<S, RoverError> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(RoverError::io(&self.id, "script exhausted")))
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_exhausted(&self) -> bool {
        self.script.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixed-rate synthetic drivers
// ────────────────────────────────────────────────────────────────────────────

/// Paces reads at a fixed rate.
#[derive(Debug)]
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn new(frequency_hz: f64) -> Self {
        let seconds = if frequency_hz > 0.0 {
            (1.0 / frequency_hz).min(3600.0)
        } else {
            1.0
        };
        Self {
            period: Duration::from_secs_f64(seconds),
            next: Instant::now(),
        }
    }

    fn ready_within(&self, timeout_ms: u64) -> bool {
        let now = Instant::now();
        if now >= self.next {
            return true;
        }
        let wait = self.next - now;
        let timeout = Duration::from_millis(timeout_ms);
        if wait > timeout {
            thread::sleep(timeout);
            return false;
        }
        thread::sleep(wait);
        true
    }

    fn consume(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
        }
        self.next += self.period;
    }
}

/// A level, stationary IMU facing magnetic north.
#[derive(Debug)]
pub struct SimImuDriver {
    ticker: Ticker,
    sample: NineDoFData,
}

impl SimImuDriver {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            ticker: Ticker::new(frequency_hz),
            sample: NineDoFData {
                acceleration: Vector::new(0.0, 0.0, 1.0),
                angular_velocity: Vector::zero(),
                magnetic_field: Vector::new(20.0, 0.0, 40.0),
                temperature: 25.0,
            },
        }
    }

    pub fn with_sample(mut self, sample: NineDoFData) -> Self {
        self.sample = sample;
        self
    }
}

impl SensorDriver for SimImuDriver {
    type Sample = NineDoFData;

    fn id(&self) -> &str {
        "sim-imu"
    }

    fn data_ready(&mut self, timeout_ms: u64) -> bool {
        self.ticker.ready_within(timeout_ms)
    }

    fn read(&mut self) -> Result<NineDoFData, RoverError> {
        self.ticker.consume();
        Ok(self.sample)
    }

    fn close(&mut self) {}
}

/// A UWB tag parked at a fixed position.
#[derive(Debug)]
pub struct SimDecawaveDriver {
    ticker: Ticker,
    tag_position: DwmPosition,
}

impl SimDecawaveDriver {
    pub fn new(frequency_hz: f64, tag_position: DwmPosition) -> Self {
        Self {
            ticker: Ticker::new(frequency_hz),
            tag_position,
        }
    }
}

impl SensorDriver for SimDecawaveDriver {
    type Sample = DwmLocationResponse;

    fn id(&self) -> &str {
        "sim-dwm1001"
    }

    fn data_ready(&mut self, timeout_ms: u64) -> bool {
        self.ticker.ready_within(timeout_ms)
    }

    fn read(&mut self) -> Result<DwmLocationResponse, RoverError> {
        self.ticker.consume();
        Ok(DwmLocationResponse {
            tag_position: self.tag_position,
            anchors: Vec::new(),
        })
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_driver_exhausts() {
        let mut driver = ScriptedDriver::new("s", vec![Ok(5u8)]);
        assert!(driver.data_ready(0));
        assert_eq!(driver.read().unwrap(), 5);
        assert!(!driver.data_ready(0));
        assert!(driver.is_exhausted());
        assert!(matches!(driver.read(), Err(RoverError::Io { .. })));
    }

    #[test]
    fn sim_imu_reports_gravity_on_z() {
        let mut imu = SimImuDriver::new(1000.0);
        assert!(imu.data_ready(10));
        let sample = imu.read().unwrap();
        assert!((sample.acceleration.z - 1.0).abs() < 1e-12);
        assert_eq!(sample.angular_velocity, Vector::zero());
    }

    #[test]
    fn sim_drivers_are_paced() {
        let mut uwb = SimDecawaveDriver::new(10.0, DwmPosition::new(1000, 2000, 0, 100));
        assert!(uwb.data_ready(0));
        uwb.read().unwrap();
        // Next sample is 100 ms away; a 1 ms poll must time out.
        assert!(!uwb.data_ready(1));
    }
}
