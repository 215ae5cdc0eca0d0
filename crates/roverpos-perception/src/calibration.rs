//! Calibration scalers.
//!
//! A [`Scaler`] maps a raw value to a corrected one. Any `Fn(&T) -> T`
//! closure is a scaler; the structs here are the persisted calibrations
//! the service loads at start-up and on request.
//!
//! Calibration files are pretty-printed JSON.

use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use roverpos_types::{NineDoFData, Quaternion, RoverError, Vector};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::info;

pub trait Scaler<T>: Send + Sync {
    fn scale(&self, value: &T) -> T;
}

impl<T, F> Scaler<T> for F
where
    F: Fn(&T) -> T + Send + Sync,
{
    fn scale(&self, value: &T) -> T {
        self(value)
    }
}

/// A scaler behind a lock so one calibration can be swapped at run time
/// while several filters use it.
pub struct SharedScaler<S> {
    inner: Arc<RwLock<S>>,
}

impl<S> SharedScaler<S> {
    pub fn new(scaler: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(scaler)),
        }
    }

    /// Replace the calibration for every holder of this handle.
    pub fn replace(&self, scaler: S) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = scaler;
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<S> Clone for SharedScaler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S: Scaler<T>> Scaler<T> for SharedScaler<S> {
    fn scale(&self, value: &T) -> T {
        self.read(|scaler| scaler.scale(value))
    }
}

fn load_json<C: DeserializeOwned>(path: &Path) -> Result<C, RoverError> {
    let text = fs::read_to_string(path).map_err(|e| RoverError::io("calibration", format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| RoverError::Serialization(format!("{}: {e}", path.display())))
}

fn save_json<C: Serialize>(calibration: &C, path: &Path) -> Result<(), RoverError> {
    let text = serde_json::to_string_pretty(calibration).map_err(|e| RoverError::Serialization(e.to_string()))?;
    fs::write(path, text).map_err(|e| RoverError::io("calibration", format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), "calibration saved");
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// VectorScaler
// ────────────────────────────────────────────────────────────────────────────

/// `(v − offset) ⊙ multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorScaler {
    pub offset: Vector,
    pub multiplier: Vector,
}

impl VectorScaler {
    pub fn new(offset: Vector, multiplier: Vector) -> Self {
        Self { offset, multiplier }
    }

    pub fn identity() -> Self {
        Self::new(Vector::zero(), Vector::one())
    }

    /// Pure elementwise multiplication, e.g. millimetres to metres.
    pub fn multiplier(multiplier: Vector) -> Self {
        Self::new(Vector::zero(), multiplier)
    }
}

impl Default for VectorScaler {
    fn default() -> Self {
        Self::identity()
    }
}

impl Scaler<Vector> for VectorScaler {
    fn scale(&self, value: &Vector) -> Vector {
        (*value - self.offset).scale(self.multiplier)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ImuScaler
// ────────────────────────────────────────────────────────────────────────────

/// Per-sensor offsets and gains for a 9-axis IMU.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuScaler {
    #[serde(default)]
    pub accelerometer: VectorScaler,
    #[serde(default)]
    pub gyroscope: VectorScaler,
    #[serde(default)]
    pub magnetometer: VectorScaler,
    /// Added to the raw die temperature.
    #[serde(default)]
    pub temperature_offset: f64,
}

impl ImuScaler {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoverError> {
        let scaler = load_json(path.as_ref())?;
        info!(path = %path.as_ref().display(), "imu calibration loaded");
        Ok(scaler)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RoverError> {
        save_json(self, path.as_ref())
    }
}

impl Scaler<NineDoFData> for ImuScaler {
    fn scale(&self, value: &NineDoFData) -> NineDoFData {
        NineDoFData {
            acceleration: self.accelerometer.scale(&value.acceleration),
            angular_velocity: self.gyroscope.scale(&value.angular_velocity),
            magnetic_field: self.magnetometer.scale(&value.magnetic_field),
            temperature: value.temperature + self.temperature_offset,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RotationScaler
// ────────────────────────────────────────────────────────────────────────────

/// Rotates vectors from one frame into another, e.g. the UWB anchor frame
/// into the magnetic-north frame the IMU reports in.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotationScaler {
    pub rotation: Quaternion,
}

impl RotationScaler {
    pub fn new(rotation: Quaternion) -> Self {
        Self {
            rotation: rotation.normalised(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoverError> {
        let scaler: Self = load_json(path.as_ref())?;
        info!(path = %path.as_ref().display(), "rotation calibration loaded");
        Ok(Self::new(scaler.rotation))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RoverError> {
        save_json(self, path.as_ref())
    }
}

impl Scaler<Vector> for RotationScaler {
    fn scale(&self, value: &Vector) -> Vector {
        self.rotation.rotate(*value)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ImuCalibrator
// ────────────────────────────────────────────────────────────────────────────

/// Accumulates raw samples from a stationary rover and derives the gyro
/// bias and accelerometer gain from them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuCalibrator {
    count: usize,
    acceleration: Vector,
    angular_velocity: Vector,
}

impl ImuCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sample: &NineDoFData) {
        self.count += 1;
        self.acceleration = self.acceleration + sample.acceleration;
        self.angular_velocity = self.angular_velocity + sample.angular_velocity;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `base` with the gyroscope offset set to the mean rate and the
    /// accelerometer gain rescaled so the mean acceleration reads 1 g. The
    /// magnetometer and temperature calibration are kept.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Validation`] without samples, or when the mean
    /// acceleration is zero or non-finite.
    pub fn calibrate(&self, base: &ImuScaler) -> Result<ImuScaler, RoverError> {
        if self.is_empty() {
            return Err(RoverError::Validation("no samples to calibrate from".into()));
        }
        let n = self.count as f64;
        let gravity = base.accelerometer.scale(&(self.acceleration * (1.0 / n))).magnitude();
        if !gravity.is_finite() || gravity < f64::EPSILON {
            return Err(RoverError::Validation(format!("cannot calibrate against acceleration {gravity}")));
        }
        let gyro_bias = self.angular_velocity * (1.0 / n);
        if !gyro_bias.to_array().iter().all(|c| c.is_finite()) {
            return Err(RoverError::Validation("non-finite gyroscope samples".into()));
        }
        Ok(ImuScaler {
            accelerometer: VectorScaler::new(base.accelerometer.offset, base.accelerometer.multiplier * (1.0 / gravity)),
            gyroscope: VectorScaler::new(gyro_bias, base.gyroscope.multiplier),
            ..*base
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DecawaveRangeScaler
// ────────────────────────────────────────────────────────────────────────────

fn default_gain() -> f64 {
    1.0
}

fn default_reference_temperature() -> f64 {
    20.0
}

/// Linear correction of a UWB range, with a drift term for the module
/// temperatures.
///
/// `corrected = (range − offset − drift) × gain`, where `drift` is
/// `temperature_coefficient` times the mean of the tag and anchor
/// temperatures less `reference_temperature`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecawaveRangeScaler {
    /// Constant bias, mm.
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Range drift, mm/°C.
    #[serde(default)]
    pub temperature_coefficient: f64,
    /// Temperature at which the drift is zero, °C.
    #[serde(default = "default_reference_temperature")]
    pub reference_temperature: f64,
}

impl DecawaveRangeScaler {
    pub fn identity() -> Self {
        Self {
            offset: 0.0,
            gain: default_gain(),
            temperature_coefficient: 0.0,
            reference_temperature: default_reference_temperature(),
        }
    }

    pub fn scale(&self, range: f64, tag_temperature: f64, anchor_temperature: f64) -> f64 {
        let mean = (tag_temperature + anchor_temperature) / 2.0;
        let drift = self.temperature_coefficient * (mean - self.reference_temperature);
        (range - self.offset - drift) * self.gain
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RoverError> {
        let scaler = load_json(path.as_ref())?;
        info!(path = %path.as_ref().display(), "range calibration loaded");
        Ok(scaler)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RoverError> {
        save_json(self, path.as_ref())
    }
}

impl Default for DecawaveRangeScaler {
    fn default() -> Self {
        Self::identity()
    }
}
