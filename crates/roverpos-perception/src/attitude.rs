//! Attitude estimation.
//!
//! Body frame: x forward, y left, z up. A level, stationary IMU reads
//! `(0, 0, 1)` g on the accelerometer. Attitudes rotate body vectors into
//! the world frame (x magnetic north, z up).
//!
//! [`ComplementaryAttitudeAlgorithm`] blends two estimates:
//! ```text
//! q = nlerp(q_prev ⊗ Δq(ω·dt), q_compass, 1 − α)
//! ```
//! where `q_compass` is the [`SimpleAttitudeAlgorithm`] solution and α ∈ [0, 1]
//! controls how much the gyroscope integration is trusted. While the
//! accelerometer magnitude is far from 1 g the compass is ignored.

use roverpos_types::{
    AttitudeOutput, AttitudeStatus, NineDoFData, Quaternion, TaitBryan, TimestampedValue,
};
use tracing::debug;

/// Deviation of `|acceleration|` from 1 g above which the vehicle is
/// treated as accelerating.
pub const DEFAULT_ACCELERATION_SENSITIVITY: f64 = 0.1;

/// A stateful attitude estimator.
pub trait AttitudeAlgorithm: Send {
    /// Forget all state; the next `step` behaves like the first.
    fn reset(&mut self);

    /// Seed the estimate.
    fn initialise(&mut self, attitude: Quaternion, timestamp: f64);

    fn is_initialised(&self) -> bool;

    fn step(&mut self, data: &TimestampedValue<NineDoFData>) -> AttitudeOutput;
}

fn status_for(data: &NineDoFData, sensitivity: f64) -> AttitudeStatus {
    if (data.acceleration.magnitude() - 1.0).abs() > sensitivity {
        AttitudeStatus::Accelerating
    } else {
        AttitudeStatus::Ok
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimpleAttitudeAlgorithm
// ────────────────────────────────────────────────────────────────────────────

/// Tilt-compensated compass: roll and pitch from gravity, yaw from the
/// magnetometer. Memoryless.
#[derive(Debug, Clone)]
pub struct SimpleAttitudeAlgorithm {
    acceleration_sensitivity: f64,
    initialised: bool,
}

impl SimpleAttitudeAlgorithm {
    pub fn new() -> Self {
        Self {
            acceleration_sensitivity: DEFAULT_ACCELERATION_SENSITIVITY,
            initialised: false,
        }
    }

    /// The compass solution for a single sample.
    pub fn attitude_from(data: &NineDoFData) -> Quaternion {
        let a = data.acceleration;
        let m = data.magnetic_field;

        let roll = a.y.atan2(a.z);
        let pitch = (-a.x).atan2((a.y * a.y + a.z * a.z).sqrt());

        let (sr, cr) = roll.sin_cos();
        let (sp, cp) = pitch.sin_cos();
        let bx = m.x * cp + m.y * sr * sp + m.z * cr * sp;
        let by = m.y * cr - m.z * sr;
        let yaw = (-by).atan2(bx);

        Quaternion::from_tait_bryan(TaitBryan { roll, pitch, yaw })
    }
}

impl Default for SimpleAttitudeAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

impl AttitudeAlgorithm for SimpleAttitudeAlgorithm {
    fn reset(&mut self) {
        self.initialised = false;
    }

    fn initialise(&mut self, _attitude: Quaternion, _timestamp: f64) {
        self.initialised = true;
    }

    fn is_initialised(&self) -> bool {
        self.initialised
    }

    fn step(&mut self, data: &TimestampedValue<NineDoFData>) -> AttitudeOutput {
        self.initialised = true;
        let sample = data.value();
        AttitudeOutput {
            attitude: Self::attitude_from(sample),
            acceleration: sample.acceleration,
            status: status_for(sample, self.acceleration_sensitivity),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ComplementaryAttitudeAlgorithm
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ComplementaryAttitudeAlgorithm {
    /// Trust in the gyroscope integration (0–1).
    alpha: f64,
    acceleration_sensitivity: f64,
    attitude: Quaternion,
    last_timestamp: Option<f64>,
}

impl ComplementaryAttitudeAlgorithm {
    /// `alpha` is clamped to `[0, 1]`. `0.98` suits a 100 Hz IMU.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            acceleration_sensitivity: DEFAULT_ACCELERATION_SENSITIVITY,
            attitude: Quaternion::identity(),
            last_timestamp: None,
        }
    }

    pub fn with_acceleration_sensitivity(mut self, sensitivity: f64) -> Self {
        self.acceleration_sensitivity = sensitivity.max(0.0);
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl AttitudeAlgorithm for ComplementaryAttitudeAlgorithm {
    fn reset(&mut self) {
        self.attitude = Quaternion::identity();
        self.last_timestamp = None;
    }

    fn initialise(&mut self, attitude: Quaternion, timestamp: f64) {
        self.attitude = attitude.normalised();
        self.last_timestamp = Some(timestamp);
        debug!(timestamp, alpha = self.alpha, "complementary attitude initialised");
    }

    fn is_initialised(&self) -> bool {
        self.last_timestamp.is_some()
    }

    fn step(&mut self, data: &TimestampedValue<NineDoFData>) -> AttitudeOutput {
        let sample = data.value();
        let Some(last) = self.last_timestamp else {
            self.initialise(SimpleAttitudeAlgorithm::attitude_from(sample), data.timestamp());
            return AttitudeOutput {
                attitude: self.attitude,
                acceleration: sample.acceleration,
                status: status_for(sample, self.acceleration_sensitivity),
            };
        };

        let dt = (data.timestamp() - last).max(0.0);
        let delta = Quaternion::from_rotation_vector(sample.angular_velocity * dt);
        let predicted = (self.attitude * delta).normalised();

        let status = status_for(sample, self.acceleration_sensitivity);
        self.attitude = match status {
            AttitudeStatus::Accelerating => predicted,
            _ => predicted.nlerp(SimpleAttitudeAlgorithm::attitude_from(sample), 1.0 - self.alpha),
        };
        self.last_timestamp = Some(data.timestamp().max(last));

        AttitudeOutput {
            attitude: self.attitude,
            acceleration: sample.acceleration,
            status,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
