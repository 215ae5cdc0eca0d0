//! Position estimation.
//!
//! A [`PositionAlgorithm`] is fed by two loops (IMU attitude and UWB fixes)
//! through one mutex, so any single `step` may carry only some of the
//! fields of a [`PositionInput`]. Missing fields keep their previous state;
//! fields older than the newest one already consumed of the same kind are
//! ignored.

use roverpos_types::{AttitudeOutput, Position, PositionInput, TimestampedValue, Vector};
use tracing::{debug, trace};

pub trait PositionAlgorithm: Send {
    fn reset(&mut self);

    /// Seed the state.
    fn initialise(&mut self, position: Position, timestamp: f64);

    fn step(&mut self, input: &PositionInput) -> Position;
}

// ────────────────────────────────────────────────────────────────────────────
// Placeholder
// ────────────────────────────────────────────────────────────────────────────

/// Passes the latest attitude through; velocity and position stay zero.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderPositionAlgorithm {
    latest: Option<AttitudeOutput>,
}

impl PlaceholderPositionAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionAlgorithm for PlaceholderPositionAlgorithm {
    fn reset(&mut self) {
        self.latest = None;
    }

    fn initialise(&mut self, position: Position, _timestamp: f64) {
        self.latest = Some(AttitudeOutput {
            attitude: position.attitude,
            acceleration: position.acceleration,
            ..AttitudeOutput::default()
        });
    }

    fn step(&mut self, input: &PositionInput) -> Position {
        if let Some(attitude) = input.attitude() {
            self.latest = Some(*attitude.value());
        }
        let latest = self.latest.unwrap_or_default();
        Position {
            attitude: latest.attitude,
            acceleration: latest.acceleration,
            velocity: Vector::zero(),
            position: Vector::zero(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dead reckoning
// ────────────────────────────────────────────────────────────────────────────

/// Newest timestamp consumed per input kind.
#[derive(Debug, Clone, Copy, Default)]
struct Watermarks {
    attitude: Option<f64>,
    velocity: Option<f64>,
    position: Option<f64>,
}

fn is_fresh<T>(value: Option<&TimestampedValue<T>>, watermark: Option<f64>) -> Option<&TimestampedValue<T>> {
    value.filter(|v| watermark.is_none_or(|w| v.timestamp() > w))
}

/// Integrates world-frame acceleration into velocity and position and
/// blends each UWB fix into the integrated position.
///
/// Acceleration inputs are expected in m/s² with gravity included; it is
/// removed after rotation into the world frame.
#[derive(Debug, Clone)]
pub struct DeadReckoningPositionAlgorithm {
    g: f64,
    /// Weight of a new fix against the integrated position (0–1).
    fix_weight: f64,
    state: Position,
    seen: Watermarks,
    has_fix: bool,
}

impl DeadReckoningPositionAlgorithm {
    /// `fix_weight` is clamped to `[0, 1]`; `1.0` snaps to every fix.
    pub fn new(g: f64, fix_weight: f64) -> Self {
        Self {
            g,
            fix_weight: fix_weight.clamp(0.0, 1.0),
            state: Position::default(),
            seen: Watermarks::default(),
            has_fix: false,
        }
    }

    fn integrate(&mut self, attitude: &TimestampedValue<AttitudeOutput>) {
        let output = attitude.value();
        let world = output.attitude.rotate(output.acceleration) - Vector::new(0.0, 0.0, self.g);
        if let Some(last) = self.seen.attitude {
            let dt = attitude.timestamp() - last;
            self.state.velocity = self.state.velocity + world * dt;
            self.state.position = self.state.position + self.state.velocity * dt;
        }
        self.state.attitude = output.attitude;
        self.state.acceleration = world;
        self.seen.attitude = Some(attitude.timestamp());
    }

    fn correct(&mut self, fix: &TimestampedValue<Vector>) {
        let measured = *fix.value();
        self.state.position = if self.has_fix {
            self.state.position + (measured - self.state.position) * self.fix_weight
        } else {
            debug!(x = measured.x, y = measured.y, z = measured.z, "first position fix");
            measured
        };
        self.has_fix = true;
        self.seen.position = Some(fix.timestamp());
    }
}

impl PositionAlgorithm for DeadReckoningPositionAlgorithm {
    fn reset(&mut self) {
        self.state = Position::default();
        self.seen = Watermarks::default();
        self.has_fix = false;
    }

    fn initialise(&mut self, position: Position, timestamp: f64) {
        self.state = Position {
            attitude: position.attitude.normalised(),
            ..position
        };
        self.seen = Watermarks {
            attitude: Some(timestamp),
            velocity: Some(timestamp),
            position: Some(timestamp),
        };
        self.has_fix = true;
    }

    fn step(&mut self, input: &PositionInput) -> Position {
        if let Some(attitude) = is_fresh(input.attitude(), self.seen.attitude) {
            self.integrate(attitude);
        }
        if let Some(velocity) = is_fresh(input.velocity(), self.seen.velocity) {
            self.state.velocity = *velocity.value();
            self.seen.velocity = Some(velocity.timestamp());
        }
        if let Some(fix) = is_fresh(input.position(), self.seen.position) {
            self.correct(fix);
        }
        trace!(timestamp = input.timestamp(), "dead reckoning step");
        self.state
    }
}

impl Default for DeadReckoningPositionAlgorithm {
    fn default() -> Self {
        Self::new(9.80665, 0.1)
    }
}
