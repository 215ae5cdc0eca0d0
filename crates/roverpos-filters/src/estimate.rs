//! Filters that drive the perception algorithms.

use roverpos_perception::{
    AttitudeAlgorithm, ImuCalibrator, ImuScaler, PositionAlgorithm, SharedScaler, SimpleAttitudeAlgorithm,
};
use roverpos_types::{
    AttitudeOutput, NineDoFData, Position, PositionInput, RoverError, TimestampedValue,
};
use tracing::{debug, info, warn};

use crate::filter::{Chain, DataFilter, FilterCore};

fn is_finite_sample(sample: &NineDoFData) -> bool {
    [sample.acceleration, sample.angular_velocity, sample.magnetic_field]
        .iter()
        .flat_map(|v| v.to_array())
        .chain(std::iter::once(sample.temperature))
        .all(f64::is_finite)
}

// ────────────────────────────────────────────────────────────────────────────
// AttitudeFilter
// ────────────────────────────────────────────────────────────────────────────

/// Runs an [`AttitudeAlgorithm`] over 9-axis samples.
///
/// The algorithm is seeded from the compass solution of the first sample,
/// then stepped on every sample including that one.
pub struct AttitudeFilter {
    core: FilterCore<AttitudeOutput>,
    algorithm: Box<dyn AttitudeAlgorithm>,
}

impl AttitudeFilter {
    pub fn new<A: AttitudeAlgorithm + 'static>(algorithm: A) -> Self {
        Self {
            core: FilterCore::new("attitude"),
            algorithm: Box::new(algorithm),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }

    /// Forget the current estimate; the next sample re-seeds it.
    pub fn reset(&mut self) {
        self.algorithm.reset();
        debug!(filter = self.core.name(), "attitude reset");
    }
}

impl DataFilter<NineDoFData> for AttitudeFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<NineDoFData>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        if !is_finite_sample(data.value()) || !data.timestamp().is_finite() {
            return Err(RoverError::Validation(format!(
                "non-finite imu sample at {}",
                data.timestamp()
            )));
        }
        if !self.algorithm.is_initialised() {
            let seed = SimpleAttitudeAlgorithm::attitude_from(data.value());
            self.algorithm.initialise(seed, data.timestamp());
            info!(filter = self.core.name(), timestamp = data.timestamp(), "attitude initialised");
        }
        let output = self.algorithm.step(data);
        self.core.send(&TimestampedValue::new(output, data.timestamp()))
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<AttitudeOutput> for AttitudeFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<AttitudeOutput>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PositionFilter
// ────────────────────────────────────────────────────────────────────────────

/// Runs a [`PositionAlgorithm`]. Output carries the newest timestamp among
/// the input's fields.
pub struct PositionFilter {
    core: FilterCore<Position>,
    algorithm: Box<dyn PositionAlgorithm>,
}

impl PositionFilter {
    pub fn new<A: PositionAlgorithm + 'static>(algorithm: A) -> Self {
        Self {
            core: FilterCore::new("position"),
            algorithm: Box::new(algorithm),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.core.rename(name);
        self
    }

    /// Seed the algorithm with a known state.
    pub fn initialise(&mut self, position: Position, timestamp: f64) {
        self.algorithm.initialise(position, timestamp);
    }

    pub fn reset(&mut self) {
        self.algorithm.reset();
        debug!(filter = self.core.name(), "position reset");
    }
}

impl DataFilter<PositionInput> for PositionFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<PositionInput>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        let position = data.map(|input| self.algorithm.step(input));
        self.core.send(&position)
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<Position> for PositionFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<Position>>) {
        self.core.downstream.add(filter);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ImuCalibrationFilter
// ────────────────────────────────────────────────────────────────────────────

/// Collects raw samples from a stationary rover, then swaps a fresh
/// calibration into the shared scaler and closes itself.
///
/// Samples pass through unchanged. A calibration that cannot be derived is
/// logged and the previous one kept.
pub struct ImuCalibrationFilter {
    core: FilterCore<NineDoFData>,
    scaler: SharedScaler<ImuScaler>,
    calibrator: ImuCalibrator,
    samples: usize,
}

impl ImuCalibrationFilter {
    /// # Errors
    ///
    /// Returns [`RoverError::Validation`] when `samples` is zero.
    pub fn new(scaler: SharedScaler<ImuScaler>, samples: usize) -> Result<Self, RoverError> {
        if samples == 0 {
            return Err(RoverError::Validation("calibration needs at least one sample".into()));
        }
        Ok(Self {
            core: FilterCore::new("imu_calibration"),
            scaler,
            calibrator: ImuCalibrator::new(),
            samples,
        })
    }

    fn finish(&mut self) {
        match self.scaler.read(|current| self.calibrator.calibrate(current)) {
            Ok(calibration) => {
                self.scaler.replace(calibration);
                info!(
                    filter = self.core.name(),
                    samples = self.calibrator.len(),
                    gyro_offset = ?calibration.gyroscope.offset,
                    "imu calibrated"
                );
            }
            Err(e) => warn!(filter = self.core.name(), error = %e, "calibration failed, keeping previous"),
        }
        self.core.close();
    }
}

impl DataFilter<NineDoFData> for ImuCalibrationFilter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn receive(&mut self, data: &TimestampedValue<NineDoFData>) -> Result<(), RoverError> {
        self.core.ensure_open()?;
        if !is_finite_sample(data.value()) {
            return Err(RoverError::Validation(format!(
                "non-finite imu sample at {}",
                data.timestamp()
            )));
        }
        self.calibrator.add(data.value());
        let result = self.core.send(data);
        if self.calibrator.len() >= self.samples {
            self.finish();
        }
        result
    }

    fn close(&mut self) {
        self.core.close();
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl Chain<NineDoFData> for ImuCalibrationFilter {
    fn add_downstream(&mut self, filter: Box<dyn DataFilter<NineDoFData>>) {
        self.core.downstream.add(filter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureFilter;
    use roverpos_perception::{ComplementaryAttitudeAlgorithm, PlaceholderPositionAlgorithm};
    use roverpos_types::{AttitudeStatus, Quaternion, Vector};

    fn level(t: f64) -> TimestampedValue<NineDoFData> {
        TimestampedValue::new(
            NineDoFData {
                acceleration: Vector::new(0.0, 0.0, 1.0),
                angular_velocity: Vector::zero(),
                magnetic_field: Vector::new(20.0, 0.0, 40.0),
                temperature: 25.0,
            },
            t,
        )
    }

    #[test]
    fn level_rover_reports_identity_attitude() {
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter = AttitudeFilter::new(ComplementaryAttitudeAlgorithm::new(0.98)).then(capture);

        for i in 0..10 {
            filter.receive(&level(f64::from(i) * 0.01)).unwrap();
        }

        let outputs = received.lock().unwrap();
        assert_eq!(outputs.len(), 10);
        let last = outputs[9];
        assert!(last.value().attitude.dot(Quaternion::identity()).abs() > 1.0 - 1e-9);
        assert_eq!(last.value().status, AttitudeStatus::Ok);
        assert_eq!(last.timestamp(), f64::from(9) * 0.01);
    }

    #[test]
    fn non_finite_sample_is_dropped_and_filter_stays_open() {
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter = AttitudeFilter::new(SimpleAttitudeAlgorithm::new()).then(capture);

        let mut bad = *level(0.0).value();
        bad.acceleration.x = f64::NAN;
        let result = filter.receive(&TimestampedValue::new(bad, 0.0));
        assert!(matches!(result, Err(RoverError::Validation(_))));
        assert!(!filter.is_closed());

        filter.receive(&level(0.1)).unwrap();
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn placeholder_position_follows_attitude() {
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter = PositionFilter::new(PlaceholderPositionAlgorithm::new()).then(capture);

        let attitude = Quaternion::new(0.0, 0.0, 0.0, 1.0);
        let input = PositionInput::from_attitude(TimestampedValue::new(
            AttitudeOutput {
                attitude,
                acceleration: Vector::zero(),
                status: AttitudeStatus::Ok,
            },
            4.0,
        ));
        filter.receive(&TimestampedValue::new(input, 4.0)).unwrap();

        let out = received.lock().unwrap()[0];
        assert_eq!(out.value().attitude, attitude);
        assert_eq!(out.value().position, Vector::zero());
        assert_eq!(out.timestamp(), 4.0);
    }

    #[test]
    fn estimators_reject_receive_after_close() {
        let mut attitude = AttitudeFilter::new(SimpleAttitudeAlgorithm::new());
        attitude.close();
        attitude.close();
        assert!(matches!(attitude.receive(&level(0.0)), Err(RoverError::ContractViolation(_))));

        let mut position = PositionFilter::new(PlaceholderPositionAlgorithm::new());
        position.close();
        let input = PositionInput::from_position(TimestampedValue::new(Vector::zero(), 0.0));
        assert!(matches!(
            position.receive(&TimestampedValue::new(input, 0.0)),
            Err(RoverError::ContractViolation(_))
        ));
    }

    fn biased(t: f64) -> TimestampedValue<NineDoFData> {
        TimestampedValue::new(
            NineDoFData {
                acceleration: Vector::new(0.0, 0.0, 2.0),
                angular_velocity: Vector::new(0.1, 0.0, -0.05),
                ..*level(t).value()
            },
            t,
        )
    }

    #[test]
    fn calibration_filter_updates_the_scaler_then_closes() {
        let scaler = SharedScaler::new(ImuScaler::default());
        let capture = CaptureFilter::new("out");
        let received = capture.received();
        let mut filter = ImuCalibrationFilter::new(scaler.clone(), 5).unwrap().then(capture);

        for i in 0..4 {
            filter.receive(&biased(f64::from(i))).unwrap();
        }
        assert!(!filter.is_closed());
        assert_eq!(scaler.read(|s| *s), ImuScaler::default());

        filter.receive(&biased(4.0)).unwrap();
        assert!(filter.is_closed());
        assert_eq!(received.lock().unwrap().len(), 5);
        let calibrated = scaler.read(|s| *s);
        assert!((calibrated.gyroscope.offset - Vector::new(0.1, 0.0, -0.05)).magnitude() < 1e-12);
        assert!((calibrated.accelerometer.multiplier - Vector::new(0.5, 0.5, 0.5)).magnitude() < 1e-12);
    }

    #[test]
    fn failed_calibration_keeps_the_previous_scaler() {
        let scaler = SharedScaler::new(ImuScaler::default());
        let mut filter = ImuCalibrationFilter::new(scaler.clone(), 1).unwrap();
        let weightless = TimestampedValue::new(NineDoFData::default(), 0.0);

        filter.receive(&weightless).unwrap();
        assert!(filter.is_closed());
        assert_eq!(scaler.read(|s| *s), ImuScaler::default());
    }

    #[test]
    fn calibration_needs_samples() {
        let scaler = SharedScaler::new(ImuScaler::default());
        assert!(matches!(ImuCalibrationFilter::new(scaler, 0), Err(RoverError::Validation(_))));
    }
}
