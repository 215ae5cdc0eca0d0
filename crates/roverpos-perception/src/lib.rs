//! `roverpos-perception` – estimation strategies.
//!
//! Pure computation: nothing in this crate performs I/O inside a `step`.
//! Algorithms are stateful and driven one sample at a time by the filters
//! in `roverpos-filters`.
//!
//! # Modules
//!
//! - [`attitude`] – [`AttitudeAlgorithm`] plus a tilt-compensated compass
//!   and a gyro/compass complementary filter.
//! - [`position`] – [`PositionAlgorithm`] plus a placeholder and a
//!   dead-reckoning integrator corrected by UWB fixes.
//! - [`calibration`] – [`Scaler`], the persisted IMU, rotation and UWB
//!   range calibrations, and the stationary IMU calibrator.
//! - [`trilateration`] – a least-squares tag fix from anchor ranges.

pub mod attitude;
pub mod calibration;
pub mod position;
pub mod trilateration;

pub use attitude::{AttitudeAlgorithm, ComplementaryAttitudeAlgorithm, SimpleAttitudeAlgorithm};
pub use calibration::{
    DecawaveRangeScaler, ImuCalibrator, ImuScaler, RotationScaler, Scaler, SharedScaler, VectorScaler,
};
pub use position::{DeadReckoningPositionAlgorithm, PlaceholderPositionAlgorithm, PositionAlgorithm};
pub use trilateration::{AnchorRange, MIN_ANCHORS, trilaterate};
