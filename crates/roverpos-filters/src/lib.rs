//! `roverpos-filters` – the processing graph.
//!
//! Every stage of the pipeline is a [`DataFilter`]: it receives one
//! timestamped value, emits zero or more values to its [`Downstream`]
//! filters, and can be closed. Chains are assembled with [`Chain::then`]:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use roverpos_filters::{Chain, DataFilter, PublishFilter, SamplingFilter, ScalingFilter};
//! use roverpos_middleware::EventBus;
//! use roverpos_types::{TimestampedValue, Vector};
//!
//! let bus = EventBus::default();
//! let mut published = bus.subscribe_topic("data/absolute/raw");
//! let mut head = ScalingFilter::<Vector>::new(|v: &Vector| *v * 0.001).then(
//!     SamplingFilter::<Vector>::new(10.0)
//!         .unwrap()
//!         .then(PublishFilter::<Vector>::new(Arc::new(bus.clone()), "data/absolute/raw")),
//! );
//!
//! head.receive(&TimestampedValue::new(Vector::new(1000.0, 0.0, 0.0), 0.0)).unwrap();
//! assert!(published.try_recv().is_some());
//! ```
//!
//! # Modules
//!
//! - [`filter`] – [`DataFilter`], [`Downstream`], [`FilterCore`], [`Chain`].
//! - [`basic`] – sampling, scaling and fan-out.
//! - [`adapt`] – type adapters between sensor, attitude and position data.
//! - [`estimate`] – filters that drive the perception algorithms.
//! - [`sink`] – bus publishers and the CSV recorder.
//! - [`shared`] – [`SharedFilter`], one filter fed from several threads.
//! - `capture` – `CaptureFilter`, a recording test double. Test-only: built
//!   for this crate's tests and, behind the `test-util` feature, for other
//!   crates' tests.

pub mod adapt;
pub mod basic;
#[cfg(any(test, feature = "test-util"))]
pub mod capture;
pub mod estimate;
pub mod filter;
pub mod shared;
pub mod sink;

pub use adapt::{
    AttitudeOutputToPositionInputFilter, AttitudeToHeadingBytesFilter, DecawaveToPositionInputFilter,
    DecawaveToVectorFilter, DecawaveTrilaterationFilter, HeadingFrame,
};
pub use basic::{FanOutFilter, FanOutHandle, SamplingFilter, ScalingFilter};
#[cfg(any(test, feature = "test-util"))]
pub use capture::CaptureFilter;
pub use estimate::{AttitudeFilter, ImuCalibrationFilter, PositionFilter};
pub use filter::{Chain, DataFilter, Downstream, FilterCore};
pub use shared::SharedFilter;
pub use sink::{PublishBytesFilter, PublishFilter, ToCsvFilter};
