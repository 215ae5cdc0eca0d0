//! `roverpos-hal` – where samples come from.
//!
//! Everything upstream of the filter chains lives here: the blocking
//! [`DataProvider`] contract the polling loops drive, the [`SensorDriver`]
//! seam a hardware library plugs into, and the replay source that turns a
//! recording back into a live-looking stream.
//!
//! # Modules
//!
//! - [`provider`] – [`DataProvider`] trait.
//! - [`driver`] – [`SensorDriver`] trait, [`MonotonicClock`] and the
//!   [`HardwareProvider`] adapter that stamps driver samples.
//! - [`replay`] – [`ReplayProvider`]: CSV recordings paced in real time or
//!   as fast as consumed.
//! - [`sim`] – scripted and synthetic drivers for tests and headless runs.

pub mod driver;
pub mod provider;
pub mod replay;
pub mod sim;

pub use driver::{HardwareProvider, MonotonicClock, SensorDriver};
pub use provider::DataProvider;
pub use replay::{ReplayPace, ReplayProvider};
