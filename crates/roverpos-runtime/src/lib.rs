//! `roverpos-runtime` – threads, commands and wiring.
//!
//! Everything that turns the filter graph into a running service.
//!
//! # Modules
//!
//! - [`provider_loop`] – [`ProviderLoop`][provider_loop::ProviderLoop]:
//!   one OS thread per sensor stream, polling a
//!   [`DataProvider`][roverpos_hal::DataProvider] and pushing each sample
//!   through its chain. Shared [`LoopControl`][provider_loop::LoopControl]
//!   switches pause or stop every stream at once.
//! - [`toggle`] – [`FilterToggle`][toggle::FilterToggle]: attaches and
//!   detaches a named publisher or recorder branch on a fan-out tap while
//!   the loop feeding it keeps running.
//! - [`service`] – [`PositionService`][service::PositionService]: builds
//!   the IMU and UWB chains, merges them into one position estimate and
//!   answers bus commands.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod provider_loop;
pub mod service;
pub mod telemetry;
pub mod toggle;

pub use provider_loop::{LoopControl, LoopExit, LoopHandle, LoopMonitor, LoopStats, ProviderLoop};
pub use service::{Flow, LoopReport, PositionService, ServiceConfig, COMMAND_PREFIX};
pub use telemetry::{init_tracing, TracerProviderGuard};
pub use toggle::{BranchBuilder, FilterToggle, Toggle, ToggleGroup, ToggleOptions};
