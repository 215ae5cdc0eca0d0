//! `roverpos-cli` – rover position service
//!
//! This binary runs the position pipeline end to end. It:
//!
//! 1. Loads `~/.roverpos/config.toml`, writing the defaults on first run.
//! 2. Opens the configured sensor recordings for replay, or simulates a
//!    level IMU and a parked UWB tag when none are configured.
//! 3. Serves bus commands until every sensor stream ends or **Ctrl-C**.
//! 4. Stops the loops, flushes open recordings and prints per-stream
//!    statistics.

mod config;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use roverpos_hal::sim::{SimDecawaveDriver, SimImuDriver};
use roverpos_hal::{DataProvider, HardwareProvider, MonotonicClock, ReplayPace, ReplayProvider};
use roverpos_middleware::EventBus;
use roverpos_record::{DwmLocationResponseCsvConverter, NineDoFDataCsvConverter};
use roverpos_runtime::{LoopExit, LoopReport, PositionService, COMMAND_PREFIX};
use roverpos_types::{DwmLocationResponse, DwmPosition, NineDoFData, RoverError};

type ImuProvider = Box<dyn DataProvider<NineDoFData>>;
type UwbProvider = Box<dyn DataProvider<DwmLocationResponse>>;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); ROVERPOS_LOG_FORMAT=json for JSON
    // lines. User-facing output still uses println!.
    let _tracing = roverpos_runtime::init_tracing("roverpos");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping sensor loops …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => write_default_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Sensors ───────────────────────────────────────────────────────────
    let (imu, uwb) = match open_providers(&cfg) {
        Ok(providers) => providers,
        Err(e) => {
            error!(error = %e, "cannot open sensors");
            println!("{}: {}", "Sensor error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if cfg.is_simulated() {
        println!("  Sensors: {}", "simulated".yellow());
    } else {
        println!("  Sensors: {} ({:?})", "replay".green(), cfg.replay_pace);
    }

    // ── Service ───────────────────────────────────────────────────────────
    let bus = EventBus::new(cfg.bus_capacity.max(1));
    let service = match PositionService::start(cfg.service_config(), bus, imu, uwb) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "position service failed to start");
            println!("{}: {}", "Start error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot build async runtime");
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!(
        "  Listening for commands on {}  (Ctrl-C to stop)\n",
        format!("{COMMAND_PREFIX}*").bold().cyan()
    );
    runtime.block_on(service.serve(&shutdown));

    let reports = service.shutdown();
    print_reports(&reports);
    if reports.iter().any(|r| !matches!(r.exit, Ok(LoopExit::Shutdown | LoopExit::Exhausted))) {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensors
// ─────────────────────────────────────────────────────────────────────────────

fn open_providers(cfg: &config::Config) -> Result<(ImuProvider, Option<UwbProvider>), RoverError> {
    let pace = ReplayPace::from(cfg.replay_pace);

    let imu: ImuProvider = match &cfg.imu_replay {
        Some(path) => Box::new(ReplayProvider::<NineDoFData, _>::open("imu", path, NineDoFDataCsvConverter, pace)?),
        None => Box::new(HardwareProvider::new(
            "imu",
            SimImuDriver::new(cfg.sim_imu_frequency),
            MonotonicClock::new(),
        )),
    };

    let uwb: Option<UwbProvider> = match &cfg.decawave_replay {
        Some(path) => Some(Box::new(ReplayProvider::<DwmLocationResponse, _>::open(
            "uwb",
            path,
            DwmLocationResponseCsvConverter,
            pace,
        )?)),
        // A replayed IMU only pairs with a replayed tag.
        None if !cfg.is_simulated() => None,
        None => Some(Box::new(HardwareProvider::new(
            "uwb",
            SimDecawaveDriver::new(cfg.sim_decawave_frequency, DwmPosition::new(0, 0, 0, 100)),
            MonotonicClock::new(),
        ))),
    };

    Ok((imu, uwb))
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn write_default_config() -> config::Config {
    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);
    match config::save(&config::Config::default()) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                    ___          "#.bold().cyan());
    println!("{}", r#"  / _ \___ _  _____ ____ / _ \___  ___ "#.bold().cyan());
    println!("{}", r#" / , _/ _ \ |/ / -_) __// ___/ _ \(_-< "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/___/\__/_/  /_/   \___/___/ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "roverpos".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Rover position and attitude estimation");
    println!();
}

fn print_reports(reports: &[LoopReport]) {
    println!();
    for report in reports {
        let exit = match &report.exit {
            Ok(LoopExit::Shutdown) => "stopped".green(),
            Ok(LoopExit::Exhausted) => "end of recording".green(),
            Ok(other) => format!("{other:?}").yellow(),
            Err(e) => e.to_string().red(),
        };
        println!(
            "  {:<4} {}  received {}  forwarded {}  dropped {}",
            report.stream.bold(),
            exit,
            report.stats.received,
            report.stats.forwarded,
            report.stats.dropped
        );
    }
    println!();
}
