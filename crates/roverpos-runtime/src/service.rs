//! [`PositionService`] – the rover position pipeline.
//!
//! ```text
//! imu ─► imu_raw ─► scale ─► imu_scaled ─► attitude ─► attitude tap ─┐
//!                                                                   ├─► position ─► position tap
//! uwb ─► decawave ─► trilaterate ─► to vector ─► absolute_raw ─► rotate ─► absolute_scaled ┘
//! ```
//!
//! Every `tap` is a [`FanOutFilter`]; publishers and recorders are branches
//! attached to it at runtime by bus commands. The two halves of the
//! position merge are branches too, switched together by `track/start`
//! and `track/stop`.
//!
//! # Commands
//!
//! Commands arrive on `position/command/<name>` with an optional JSON
//! [`ToggleOptions`] payload:
//!
//! | Name | Effect |
//! |---|---|
//! | `quit` | stop serving |
//! | `pause`, `resume` | discard samples without stopping the loops |
//! | `calibrate` | recalibrate the IMU from the next `samples` stationary samples |
//! | `track/start`, `track/stop` | reset and attach / detach position tracking |
//! | `heading/start`, `heading/stop` | 17-byte heading frames |
//! | `attitude/publish/...`, `attitude/record/...` | attitude telemetry |
//! | `position/publish/...`, `position/record/...` | position telemetry |
//! | `absolute/publish/...`, `absolute/record/...` | UWB telemetry |
//! | `data/publish/...`, `data/record/...` | IMU telemetry |
//! | `imu/calibration/save`, `imu/calibration/load` | calibration files |

use std::collections::BTreeMap;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use roverpos_filters::{
    AttitudeFilter, AttitudeOutputToPositionInputFilter, AttitudeToHeadingBytesFilter, Chain, DataFilter,
    DecawaveToPositionInputFilter, DecawaveToVectorFilter, DecawaveTrilaterationFilter, FanOutFilter,
    FanOutHandle, ImuCalibrationFilter, PositionFilter, PublishBytesFilter, PublishFilter, SamplingFilter,
    ScalingFilter, SharedFilter, ToCsvFilter,
};
use roverpos_hal::DataProvider;
use roverpos_middleware::{CONTROL_PREFIX, EventBus, Publisher};
use roverpos_perception::{
    ComplementaryAttitudeAlgorithm, DeadReckoningPositionAlgorithm, DecawaveRangeScaler, ImuScaler, RotationScaler,
    SharedScaler,
};
use roverpos_record::{
    AttitudeOutputCsvConverter, CsvConverter, DwmLocationResponseCsvConverter, NineDoFDataCsvConverter,
    PositionCsvConverter,
};
use roverpos_types::{
    AttitudeOutput, DwmLocationResponse, NineDoFData, Payload, Position, PositionInput, RoverError, Vector,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::provider_loop::{LoopControl, LoopExit, LoopHandle, LoopStats, ProviderLoop, DEFAULT_POLL_TIMEOUT};
use crate::toggle::{BranchBuilder, FilterToggle, Toggle, ToggleGroup, ToggleOptions};

/// Commands travel on the bus's control channel, apart from telemetry.
pub const COMMAND_PREFIX: &str = CONTROL_PREFIX;

pub const IMU_RAW_TOPIC: &str = "data/imu/raw";
pub const IMU_SCALED_TOPIC: &str = "data/imu/scaled";
pub const ATTITUDE_TOPIC: &str = "data/attitude";
pub const ABSOLUTE_RAW_TOPIC: &str = "data/absolute/raw";
pub const ABSOLUTE_SCALED_TOPIC: &str = "data/absolute/scaled";
pub const POSITION_TOPIC: &str = "data/position";
pub const DEFAULT_HEADING_TOPIC: &str = "//sensor/heading/data";

/// Publish rate when a command does not name one.
const DEFAULT_PUBLISH_FREQUENCY: f64 = 1.0;

/// Stationary samples a `calibrate` command averages when it does not name
/// a count.
const DEFAULT_CALIBRATION_SAMPLES: usize = 100;

/// How often [`PositionService::serve`] checks for shutdown.
const SERVE_TICK: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Standard gravity, m/s².
    pub g: f64,
    pub poll_timeout: Duration,
    /// Gyro weight of the complementary attitude filter.
    pub attitude_alpha: f64,
    /// How far each UWB fix pulls the dead-reckoned position.
    pub position_fix_weight: f64,
    pub heading_topic: String,
    pub heading_frequency: f64,
    /// Where recordings are written.
    pub record_dir: PathBuf,
    pub imu_calibration: Option<PathBuf>,
    pub decawave_calibration: Option<PathBuf>,
    /// Correction applied to each UWB range before trilateration.
    pub range_calibration: Option<PathBuf>,
    /// Module temperature assumed for the range drift correction, °C.
    pub decawave_temperature: f64,
    /// Attach position tracking as soon as the service starts.
    pub track_on_start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            g: 9.80665,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            attitude_alpha: 0.98,
            position_fix_weight: 0.2,
            heading_topic: DEFAULT_HEADING_TOPIC.to_string(),
            heading_frequency: 10.0,
            record_dir: PathBuf::from("."),
            imu_calibration: None,
            decawave_calibration: None,
            range_calibration: None,
            decawave_temperature: 20.0,
            track_on_start: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Pause,
    Resume,
    TrackStart,
    TrackStop,
    SaveCalibration,
    LoadCalibration,
    Start(&'a str),
    Stop(&'a str),
}

impl<'a> Command<'a> {
    fn parse(name: &'a str) -> Result<Self, RoverError> {
        let command = match name {
            "quit" => Command::Quit,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "track/start" => Command::TrackStart,
            "track/stop" => Command::TrackStop,
            "imu/calibration/save" => Command::SaveCalibration,
            "imu/calibration/load" => Command::LoadCalibration,
            "calibrate" => Command::Start("calibrate"),
            _ => match name.rsplit_once('/') {
                Some((branch, "start")) => Command::Start(branch),
                Some((branch, "stop")) => Command::Stop(branch),
                _ => return Err(RoverError::Validation(format!("unknown command '{name}'"))),
            },
        };
        Ok(command)
    }
}

/// Whether [`PositionService::serve`] keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// How one provider loop ended.
#[derive(Debug)]
pub struct LoopReport {
    pub stream: String,
    pub exit: Result<LoopExit, RoverError>,
    pub stats: LoopStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// PositionService
// ─────────────────────────────────────────────────────────────────────────────

pub struct PositionService {
    config: ServiceConfig,
    bus: EventBus,
    control: LoopControl,
    loops: Vec<LoopHandle>,
    toggles: BTreeMap<&'static str, Box<dyn Toggle>>,
    tracking: ToggleGroup,
    position: SharedFilter<PositionFilter>,
    imu_scaler: SharedScaler<ImuScaler>,
    rotation_scaler: SharedScaler<RotationScaler>,
}

/// The taps branches attach to.
struct Taps {
    imu_raw: FanOutHandle<NineDoFData>,
    imu_scaled: FanOutHandle<NineDoFData>,
    attitude: FanOutHandle<AttitudeOutput>,
    decawave: FanOutHandle<DwmLocationResponse>,
    absolute_raw: FanOutHandle<Vector>,
    absolute_scaled: FanOutHandle<Vector>,
    position: FanOutHandle<Position>,
}

impl PositionService {
    /// Build the pipeline and start one polling loop per provider.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Io`] when a loop thread cannot be spawned or a
    /// configured calibration file exists but cannot be read.
    pub fn start(
        config: ServiceConfig,
        bus: EventBus,
        imu: Box<dyn DataProvider<NineDoFData>>,
        uwb: Option<Box<dyn DataProvider<DwmLocationResponse>>>,
    ) -> Result<Self, RoverError> {
        let imu_scaler = SharedScaler::new(load_or_identity(config.imu_calibration.as_deref(), |path| ImuScaler::load(path))?);
        let rotation_scaler = SharedScaler::new(load_or_identity(
            config.decawave_calibration.as_deref(),
            |path| RotationScaler::load(path),
        )?);
        let range_scaler = load_or_identity(config.range_calibration.as_deref(), |path| DecawaveRangeScaler::load(path))?;

        // IMU half.
        let attitude_tap = FanOutFilter::<AttitudeOutput>::new("attitude");
        let imu_scaled = FanOutFilter::<NineDoFData>::new("imu_scaled");
        let imu_raw = FanOutFilter::<NineDoFData>::new("imu_raw");
        let attitude_handle = attitude_tap.handle();
        let imu_scaled_handle = imu_scaled.handle();
        let imu_raw_handle = imu_raw.handle();
        let imu_head = imu_raw.then(
            ScalingFilter::<NineDoFData>::new(imu_scaler.clone())
                .named("imu_scaling")
                .then(imu_scaled.then(
                    AttitudeFilter::new(ComplementaryAttitudeAlgorithm::new(config.attitude_alpha)).then(attitude_tap),
                )),
        );

        // UWB half.
        let absolute_scaled = FanOutFilter::<Vector>::new("absolute_scaled");
        let absolute_raw = FanOutFilter::<Vector>::new("absolute_raw");
        let decawave = FanOutFilter::<DwmLocationResponse>::new("decawave");
        let absolute_scaled_handle = absolute_scaled.handle();
        let absolute_raw_handle = absolute_raw.handle();
        let decawave_handle = decawave.handle();
        let uwb_head = decawave.then(
            DecawaveTrilaterationFilter::new(range_scaler)
                .with_temperatures(config.decawave_temperature, config.decawave_temperature)
                .then(DecawaveToVectorFilter::new().then(
                    absolute_raw.then(
                        ScalingFilter::<Vector>::new(rotation_scaler.clone())
                            .named("absolute_rotation")
                            .then(absolute_scaled),
                    ),
                )),
        );

        // Merge point.
        let position_tap = FanOutFilter::<Position>::new("position");
        let position_handle = position_tap.handle();
        let position = SharedFilter::new::<PositionInput>(
            PositionFilter::new(DeadReckoningPositionAlgorithm::new(config.g, config.position_fix_weight))
                .then(position_tap),
        );

        let taps = Taps {
            imu_raw: imu_raw_handle,
            imu_scaled: imu_scaled_handle,
            attitude: attitude_handle,
            decawave: decawave_handle,
            absolute_raw: absolute_raw_handle,
            absolute_scaled: absolute_scaled_handle,
            position: position_handle,
        };
        let tracking = tracking_group(&taps, &position, config.g);
        let toggles = branch_toggles(&taps, &bus, &config, &imu_scaler);

        let mut service = Self {
            config: config.clone(),
            bus,
            control: LoopControl::new(),
            loops: Vec::new(),
            toggles,
            tracking,
            position,
            imu_scaler,
            rotation_scaler,
        };

        if config.track_on_start {
            service.tracking.start(&ToggleOptions::default())?;
        }

        let imu_loop = ProviderLoop::new("imu", imu, Box::new(imu_head))
            .with_poll_timeout(config.poll_timeout)
            .with_control(service.control.clone());
        service.loops.push(imu_loop.spawn().map_err(|e| RoverError::io("loop-imu", e))?);

        if let Some(uwb) = uwb {
            let uwb_loop = ProviderLoop::new("uwb", uwb, Box::new(uwb_head))
                .with_poll_timeout(config.poll_timeout)
                .with_control(service.control.clone());
            // Dropping the service on error shuts the IMU loop down.
            service.loops.push(uwb_loop.spawn().map_err(|e| RoverError::io("loop-uwb", e))?);
        }

        info!(
            loops = service.loops.len(),
            tracking = service.tracking.is_active(),
            "position service started"
        );
        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Apply one command. `name` is the topic with [`COMMAND_PREFIX`]
    /// stripped.
    ///
    /// # Errors
    ///
    /// - [`RoverError::Validation`] for an unknown command or branch, or
    ///   invalid options.
    /// - [`RoverError::Serialization`] for a payload that is not valid
    ///   options JSON.
    /// - [`RoverError::Io`] when a recording or calibration file fails.
    pub fn handle_command(&self, name: &str, payload: &Payload) -> Result<Flow, RoverError> {
        let command = Command::parse(name)?;
        debug!(?command, "command received");
        match command {
            Command::Quit => return Ok(Flow::Quit),
            Command::Pause => {
                self.control.pause();
                info!("paused");
            }
            Command::Resume => {
                self.control.resume();
                info!("resumed");
            }
            Command::TrackStart => {
                let options = ToggleOptions::from_payload(payload)?;
                self.tracking.stop();
                self.position.with(|filter| filter.reset());
                self.tracking.start(&options)?;
                info!("tracking started");
            }
            Command::TrackStop => {
                self.tracking.stop();
                for key in ["position/publish", "position/record"] {
                    if let Some(toggle) = self.toggles.get(key) {
                        toggle.stop();
                    }
                }
                info!("tracking stopped");
            }
            Command::SaveCalibration => self.save_calibration()?,
            Command::LoadCalibration => self.load_calibration()?,
            Command::Start(branch) => {
                let options = ToggleOptions::from_payload(payload)?;
                self.toggle(branch)?.start(&options)?;
            }
            Command::Stop(branch) => {
                if !self.toggle(branch)?.stop() {
                    debug!(branch, "stop for inactive branch");
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn toggle(&self, branch: &str) -> Result<&dyn Toggle, RoverError> {
        self.toggles
            .get(branch)
            .map(|toggle| toggle.as_ref())
            .ok_or_else(|| RoverError::Validation(format!("unknown branch '{branch}'")))
    }

    /// Whether the branch behind a command name such as `"heading"` or
    /// `"track"` is attached.
    pub fn is_active(&self, branch: &str) -> bool {
        if branch == "track" {
            return self.tracking.is_active();
        }
        self.toggles.get(branch).is_some_and(|toggle| toggle.is_active())
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn loop_stats(&self) -> Vec<(String, LoopStats)> {
        self.loops
            .iter()
            .map(|handle| (handle.stream().to_string(), handle.stats()))
            .collect()
    }

    fn save_calibration(&self) -> Result<(), RoverError> {
        let (imu, decawave) = self.calibration_paths()?;
        if let Some(path) = imu {
            self.imu_scaler.read(|scaler| scaler.save(path))?;
            info!(path = %path.display(), "imu calibration saved");
        }
        if let Some(path) = decawave {
            self.rotation_scaler.read(|scaler| scaler.save(path))?;
            info!(path = %path.display(), "rotation calibration saved");
        }
        Ok(())
    }

    fn load_calibration(&self) -> Result<(), RoverError> {
        let (imu, decawave) = self.calibration_paths()?;
        if let Some(path) = imu {
            self.imu_scaler.replace(ImuScaler::load(path)?);
        }
        if let Some(path) = decawave {
            self.rotation_scaler.replace(RotationScaler::load(path)?);
        }
        Ok(())
    }

    fn calibration_paths(&self) -> Result<(Option<&Path>, Option<&Path>), RoverError> {
        let imu = self.config.imu_calibration.as_deref();
        let decawave = self.config.decawave_calibration.as_deref();
        if imu.is_none() && decawave.is_none() {
            return Err(RoverError::Validation("no calibration file configured".into()));
        }
        Ok((imu, decawave))
    }

    /// Listen for commands until `quit`, `shutdown` becomes true, or every
    /// provider loop has stopped.
    pub async fn serve(&self, shutdown: &AtomicBool) {
        let mut commands = self.bus.subscribe_topic(COMMAND_PREFIX);
        let mut tick = tokio::time::interval(SERVE_TICK);
        info!(prefix = COMMAND_PREFIX, "listening for commands");
        loop {
            tokio::select! {
                message = commands.recv() => {
                    let Some(message) = message else {
                        warn!("bus closed");
                        break;
                    };
                    let name = message.topic.strip_prefix(COMMAND_PREFIX).unwrap_or(&message.topic);
                    match self.handle_command(name, &message.payload) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => {
                            info!("quit received");
                            break;
                        }
                        Err(e) => warn!(command = name, error = %e, "command rejected"),
                    }
                }
                _ = tick.tick() => {
                    if shutdown.load(Ordering::SeqCst) {
                        info!("shutdown requested");
                        break;
                    }
                    if self.loops.iter().all(LoopHandle::is_finished) {
                        warn!("every provider loop has stopped");
                        break;
                    }
                }
            }
        }
    }

    /// Stop the loops, then every branch, flushing open recordings.
    pub fn shutdown(mut self) -> Vec<LoopReport> {
        self.control.shutdown();
        let reports: Vec<LoopReport> = mem::take(&mut self.loops)
            .into_iter()
            .map(|handle| {
                let stream = handle.stream().to_string();
                let monitor = handle.monitor();
                let exit = handle.join();
                LoopReport {
                    stream,
                    exit,
                    stats: monitor.snapshot(),
                }
            })
            .collect();

        for toggle in self.toggles.values() {
            toggle.stop();
        }
        self.tracking.stop();
        DataFilter::<PositionInput>::close(&mut self.position);
        info!(loops = reports.len(), "position service stopped");
        reports
    }
}

impl Drop for PositionService {
    fn drop(&mut self) {
        self.control.shutdown();
    }
}

fn load_or_identity<S: Default>(
    path: Option<&Path>,
    load: impl FnOnce(&Path) -> Result<S, RoverError>,
) -> Result<S, RoverError> {
    match path {
        Some(path) if path.exists() => load(path),
        Some(path) => {
            warn!(path = %path.display(), "calibration file missing, using identity");
            Ok(S::default())
        }
        None => Ok(S::default()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Branches
// ─────────────────────────────────────────────────────────────────────────────

fn tracking_group(taps: &Taps, position: &SharedFilter<PositionFilter>, g: f64) -> ToggleGroup {
    let from_attitude = position.factory();
    let from_absolute = position.factory();
    ToggleGroup::new(
        "track",
        vec![
            Box::new(FilterToggle::new(
                "tracking",
                taps.attitude.clone(),
                builder::<AttitudeOutput, _>(move |_| {
                    Ok(Box::new(
                        AttitudeOutputToPositionInputFilter::new(g).then(from_attitude.clone()),
                    ))
                }),
            )),
            Box::new(FilterToggle::new(
                "tracking",
                taps.absolute_scaled.clone(),
                builder::<Vector, _>(move |_| {
                    Ok(Box::new(DecawaveToPositionInputFilter::new().then(from_absolute.clone())))
                }),
            )),
        ],
    )
}

fn branch_toggles(
    taps: &Taps,
    bus: &EventBus,
    config: &ServiceConfig,
    imu_scaler: &SharedScaler<ImuScaler>,
) -> BTreeMap<&'static str, Box<dyn Toggle>> {
    let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());
    let dir = &config.record_dir;
    let mut toggles: BTreeMap<&'static str, Box<dyn Toggle>> = BTreeMap::new();

    // Closes itself once calibrated, so a later `calibrate` starts afresh.
    let scaler = imu_scaler.clone();
    toggles.insert(
        "calibrate",
        Box::new(FilterToggle::new(
            "calibrate",
            taps.imu_raw.clone(),
            builder::<NineDoFData, _>(move |options| {
                let samples = options.samples.unwrap_or(DEFAULT_CALIBRATION_SAMPLES);
                Ok(Box::new(ImuCalibrationFilter::new(scaler.clone(), samples)?))
            }),
        )),
    );

    let heading_publisher = Arc::clone(&publisher);
    let heading_topic = config.heading_topic.clone();
    let heading_frequency = config.heading_frequency;
    toggles.insert(
        "heading",
        Box::new(FilterToggle::new(
            "heading",
            taps.attitude.clone(),
            builder::<AttitudeOutput, _>(move |options| {
                let topic = options.topic.clone().unwrap_or_else(|| heading_topic.clone());
                Ok(Box::new(
                    SamplingFilter::<AttitudeOutput>::new(options.frequency_or(heading_frequency))?.then(
                        AttitudeToHeadingBytesFilter::new()
                            .then(PublishBytesFilter::new(Arc::clone(&heading_publisher), topic)),
                    ),
                ))
            }),
        )),
    );

    toggles.insert(
        "attitude/publish",
        Box::new(FilterToggle::new(
            "attitude/publish",
            taps.attitude.clone(),
            publish_branch::<AttitudeOutput>(&publisher, ATTITUDE_TOPIC, true),
        )),
    );
    toggles.insert(
        "attitude/record",
        Box::new(FilterToggle::new(
            "attitude/record",
            taps.attitude.clone(),
            record_branch(dir, "attitude_output.csv", AttitudeOutputCsvConverter),
        )),
    );
    toggles.insert(
        "position/publish",
        Box::new(FilterToggle::new(
            "position/publish",
            taps.position.clone(),
            publish_branch::<Position>(&publisher, POSITION_TOPIC, true),
        )),
    );
    toggles.insert(
        "position/record",
        Box::new(FilterToggle::new(
            "position/record",
            taps.position.clone(),
            record_branch(dir, "position_output.csv", PositionCsvConverter),
        )),
    );
    toggles.insert(
        "absolute/publish",
        Box::new(ToggleGroup::new(
            "absolute/publish",
            vec![
                Box::new(FilterToggle::new(
                    "absolute/publish",
                    taps.absolute_raw.clone(),
                    publish_branch::<Vector>(&publisher, ABSOLUTE_RAW_TOPIC, false),
                )),
                Box::new(FilterToggle::new(
                    "absolute/publish",
                    taps.absolute_scaled.clone(),
                    publish_branch::<Vector>(&publisher, ABSOLUTE_SCALED_TOPIC, false),
                )),
            ],
        )),
    );
    toggles.insert(
        "absolute/record",
        Box::new(FilterToggle::new(
            "absolute/record",
            taps.decawave.clone(),
            record_branch(dir, "absolute_position_data.csv", DwmLocationResponseCsvConverter),
        )),
    );
    toggles.insert(
        "data/publish",
        Box::new(ToggleGroup::new(
            "data/publish",
            vec![
                Box::new(FilterToggle::new(
                    "data/publish",
                    taps.imu_raw.clone(),
                    publish_branch::<NineDoFData>(&publisher, IMU_RAW_TOPIC, false),
                )),
                Box::new(FilterToggle::new(
                    "data/publish",
                    taps.imu_scaled.clone(),
                    publish_branch::<NineDoFData>(&publisher, IMU_SCALED_TOPIC, false),
                )),
            ],
        )),
    );
    toggles.insert(
        "data/record",
        Box::new(FilterToggle::new(
            "data/record",
            taps.imu_raw.clone(),
            record_branch(dir, "imu_data.csv", NineDoFDataCsvConverter),
        )),
    );
    toggles
}

fn builder<T, F>(build: F) -> BranchBuilder<T>
where
    F: Fn(&ToggleOptions) -> Result<Box<dyn DataFilter<T>>, RoverError> + Send + Sync + 'static,
{
    Box::new(build)
}

/// Sampled JSON publisher. Grouped publishers share one options payload,
/// so only a lone publisher honours a topic override.
fn publish_branch<T: Serialize + Send + 'static>(
    publisher: &Arc<dyn Publisher>,
    default_topic: &'static str,
    topic_override: bool,
) -> BranchBuilder<T> {
    let publisher = Arc::clone(publisher);
    builder::<T, _>(move |options| {
        let topic = match &options.topic {
            Some(topic) if topic_override => topic.clone(),
            _ => default_topic.to_string(),
        };
        Ok(Box::new(
            SamplingFilter::<T>::new(options.frequency_or(DEFAULT_PUBLISH_FREQUENCY))?
                .then(PublishFilter::new(Arc::clone(&publisher), topic)),
        ))
    })
}

/// Unsampled CSV recorder writing into `dir`.
fn record_branch<T, C>(dir: &Path, default_file: &'static str, converter: C) -> BranchBuilder<T>
where
    T: Send + 'static,
    C: CsvConverter<T> + Clone + Sync + 'static,
{
    let dir = dir.to_path_buf();
    builder::<T, _>(move |options| {
        let file = options.filename.as_deref().unwrap_or(default_file);
        if Path::new(file).file_name().is_none_or(|name| name != file) {
            return Err(RoverError::Validation(format!("recording file name '{file}' must not contain a path")));
        }
        std::fs::create_dir_all(&dir).map_err(|e| RoverError::io(dir.display().to_string(), e))?;
        let recorder = ToCsvFilter::<T, C>::create(dir.join(file), converter.clone())?.with_duration(options.duration);
        Ok(Box::new(recorder))
    })
}
