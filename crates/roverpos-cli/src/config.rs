//! Configuration Vault – reads/writes `~/.roverpos/config.toml`.

use roverpos_hal::ReplayPace;
use roverpos_runtime::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How recorded sensor files are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Reproduce the recorded gaps between samples.
    #[default]
    Realtime,
    /// As fast as the pipeline keeps up.
    Fast,
}

impl From<ReplayMode> for ReplayPace {
    fn from(mode: ReplayMode) -> Self {
        match mode {
            ReplayMode::Realtime => ReplayPace::RealTime,
            ReplayMode::Fast => ReplayPace::Fast,
        }
    }
}

impl FromStr for ReplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realtime" => Ok(ReplayMode::Realtime),
            "fast" => Ok(ReplayMode::Fast),
            other => Err(format!("unknown replay pace '{other}'")),
        }
    }
}

/// Persisted configuration stored in `~/.roverpos/config.toml`.
///
/// With no replay file configured the IMU and UWB tag are simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Standard gravity used to convert accelerations to m/s².
    #[serde(default = "default_g")]
    pub g: f64,

    /// How long a provider poll may block before the loop re-checks its
    /// flags.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default)]
    pub replay_pace: ReplayMode,

    /// IMU recording (`imu_data.csv` format) to replay instead of a live IMU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imu_replay: Option<PathBuf>,

    /// UWB recording (`absolute_position_data.csv` format) to replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decawave_replay: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imu_calibration: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decawave_calibration: Option<PathBuf>,

    /// UWB range correction applied before trilateration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_calibration: Option<PathBuf>,

    /// Module temperature assumed by the range correction, °C.
    #[serde(default = "default_decawave_temperature")]
    pub decawave_temperature: f64,

    /// Directory recordings are written to.
    #[serde(default = "default_record_dir")]
    pub record_dir: PathBuf,

    #[serde(default = "default_heading_topic")]
    pub heading_topic: String,

    /// Heading publish rate in Hz when the command does not name one.
    #[serde(default = "default_heading_frequency")]
    pub heading_frequency: f64,

    /// Gyro weight of the complementary attitude filter, 0..=1.
    #[serde(default = "default_attitude_alpha")]
    pub attitude_alpha: f64,

    /// Weight of each UWB fix against the dead-reckoned position, 0..=1.
    #[serde(default = "default_position_alpha")]
    pub position_alpha: f64,

    /// Messages buffered on the in-process bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default = "default_true")]
    pub track_on_start: bool,

    #[serde(default = "default_sim_imu_frequency")]
    pub sim_imu_frequency: f64,

    #[serde(default = "default_sim_decawave_frequency")]
    pub sim_decawave_frequency: f64,
}

fn default_g() -> f64 {
    9.80665
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_record_dir() -> PathBuf {
    PathBuf::from("recordings")
}
fn default_heading_topic() -> String {
    roverpos_runtime::service::DEFAULT_HEADING_TOPIC.to_string()
}
fn default_heading_frequency() -> f64 {
    10.0
}
fn default_attitude_alpha() -> f64 {
    0.98
}
fn default_position_alpha() -> f64 {
    0.2
}
fn default_decawave_temperature() -> f64 {
    20.0
}
fn default_bus_capacity() -> usize {
    256
}
fn default_true() -> bool {
    true
}
fn default_sim_imu_frequency() -> f64 {
    50.0
}
fn default_sim_decawave_frequency() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            g: default_g(),
            poll_timeout_ms: default_poll_timeout_ms(),
            replay_pace: ReplayMode::default(),
            imu_replay: None,
            decawave_replay: None,
            imu_calibration: None,
            decawave_calibration: None,
            range_calibration: None,
            decawave_temperature: default_decawave_temperature(),
            record_dir: default_record_dir(),
            heading_topic: default_heading_topic(),
            heading_frequency: default_heading_frequency(),
            attitude_alpha: default_attitude_alpha(),
            position_alpha: default_position_alpha(),
            bus_capacity: default_bus_capacity(),
            track_on_start: default_true(),
            sim_imu_frequency: default_sim_imu_frequency(),
            sim_decawave_frequency: default_sim_decawave_frequency(),
        }
    }
}

impl Config {
    /// Whether sensors are simulated rather than replayed.
    pub fn is_simulated(&self) -> bool {
        self.imu_replay.is_none()
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            g: self.g,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms.max(1)),
            attitude_alpha: self.attitude_alpha,
            position_fix_weight: self.position_alpha,
            heading_topic: self.heading_topic.clone(),
            heading_frequency: self.heading_frequency,
            record_dir: self.record_dir.clone(),
            imu_calibration: self.imu_calibration.clone(),
            decawave_calibration: self.decawave_calibration.clone(),
            range_calibration: self.range_calibration.clone(),
            decawave_temperature: self.decawave_temperature,
            track_on_start: self.track_on_start,
        }
    }
}

/// Return the config path: `$ROVERPOS_CONFIG`, else `~/.roverpos/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROVERPOS_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".roverpos").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

/// Apply `ROVERPOS_*` environment variable overrides to `cfg`. Values that
/// do not parse are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVERPOS_G` | `g` |
/// | `ROVERPOS_POLL_TIMEOUT_MS` | `poll_timeout_ms` |
/// | `ROVERPOS_REPLAY_PACE` | `replay_pace` |
/// | `ROVERPOS_IMU_REPLAY` | `imu_replay` |
/// | `ROVERPOS_DECAWAVE_REPLAY` | `decawave_replay` |
/// | `ROVERPOS_RECORD_DIR` | `record_dir` |
/// | `ROVERPOS_HEADING_TOPIC` | `heading_topic` |
/// | `ROVERPOS_HEADING_FREQUENCY` | `heading_frequency` |
/// | `ROVERPOS_BUS_CAPACITY` | `bus_capacity` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(g) = env_parsed::<f64>("ROVERPOS_G")
        && g.is_finite()
        && g > 0.0
    {
        cfg.g = g;
    }
    if let Some(ms) = env_parsed("ROVERPOS_POLL_TIMEOUT_MS") {
        cfg.poll_timeout_ms = ms;
    }
    if let Some(pace) = env_parsed("ROVERPOS_REPLAY_PACE") {
        cfg.replay_pace = pace;
    }
    if let Ok(v) = std::env::var("ROVERPOS_IMU_REPLAY") {
        cfg.imu_replay = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ROVERPOS_DECAWAVE_REPLAY") {
        cfg.decawave_replay = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ROVERPOS_RECORD_DIR") {
        cfg.record_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ROVERPOS_HEADING_TOPIC") {
        cfg.heading_topic = v;
    }
    if let Some(hz) = env_parsed("ROVERPOS_HEADING_FREQUENCY") {
        cfg.heading_frequency = hz;
    }
    if let Some(capacity) = env_parsed("ROVERPOS_BUS_CAPACITY") {
        cfg.bus_capacity = capacity;
    }
}

/// Save the config to disk, creating `~/.roverpos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix; the file names local devices.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.imu_replay = Some(PathBuf::from("/data/imu_data.csv"));
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.poll_timeout_ms, 100);
        assert_eq!(loaded.attitude_alpha, 0.98);
        assert!(loaded.track_on_start);
        assert_eq!(loaded.imu_replay.as_deref(), Some(std::path::Path::new("/data/imu_data.csv")));
        assert!(loaded.decawave_replay.is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "replay_pace = \"fast\"\nsim_imu_frequency = 20.0\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.replay_pace, ReplayMode::Fast);
        assert_eq!(loaded.sim_imu_frequency, 20.0);
        assert_eq!(loaded.position_alpha, 0.2);
        assert_eq!(ReplayPace::from(loaded.replay_pace), ReplayPace::Fast);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "replay_pace = \"sideways\"\n").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_roverpos_dir() {
        let p = config_path_for_home("/home/rover");
        assert!(p.to_string_lossy().contains(".roverpos"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn service_config_carries_tuning() {
        let cfg = Config {
            poll_timeout_ms: 0,
            position_alpha: 0.5,
            range_calibration: Some(PathBuf::from("range.json")),
            decawave_temperature: 31.5,
            ..Config::default()
        };
        let service = cfg.service_config();
        assert_eq!(service.poll_timeout, Duration::from_millis(1));
        assert_eq!(service.position_fix_weight, 0.5);
        assert_eq!(service.record_dir, PathBuf::from("recordings"));
        assert_eq!(service.range_calibration, Some(PathBuf::from("range.json")));
        assert_eq!(service.decawave_temperature, 31.5);
    }

    #[test]
    fn apply_env_overrides_changes_g() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERPOS_G", "9.81") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.g, 9.81);
        unsafe { std::env::remove_var("ROVERPOS_G") };
    }

    #[test]
    fn apply_env_overrides_changes_heading_topic() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERPOS_HEADING_TOPIC", "rover/heading") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.heading_topic, "rover/heading");
        unsafe { std::env::remove_var("ROVERPOS_HEADING_TOPIC") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_capacity() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERPOS_BUS_CAPACITY", "lots") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bus_capacity, 256);
        unsafe { std::env::remove_var("ROVERPOS_BUS_CAPACITY") };
    }

    #[test]
    fn apply_env_overrides_changes_replay_pace() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ROVERPOS_REPLAY_PACE", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.replay_pace, ReplayMode::Fast);
        unsafe { std::env::remove_var("ROVERPOS_REPLAY_PACE") };
    }
}
