//! Configuration Vault – reads/writes `~/.armpilot/config.toml`.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `ARMPILOT_*`
//! environment variables, command-line flags.  String-typed options
//! (units, joint order, limits) are parsed into typed values once by
//! [`Config::resolve`], before any resource is opened.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use armpilot_hal::RobotIoMode;
use armpilot_policy::ObservationSchema;
use armpilot_runtime::{ActuationErrorPolicy, ActuationLoopConfig, StateNormalizer};
use armpilot_types::{AngleUnit, Interval, JointLimits, JointOrder, PilotError};
use serde::{Deserialize, Serialize};

/// Camera device indices, as enumerated by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraIndices {
    pub top: u32,
    pub wrist: u32,
    pub side: u32,
}

impl Default for CameraIndices {
    fn default() -> Self {
        Self {
            top: 1,
            wrist: 2,
            side: 0,
        }
    }
}

/// Persisted user configuration stored in `~/.armpilot/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Policy server host.
    pub host: String,
    /// Policy server port.
    pub port: u16,
    /// Give up connecting after this many seconds.  Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,

    pub freq_hz: u32,
    /// Rows served per fetched chunk.  Match the model's action horizon.
    pub action_horizon: usize,
    pub action_dim: usize,
    pub prompt: String,
    /// Observation layout sent to the server.
    pub schema: ObservationSchema,

    pub height: u32,
    pub width: u32,
    pub cameras: CameraIndices,
    /// Accept simulated camera frames while a physical arm is attached.
    /// Only simulated frame sources are built in, so `io_mode = "http"`
    /// refuses to start unless this is set.
    pub sim_cameras: bool,

    pub io_mode: RobotIoMode,
    /// REST bridge base URL for `io_mode = "http"`.
    pub http_url: String,
    /// Serial port of the servo bus for `io_mode = "direct"`.
    pub robot_port: String,
    pub robot_id: String,
    /// Servos report and accept degrees for the five arm joints.
    pub use_degrees: bool,

    /// `rad` or `deg`.
    pub state_units: String,
    /// Raw channel feeding each canonical joint, e.g. `"0,1,2,3,4,5"`.
    pub state_order: String,
    /// Five `(lo,hi)` pairs separated by `;`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_joint_limits: Option<String>,
    /// One `(lo,hi)` pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_gripper_limits: Option<String>,

    pub on_actuation_error: ActuationErrorPolicy,
    pub warmup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            connect_timeout_secs: None,
            freq_hz: 30,
            action_horizon: 50,
            action_dim: 6,
            prompt: "Pick up the object".to_string(),
            schema: ObservationSchema::So100,
            height: 224,
            width: 224,
            cameras: CameraIndices::default(),
            sim_cameras: false,
            io_mode: RobotIoMode::None,
            http_url: "http://localhost:80".to_string(),
            robot_port: "/dev/ttyACM0".to_string(),
            robot_id: "so101".to_string(),
            use_degrees: false,
            state_units: AngleUnit::Rad.to_string(),
            state_order: JointOrder::IDENTITY.to_string(),
            state_joint_limits: None,
            state_gripper_limits: None,
            on_actuation_error: ActuationErrorPolicy::Abort,
            warmup: true,
        }
    }
}

/// Typed settings derived from a [`Config`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub connect_max_wait: Option<Duration>,
    pub action_horizon: usize,
    pub action_dim: usize,
    pub height: u32,
    pub width: u32,
    pub io_mode: RobotIoMode,
    pub http_url: String,
    pub robot_port: String,
    pub robot_id: String,
    pub use_degrees: bool,
    pub loop_config: ActuationLoopConfig,
}

impl Config {
    /// Parse every string-typed option and check numeric ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PilotError::Config`] naming the first invalid option.
    pub fn resolve(&self) -> Result<Settings, PilotError> {
        if self.freq_hz == 0 {
            return Err(PilotError::Config("freq_hz must be positive".to_string()));
        }
        if self.action_horizon == 0 {
            return Err(PilotError::Config("action_horizon must be at least 1".to_string()));
        }
        if self.action_dim == 0 {
            return Err(PilotError::Config("action_dim must be at least 1".to_string()));
        }
        if self.height == 0 || self.width == 0 {
            return Err(PilotError::Config("image height and width must be positive".to_string()));
        }
        if self.io_mode == RobotIoMode::Http && !self.sim_cameras {
            return Err(PilotError::Config(
                "io_mode \"http\" drives a physical arm but only simulated cameras are \
                 available; set sim_cameras = true to accept synthetic frames"
                    .to_string(),
            ));
        }

        let units: AngleUnit = self
            .state_units
            .parse()
            .map_err(|e| PilotError::Config(format!("state_units: {e}")))?;
        let order: JointOrder = self
            .state_order
            .parse()
            .map_err(|e| PilotError::Config(format!("state_order: {e}")))?;

        let mut normalizer = StateNormalizer::identity().with_units(units).with_order(order);
        if let Some(raw) = non_empty(&self.state_joint_limits) {
            let limits: JointLimits = raw
                .parse()
                .map_err(|e| PilotError::Config(format!("state_joint_limits: {e}")))?;
            normalizer = normalizer.with_joint_limits(limits);
        }
        if let Some(raw) = non_empty(&self.state_gripper_limits) {
            let limits: Interval = raw
                .parse()
                .map_err(|e| PilotError::Config(format!("state_gripper_limits: {e}")))?;
            normalizer = normalizer.with_gripper_limits(limits);
        }

        Ok(Settings {
            server_url: format!("ws://{}:{}", self.host, self.port),
            connect_max_wait: self.connect_timeout_secs.map(Duration::from_secs),
            action_horizon: self.action_horizon,
            action_dim: self.action_dim,
            height: self.height,
            width: self.width,
            io_mode: self.io_mode,
            http_url: self.http_url.clone(),
            robot_port: self.robot_port.clone(),
            robot_id: self.robot_id.clone(),
            use_degrees: self.use_degrees,
            loop_config: ActuationLoopConfig {
                freq_hz: self.freq_hz,
                schema: self.schema,
                prompt: self.prompt.clone(),
                normalizer,
                on_actuation_error: self.on_actuation_error,
                warmup: self.warmup,
                max_ticks: None,
            },
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Return the path to `~/.armpilot/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armpilot").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, PilotError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        PilotError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| PilotError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `ARMPILOT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMPILOT_HOST` | `host` |
/// | `ARMPILOT_PORT` | `port` |
/// | `ARMPILOT_FREQ_HZ` | `freq_hz` |
/// | `ARMPILOT_ACTION_HORIZON` | `action_horizon` |
/// | `ARMPILOT_IO_MODE` | `io_mode` |
/// | `ARMPILOT_HTTP_URL` | `http_url` |
/// | `ARMPILOT_PROMPT` | `prompt` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("ARMPILOT_HOST") {
        cfg.host = v;
    }
    if let Some(port) = var("ARMPILOT_PORT").and_then(|v| v.parse().ok()) {
        cfg.port = port;
    }
    if let Some(hz) = var("ARMPILOT_FREQ_HZ").and_then(|v| v.parse().ok()) {
        cfg.freq_hz = hz;
    }
    if let Some(h) = var("ARMPILOT_ACTION_HORIZON").and_then(|v| v.parse().ok()) {
        cfg.action_horizon = h;
    }
    if let Some(mode) = var("ARMPILOT_IO_MODE").and_then(|v| v.parse().ok()) {
        cfg.io_mode = mode;
    }
    if let Some(v) = var("ARMPILOT_HTTP_URL") {
        cfg.http_url = v;
    }
    if let Some(v) = var("ARMPILOT_PROMPT") {
        cfg.prompt = v;
    }
}

/// Save the config to a specific path, creating the parent directory if
/// necessary.  On Unix the directory is `0o700` and the file `0o600`.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), PilotError> {
    let io_err = |what: &str, e: std::io::Error| {
        PilotError::Config(format!("failed to {what} {}: {e}", path.display()))
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("restrict directory of", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| PilotError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err("write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("write", e))?;
    Ok(())
}
