//! Configuration types for the Robofocus driver.
//!
//! Two JSON documents are kept on disk: [`Config`] (deployment-level
//! settings supplied at startup — serial port, server ports, device
//! identity) and [`UserSettings`] (runtime-adjustable state the GUI can
//! change and that should survive a restart — last COM port used, travel
//! limits, backlash, operating mode). Both are created with sensible
//! defaults the first time the driver runs against a path that doesn't
//! exist yet.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobofocusError};

/// Top-level configuration loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub serial: SerialConfig,
    pub server: ServerConfig,
    pub focuser: FocuserConfig,
    pub gui: GuiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Serial port configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout")]
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_poll_interval")]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Offer a port picked by auto-scan as the default in the GUI instead of
    /// requiring the operator to type one in.
    #[serde(default)]
    pub auto_discover: bool,
    /// Upper bound on how long `/gui/scan` spends probing candidate ports.
    #[serde(default = "default_scan_timeout")]
    #[serde(with = "humantime_serde")]
    pub scan_timeout: Duration,
}

/// ASCOM Alpaca HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_ip")]
    pub ip: String,
    pub port: u16,
    /// Whether the Alpaca discovery beacon on UDP 32227 should be live.
    ///
    /// `ascom-alpaca`'s `Server` owns the beacon itself and doesn't
    /// expose a documented opt-out in
    /// this crate's retrieved sources, so this flag is schema-only for now:
    /// it round-trips through the config file so operators can record their
    /// intent, and is logged at startup, but does not yet suppress the
    /// beacon. See DESIGN.md.
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,
}

/// Driver-specific GUI HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuiConfig {
    pub port: u16,
}

/// Focuser device identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocuserConfig {
    pub name: String,
    pub unique_id: String,
    pub description: String,
    #[serde(default)]
    pub device_number: u32,
    /// Step size in micrometers, reported verbatim as ASCOM `StepSize`.
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Cadence knobs for the controller's cache-refresh behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// How long a cached position is trusted before `get_position()` forces
    /// a fresh `FG` query.
    #[serde(default = "default_idle_refresh")]
    #[serde(with = "humantime_serde")]
    pub idle_refresh_interval: Duration,
    /// How often the motion monitor refreshes temperature while idle.
    #[serde(default = "default_temperature_interval")]
    #[serde(with = "humantime_serde")]
    pub temperature_interval: Duration,
    /// Motion-monitor sleep between drains while `moving == false`.
    #[serde(default = "default_monitor_idle_interval")]
    #[serde(with = "humantime_serde")]
    pub monitor_idle_interval: Duration,
    /// Motion-monitor sleep between drains while `moving == true`.
    #[serde(default = "default_monitor_active_interval")]
    #[serde(with = "humantime_serde")]
    pub monitor_active_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            idle_refresh_interval: default_idle_refresh(),
            temperature_interval: default_temperature_interval(),
            monitor_idle_interval: default_monitor_idle_interval(),
            monitor_active_interval: default_monitor_active_interval(),
        }
    }
}

/// Logging sink configuration. Parsing and loading this schema is in
/// scope; wiring an arbitrary file sink is not yet implemented. `main`
/// only honors `level` today, via `tracing_subscriber::EnvFilter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// In-process hardware simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sim_initial_position")]
    pub initial_position: u32,
    /// Steps per second the simulated motor advances while moving.
    #[serde(default = "default_sim_speed")]
    pub movement_speed: u32,
    #[serde(default = "default_sim_firmware")]
    pub firmware_string: String,
    /// Degrees Celsius; converted to the raw ADC encoding FT replies with.
    #[serde(default = "default_sim_temperature")]
    pub temperature: f64,
    /// Standard deviation (in ADC counts) of per-reading temperature noise.
    #[serde(default)]
    pub temperature_noise: f64,
    /// Linear drift applied to the simulated temperature, degrees per hour.
    #[serde(default)]
    pub temperature_drift_per_hour: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_position: default_sim_initial_position(),
            movement_speed: default_sim_speed(),
            firmware_string: default_sim_firmware(),
            temperature: default_sim_temperature(),
            temperature_noise: 0.0,
            temperature_drift_per_hour: 0.0,
        }
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_step_size() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_idle_refresh() -> Duration {
    Duration::from_secs(5)
}

fn default_temperature_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_monitor_idle_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_monitor_active_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sim_initial_position() -> u32 {
    30_000
}

fn default_sim_speed() -> u32 {
    500
}

fn default_sim_firmware() -> String {
    "002100".to_string()
}

fn default_sim_temperature() -> f64 {
    20.0
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            auto_discover: false,
            scan_timeout: default_scan_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 11111,
            discovery_enabled: true,
        }
    }
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self { port: 11211 }
    }
}

impl Default for FocuserConfig {
    fn default() -> Self {
        Self {
            name: "Robofocus".to_string(),
            unique_id: "robofocus-001".to_string(),
            description: "Robofocus RS-232 Stepper Motor Focuser Controller".to_string(),
            device_number: 0,
            step_size: default_step_size(),
            polling: PollingConfig::default(),
        }
    }
}

/// Load [`Config`] from a JSON file.
pub fn load_config(path: &Path) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Persisted, GUI-adjustable focuser settings.
///
/// Created with defaults on first run if the file doesn't exist yet;
/// every setter on the controller that changes one of these values should
/// call [`UserSettings::save`] afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSettings {
    /// Most recently used serial port, offered as the default on next start.
    #[serde(default)]
    pub last_port: Option<String>,
    /// Maximum travel the hardware itself allows (FL).
    #[serde(default = "default_max_travel")]
    pub max_travel: u32,
    /// Driver-enforced soft cap on the size of a single move, reported as
    /// ASCOM's `MaxIncrement`. Independent of `max_travel`.
    #[serde(default = "default_max_travel")]
    pub max_increment: u32,
    /// Soft minimum position the driver will allow the focuser to reach.
    #[serde(default)]
    pub min_position: u32,
    /// Offset applied when reporting position (FS zero-point).
    #[serde(default)]
    pub zero_offset: i32,
    /// Signed backlash compensation, INDI sign convention.
    #[serde(default)]
    pub backlash: i16,
    /// Last known absolute hardware position, persisted so the controller
    /// has a reference point to `FS`-sync to on the next connect (the
    /// hardware itself has no "report current position" command).
    #[serde(default)]
    pub last_position: u32,
    /// Current operating mode.
    #[serde(default)]
    pub mode: OperatingMode,
}

fn default_max_travel() -> u32 {
    64_000
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            last_port: None,
            max_travel: default_max_travel(),
            max_increment: default_max_travel(),
            min_position: 0,
            zero_offset: 0,
            backlash: 0,
            last_position: 0,
            mode: OperatingMode::default(),
        }
    }
}

/// Operating mode reported and set through the `/gui/mode` endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Normal,
    Maintenance,
}

impl UserSettings {
    /// Load settings from `path`, creating and persisting defaults if the
    /// file doesn't exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }
        let content = std::fs::read_to_string(path).map_err(RobofocusError::Io)?;
        serde_json::from_str(&content)
            .map_err(|e| RobofocusError::ProtocolError(format!("invalid settings file: {e}")))
    }

    /// Persist these settings to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RobofocusError::DriverError(format!("failed to serialize settings: {e}")))?;
        std::fs::write(path, content).map_err(RobofocusError::Io)
    }
}
