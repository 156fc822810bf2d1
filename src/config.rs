//! Station configuration
//!
//! The configuration document is owned outside the core: [`ConfigStore`] treats it as an
//! opaque TOML table that can be loaded, edited by dotted key and saved back without losing
//! keys the core does not understand. [`StationConfig`] is the immutable typed snapshot
//! derived from it and handed to each component's constructor.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of joystick axes in a controller record (two 3-axis sticks).
pub const AXIS_COUNT: usize = 6;
/// Number of thruster motors on the vehicle.
pub const MOTOR_COUNT: usize = 8;
/// Number of servos on the vehicle.
pub const SERVO_COUNT: usize = 3;

/// Opaque key-value configuration document
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    table: toml::Table,
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TOML document from disk, remembering the path for [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut store = Self::parse(&text)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text)?;
        Ok(Self { table, path: None })
    }

    /// Write the document back to the path it was loaded from.
    pub fn save(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Err(ConfigError::Invalid("store has no backing file".into())),
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(&self.table)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a dotted key such as `serial.port`.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut value = self.table.get(first)?;
        for part in parts {
            value = value.as_table()?.get(part)?;
        }
        Some(value)
    }

    /// Set a dotted key from its raw text form.
    ///
    /// The raw value is stored as a bool, integer or float when it parses as one, otherwise
    /// as a string. Intermediate tables are created as needed.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(ConfigError::Invalid(format!("bad key {:?}", key)));
        }

        let (last, parents) = match parts.split_last() {
            Some(split) => split,
            None => return Err(ConfigError::Invalid("empty key".into())),
        };

        let mut table = &mut self.table;
        for part in parents {
            let entry = table
                .entry(part.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            table = match entry {
                toml::Value::Table(t) => t,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{:?} is not a table in key {:?}",
                        part, key
                    )))
                }
            };
        }
        table.insert(last.to_string(), parse_raw_value(raw));
        Ok(())
    }

    /// Derive the typed snapshot. Missing keys take their defaults.
    pub fn snapshot(&self) -> Result<StationConfig, ConfigError> {
        let text = toml::to_string(&self.table)?;
        let config: StationConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_raw_value(raw: &str) -> toml::Value {
    let raw = raw.trim();
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

/// Immutable typed configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationConfig {
    pub serial: SerialConfig,
    pub video: VideoConfig,
    pub link: LinkConfig,
    pub drive: DriveConfig,
    pub sensors: SensorConfig,
    pub vehicle: VehicleConfig,
    pub station: StationTiming,
    pub logging: LoggingConfig,
}

impl StationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drive.motor_min >= self.drive.motor_max {
            return Err(ConfigError::Invalid("drive.motor_min must be below drive.motor_max".into()));
        }
        if self.drive.servo_min >= self.drive.servo_max {
            return Err(ConfigError::Invalid("drive.servo_min must be below drive.servo_max".into()));
        }
        if self.drive.servo_axes.iter().any(|&a| a >= AXIS_COUNT) {
            return Err(ConfigError::Invalid(format!(
                "drive.servo_axes entries must be below {}",
                AXIS_COUNT
            )));
        }
        if self.link.command_queue_capacity < 2 || self.link.inbox_capacity < 2 {
            return Err(ConfigError::Invalid("queue capacities must be at least 2".into()));
        }
        if self.link.backoff_initial_ms == 0 || self.link.backoff_initial_ms > self.link.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "link.backoff_initial_ms must be in 1..=link.backoff_max_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyACM0`
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baud_rate: 9600,
            timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    /// Ask the vehicle to start streaming as soon as the socket connects.
    pub auto_start: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.10".into(),
            port: 8080,
            timeout_ms: 2000,
            auto_start: true,
        }
    }
}

impl VideoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub command_queue_capacity: usize,
    pub inbox_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 1000,
            backoff_max_ms: 30_000,
            command_queue_capacity: 32,
            inbox_capacity: 256,
        }
    }
}

/// Joystick to actuator mapping
///
/// `motor_mix[m][a]` is the weight of axis `a` (lx, ly, lz, rx, ry, rz) on motor `m`.
/// `servo_axes[s]` names the axis that drives servo `s`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriveConfig {
    pub motor_min: u16,
    pub motor_max: u16,
    pub servo_min: u16,
    pub servo_max: u16,
    pub motor_mix: [[f32; AXIS_COUNT]; MOTOR_COUNT],
    pub servo_axes: [usize; SERVO_COUNT],
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            motor_min: 1000,
            motor_max: 2000,
            servo_min: 1000,
            servo_max: 2000,
            // Columns: lx (sway), ly (surge), lz, rx (yaw), ry (heave), rz
            motor_mix: [
                [1.0, 1.0, 0.0, 1.0, 0.0, 0.0],
                [-1.0, 1.0, 0.0, -1.0, 0.0, 0.0],
                [-1.0, 1.0, 0.0, 1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0, -1.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ],
            servo_axes: [2, 5, 5],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    pub temperature_unit: TemperatureUnit,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Host probed by the liveness monitor
    pub ip: String,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub liveness_enabled: bool,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.10".into(),
            ping_interval_ms: 2000,
            ping_timeout_ms: 1000,
            liveness_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StationTiming {
    /// How long both channels may be down while driving before the vehicle is e-stopped.
    pub grace_period_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for StationTiming {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
AUV = true

[serial]
port = "/dev/ttyUSB1"
baud_rate = 115200

[drive]
motor_max = 1900

[ui]
theme = "DarkAmber"
"#;

    #[test]
    fn test_snapshot_defaults_missing_keys() {
        let store = ConfigStore::parse(SAMPLE).unwrap();
        let config = store.snapshot().unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.timeout_ms, 1000);
        assert_eq!(config.drive.motor_max, 1900);
        assert_eq!(config.drive.motor_min, 1000);
        assert_eq!(config.link.backoff_max_ms, 30_000);
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = ConfigStore::new().snapshot().unwrap();
        assert_eq!(config, StationConfig::default());
    }

    #[test]
    fn test_dotted_get_and_set() {
        let mut store = ConfigStore::parse(SAMPLE).unwrap();
        assert_eq!(store.get("serial.port").and_then(|v| v.as_str()), Some("/dev/ttyUSB1"));
        assert!(store.get("serial.missing").is_none());

        store.set("drive.motor_min", "1100").unwrap();
        store.set("vehicle.ip", "10.0.0.2").unwrap();
        store.set("video.auto_start", "false").unwrap();
        store.set("new.section.value", "0.5").unwrap();

        assert_eq!(store.get("drive.motor_min").and_then(|v| v.as_integer()), Some(1100));
        assert_eq!(store.get("new.section.value").and_then(|v| v.as_float()), Some(0.5));

        let config = store.snapshot().unwrap();
        assert_eq!(config.drive.motor_min, 1100);
        assert_eq!(config.vehicle.ip, "10.0.0.2");
        assert!(!config.video.auto_start);
    }

    #[test]
    fn test_set_through_scalar_is_rejected() {
        let mut store = ConfigStore::parse(SAMPLE).unwrap();
        assert!(store.set("AUV.nested", "1").is_err());
        assert!(store.set("serial..port", "x").is_err());
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        let mut store = ConfigStore::new();
        store.set("drive.motor_min", "2000").unwrap();
        store.set("drive.motor_max", "1000").unwrap();
        assert!(matches!(store.snapshot(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        fs::write(&path, SAMPLE).unwrap();

        let mut store = ConfigStore::load(&path).unwrap();
        store.set("serial.baud_rate", "57600").unwrap();
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.get("ui.theme").and_then(|v| v.as_str()), Some("DarkAmber"));
        assert_eq!(reloaded.snapshot().unwrap().serial.baud_rate, 57600);
    }

    #[test]
    fn test_save_without_path_fails() {
        assert!(ConfigStore::new().save().is_err());
    }

    #[test]
    fn test_temperature_unit_parse() {
        let store = ConfigStore::parse("[sensors]\ntemperature_unit = \"fahrenheit\"\n").unwrap();
        assert_eq!(store.snapshot().unwrap().sensors.temperature_unit, TemperatureUnit::Fahrenheit);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let store = ConfigStore::parse(include_str!("../config/station.toml")).unwrap();
        assert_eq!(store.snapshot().unwrap(), StationConfig::default());
    }
}
