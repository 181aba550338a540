//! Configuration loading, path resolution and validation
//!
//! The device reads a single TOML file at startup. Path priority:
//! 1. Command-line argument (highest priority)
//! 2. `TEMPLOG_CONFIG` environment variable
//! 3. `~/.config/templog/config.toml`
//! 4. `/etc/templog/config.toml`
//!
//! An explicitly named file must exist. When nothing is found in the default
//! locations the compiled defaults are used (all sinks and the weather feed off).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TEMPLOG_CONFIG";

/// Environment variable overriding `[met_office].api_key`
pub const API_KEY_ENV_VAR: &str = "TEMPLOG_METOFFICE_API_KEY";

/// Reading interval used when none is configured, and the lowest accepted value
pub const MIN_READING_INTERVAL_SECS: u64 = 10;

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

const DEFAULT_METOFFICE_URL: &str = "http://datapoint.metoffice.gov.uk/public/data/val/wxobs/all/json";

/// Complete device configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TomlConfig {
    pub general: GeneralConfig,
    pub sensor: SensorConfig,
    pub met_office: MetOfficeConfig,
    pub storage: StorageConfig,
    pub mqtt: MqttConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds between cycles (clamped to [`MIN_READING_INTERVAL_SECS`])
    pub reading_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            reading_interval_seconds: MIN_READING_INTERVAL_SECS,
        }
    }
}

/// Physical sensor (BME280 on I2C)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorConfig {
    pub device_id: String,
    pub i2c_bus_number: u8,
    pub i2c_address: u8,
    pub mqtt_topic: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device_id: "indoor".to_string(),
            i2c_bus_number: 1,
            i2c_address: 0x76,
            mqtt_topic: "templog/indoor".to_string(),
        }
    }
}

impl SensorConfig {
    /// Linux device node for the configured bus
    pub fn i2c_device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{}", self.i2c_bus_number))
    }
}

/// Hourly Met Office DataPoint observation feed
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetOfficeConfig {
    pub enabled: bool,
    pub device_id: String,
    pub location_id: String,
    pub api_key: String,
    pub mqtt_topic: String,
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for MetOfficeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: "outside".to_string(),
            location_id: String::new(),
            api_key: String::new(),
            mqtt_topic: "templog/outside".to_string(),
            base_url: DEFAULT_METOFFICE_URL.to_string(),
            request_timeout_seconds: 30,
        }
    }
}

/// Reading store
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    /// sqlx connection URL, e.g. `sqlite://templog.db?mode=rwc`
    pub url: String,
    /// Table holding the readings
    pub collection: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            collection: "readings".to_string(),
            max_connections: 5,
        }
    }
}

/// MQTT broker
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    /// `mqtt://host[:port]` or `tcp://host[:port]`
    pub broker_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: String::new(),
            username: None,
            password: None,
            client_id: None,
            keep_alive_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }
}

impl MqttConfig {
    /// Split `broker_url` into host and port
    pub fn broker_address(&self) -> Result<(String, u16)> {
        let url = self.broker_url.trim();
        let rest = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unsupported MQTT broker URL '{}' (expected mqtt://host[:port])",
                    url
                ))
            })?
            .trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| Error::Config(format!("Invalid MQTT port '{}': {}", port, e)))?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(Error::Config(format!("MQTT broker URL '{}' has no host", url)));
        }

        Ok((host.to_string(), port))
    }

    /// Configured client id, or one derived from the sensor device id
    pub fn client_id_for(&self, device_id: &str) -> String {
        self.client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("templog-{}", device_id))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a config from TOML text (no env overrides, no validation)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse, apply env overrides and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Replace values with their environment overrides, if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                info!("Met Office API key loaded from environment variable");
                self.met_office.api_key = key.trim().to_string();
            }
        }
    }

    /// Reject configurations the device cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sensor.device_id.trim().is_empty() {
            return Err(Error::Config("sensor.device_id must not be empty".to_string()));
        }

        if self.met_office.enabled {
            if self.met_office.device_id.trim().is_empty() {
                return Err(Error::Config(
                    "met_office.device_id must not be empty".to_string(),
                ));
            }
            if self.met_office.location_id.trim().is_empty() {
                return Err(Error::Config(
                    "met_office.location_id is required when the feed is enabled".to_string(),
                ));
            }
            if self.met_office.api_key.trim().is_empty() {
                return Err(Error::Config(format!(
                    "met_office.api_key is required when the feed is enabled (or set {})",
                    API_KEY_ENV_VAR
                )));
            }
        }

        if self.storage.enabled {
            if self.storage.url.trim().is_empty() {
                return Err(Error::Config(
                    "storage.url is required when storage is enabled".to_string(),
                ));
            }
            if !is_valid_identifier(&self.storage.collection) {
                return Err(Error::Config(format!(
                    "storage.collection '{}' is not a valid table name",
                    self.storage.collection
                )));
            }
        }

        if self.mqtt.enabled {
            self.mqtt.broker_address()?;
        }

        Ok(())
    }

    /// Reading interval with the minimum floor applied
    pub fn effective_interval(&self) -> Duration {
        let configured = self.general.reading_interval_seconds;
        if configured < MIN_READING_INTERVAL_SECS {
            warn!(
                "reading_interval_seconds = {} is below the minimum, using {}",
                configured, MIN_READING_INTERVAL_SECS
            );
            return Duration::from_secs(MIN_READING_INTERVAL_SECS);
        }
        Duration::from_secs(configured)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Where the config file was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    DefaultLocation(PathBuf),
    CompiledDefaults,
}

/// Resolve the config file location following the documented priority order
pub fn resolve_config_path(cli_arg: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    // Priority 3/4: user then system config
    for candidate in default_config_paths() {
        if candidate.exists() {
            return ConfigSource::DefaultLocation(candidate);
        }
    }

    ConfigSource::CompiledDefaults
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("templog").join("config.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/templog/config.toml"));
    }
    paths
}

/// Resolve and load the device configuration
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        ConfigSource::CommandLine(path)
        | ConfigSource::Environment(path)
        | ConfigSource::DefaultLocation(path) => {
            info!("Loading config from {}", path.display());
            TomlConfig::load(&path)
        }
        ConfigSource::CompiledDefaults => {
            warn!("No config file found, using compiled defaults");
            let mut config = TomlConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_optional_capabilities() {
        let config = TomlConfig::default();
        assert!(!config.met_office.enabled);
        assert!(!config.storage.enabled);
        assert!(!config.mqtt.enabled);
        assert_eq!(config.general.reading_interval_seconds, 10);
        assert_eq!(config.sensor.i2c_address, 0x76);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_below_floor_is_clamped() {
        let mut config = TomlConfig::default();
        config.general.reading_interval_seconds = 2;
        assert_eq!(config.effective_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_interval_above_floor_is_kept() {
        let mut config = TomlConfig::default();
        config.general.reading_interval_seconds = 60;
        assert_eq!(config.effective_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_broker_address_default_port() {
        let mqtt = MqttConfig {
            broker_url: "mqtt://broker.local".to_string(),
            ..MqttConfig::default()
        };
        assert_eq!(mqtt.broker_address().unwrap(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn test_broker_address_explicit_port() {
        let mqtt = MqttConfig {
            broker_url: "tcp://10.0.0.5:8883/".to_string(),
            ..MqttConfig::default()
        };
        assert_eq!(mqtt.broker_address().unwrap(), ("10.0.0.5".to_string(), 8883));
    }

    #[test]
    fn test_broker_address_rejects_other_schemes() {
        let mqtt = MqttConfig {
            broker_url: "http://broker.local".to_string(),
            ..MqttConfig::default()
        };
        assert!(matches!(mqtt.broker_address(), Err(Error::Config(_))));
    }

    #[test]
    fn test_broker_address_rejects_bad_port() {
        let mqtt = MqttConfig {
            broker_url: "mqtt://broker.local:notaport".to_string(),
            ..MqttConfig::default()
        };
        assert!(mqtt.broker_address().is_err());
    }

    #[test]
    fn test_client_id_falls_back_to_device_id() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.client_id_for("lounge"), "templog-lounge");

        let mqtt = MqttConfig {
            client_id: Some("custom".to_string()),
            ..MqttConfig::default()
        };
        assert_eq!(mqtt.client_id_for("lounge"), "custom");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("readings"));
        assert!(is_valid_identifier("_tmp2"));
        assert!(!is_valid_identifier("2readings"));
        assert!(!is_valid_identifier("readings; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_i2c_device_path() {
        let sensor = SensorConfig {
            i2c_bus_number: 3,
            ..SensorConfig::default()
        };
        assert_eq!(sensor.i2c_device_path(), PathBuf::from("/dev/i2c-3"));
    }
}
