//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field carries a default, so an empty file (or no file
//! at all, see [`Config::default`]) yields a runnable configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChamberError, Result};
use crate::sensor::scd4x::SCD4X_ADDRESS;

/// Baud rates accepted for the GPS receiver
pub const SUPPORTED_BAUD_RATES: &[u32] = &[4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial parity setting
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// GPS receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_gps_enabled")]
    pub enabled: bool,

    /// Serial device path; empty selects the first enumerated port
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_gps_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_parity")]
    pub parity: Parity,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Append every raw NMEA line to this file
    #[serde(default)]
    pub raw_log: Option<PathBuf>,

    #[serde(default = "default_fix_timeout_s")]
    pub fix_timeout_s: u64,

    #[serde(default = "default_decode_error_backoff_ms")]
    pub decode_error_backoff_ms: u64,
}

/// Sensor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: String,

    #[serde(default = "default_sensor_address")]
    pub address: u16,

    #[serde(default)]
    pub self_calibration: bool,

    #[serde(default)]
    pub self_test: bool,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Result and status file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,

    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
}

/// Host clock synchronisation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClockConfig {
    #[serde(default = "default_set_from_gps")]
    pub set_from_gps: bool,

    /// Program and arguments; the fix timestamp is appended as the last argument
    #[serde(default = "default_clock_command")]
    pub command: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty disables file logging
    #[serde(default = "default_log_file")]
    pub file: String,
}

// Default value functions
fn default_gps_enabled() -> bool { true }
fn default_gps_baud_rate() -> u32 { 4800 }
fn default_parity() -> Parity { Parity::None }
fn default_stop_bits() -> u8 { 1 }
fn default_data_bits() -> u8 { 8 }
fn default_fix_timeout_s() -> u64 { 1800 }
fn default_decode_error_backoff_ms() -> u64 { 1000 }

fn default_i2c_bus() -> String { "/dev/i2c-1".to_string() }
fn default_sensor_address() -> u16 { SCD4X_ADDRESS }
fn default_connect_attempts() -> u32 { 10 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 100 }

fn default_results_dir() -> PathBuf { PathBuf::from("Results") }
fn default_status_file() -> PathBuf { PathBuf::from("status.txt") }
fn default_file_suffix() -> String { "co2".to_string() }

fn default_set_from_gps() -> bool { true }
fn default_clock_command() -> Vec<String> {
    ["sudo", "date", "-u", "-s"].iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "co2sensor.log".to_string() }

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: default_gps_enabled(),
            port: String::new(),
            baud_rate: default_gps_baud_rate(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            data_bits: default_data_bits(),
            raw_log: None,
            fix_timeout_s: default_fix_timeout_s(),
            decode_error_backoff_ms: default_decode_error_backoff_ms(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            i2c_bus: default_i2c_bus(),
            address: default_sensor_address(),
            self_calibration: false,
            self_test: false,
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            status_file: default_status_file(),
            file_suffix: default_file_suffix(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            set_from_gps: default_set_from_gps(),
            command: default_clock_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

impl GpsConfig {
    /// Explicit port, or `None` to auto-detect
    pub fn port(&self) -> Option<&str> {
        let port = self.port.trim();
        if port.is_empty() {
            None
        } else {
            Some(port)
        }
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_s)
    }

    pub fn decode_error_backoff(&self) -> Duration {
        Duration::from_millis(self.decode_error_backoff_ms)
    }
}

impl SensorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chamber_logger::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_BAUD_RATES.contains(&self.gps.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if !(5..=8).contains(&self.gps.data_bits) {
            return Err(invalid("data_bits must be between 5 and 8"));
        }

        if self.gps.stop_bits != 1 && self.gps.stop_bits != 2 {
            return Err(invalid("stop_bits must be 1 or 2"));
        }

        if self.gps.fix_timeout_s == 0 {
            return Err(invalid("fix_timeout_s must be greater than 0"));
        }

        if self.gps.decode_error_backoff_ms > 60000 {
            return Err(invalid("decode_error_backoff_ms must be at most 60000"));
        }

        if self.sensor.connect_attempts == 0 {
            return Err(invalid("connect_attempts must be greater than 0"));
        }

        if self.sensor.retry_delay_ms > 60000 {
            return Err(invalid("retry_delay_ms must be at most 60000"));
        }

        if self.sensor.poll_interval_ms == 0 || self.sensor.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.sensor.i2c_bus.is_empty() {
            return Err(invalid("i2c_bus cannot be empty"));
        }

        if self.sensor.address > 0x7F {
            return Err(invalid("address must be a 7-bit I2C address"));
        }

        if self.output.results_dir.as_os_str().is_empty() {
            return Err(invalid("results_dir cannot be empty"));
        }

        if self.output.status_file.as_os_str().is_empty() {
            return Err(invalid("status_file cannot be empty"));
        }

        if self.clock.set_from_gps && self.clock.command.is_empty() {
            return Err(invalid("clock command cannot be empty when set_from_gps is enabled"));
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ChamberError {
    ChamberError::Config(toml::de::Error::custom(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_empty_file_uses_defaults() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"").unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.gps.baud_rate, 4800);
        assert_eq!(config.sensor.connect_attempts, 10);
        assert_eq!(config.output.results_dir, PathBuf::from("Results"));
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[gps]
port = "/dev/ttyUSB0"
parity = "even"
raw_log = "gps.txt"
fix_timeout_s = 60

[sensor]
address = 0x61
connect_attempts = 3

[output]
results_dir = "/tmp/results"

[clock]
set_from_gps = false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.gps.port(), Some("/dev/ttyUSB0"));
        assert_eq!(config.gps.parity, Parity::Even);
        assert_eq!(config.gps.raw_log, Some(PathBuf::from("gps.txt")));
        assert_eq!(config.gps.fix_timeout(), Duration::from_secs(60));
        assert_eq!(config.sensor.address, 0x61);
        assert_eq!(config.sensor.connect_attempts, 3);
        assert!(!config.clock.set_from_gps);
        assert_eq!(config.logging.file, "co2sensor.log");
    }

    #[test]
    fn test_load_rejects_unknown_parity() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[gps]\nparity = \"mark\"\n").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(ChamberError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/chamber.toml"),
            Err(ChamberError::Io(_))
        ));
    }

    #[test]
    fn test_blank_port_means_auto_detect() {
        let mut config = Config::default();
        config.gps.port = "   ".to_string();
        assert_eq!(config.gps.port(), None);
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.gps.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in SUPPORTED_BAUD_RATES {
            let mut config = Config::default();
            config.gps.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_data_bits_out_of_range() {
        let mut config = Config::default();
        config.gps.data_bits = 9;
        assert!(config.validate().is_err());
        config.gps.data_bits = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stop_bits_invalid() {
        let mut config = Config::default();
        config.gps.stop_bits = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fix_timeout_zero() {
        let mut config = Config::default();
        config.gps.fix_timeout_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_attempts_zero() {
        let mut config = Config::default();
        config.sensor.connect_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = Config::default();
        config.sensor.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.sensor.poll_interval_ms = 60001;
        assert!(config.validate().is_err());
        config.sensor.poll_interval_ms = 60000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sensor_address_not_7_bit() {
        let mut config = Config::default();
        config.sensor.address = 0x80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_results_dir() {
        let mut config = Config::default();
        config.output.results_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_status_file() {
        let mut config = Config::default();
        config.output.status_file = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_clock_command_only_matters_when_enabled() {
        let mut config = Config::default();
        config.clock.command.clear();
        assert!(config.validate().is_err());
        config.clock.set_from_gps = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_functions() {
        assert!(default_gps_enabled());
        assert_eq!(default_gps_baud_rate(), 4800);
        assert_eq!(default_parity(), Parity::None);
        assert_eq!(default_stop_bits(), 1);
        assert_eq!(default_data_bits(), 8);
        assert_eq!(default_fix_timeout_s(), 1800);
        assert_eq!(default_decode_error_backoff_ms(), 1000);
        assert_eq!(default_i2c_bus(), "/dev/i2c-1");
        assert_eq!(default_sensor_address(), 0x62);
        assert_eq!(default_connect_attempts(), 10);
        assert_eq!(default_retry_delay_ms(), 1000);
        assert_eq!(default_poll_interval_ms(), 100);
        assert_eq!(default_status_file(), PathBuf::from("status.txt"));
        assert_eq!(default_file_suffix(), "co2");
        assert_eq!(default_clock_command(), vec!["sudo", "date", "-u", "-s"]);
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_log_file(), "co2sensor.log");
    }
}
