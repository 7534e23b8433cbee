//! # Error Types
//!
//! Custom error types for Chamber Logger using `thiserror`.

use thiserror::Error;

/// Main error type for Chamber Logger
#[derive(Debug, Error)]
pub enum ChamberError {
    /// Serial port errors (GPS receiver)
    #[error("Serial error: {0}")]
    Serial(String),

    /// Malformed NMEA sentence field
    #[error("NMEA parse error: {0}")]
    Nmea(String),

    /// Sensor bus or device errors
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Sensor could not be reached within the configured number of attempts
    #[error("Sensor unreachable after {attempts} attempts: {reason}")]
    DeviceUnreachable { attempts: u32, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChamberError {
    /// Whether the error came from the sensor adapter and can be recovered
    /// by reconnecting to the device.
    pub fn is_sensor_fault(&self) -> bool {
        matches!(self, ChamberError::Sensor(_))
    }
}

/// Result type alias for Chamber Logger
pub type Result<T> = std::result::Result<T, ChamberError>;
