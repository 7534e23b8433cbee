//! # Sensor Module
//!
//! Boundary to the CO2/temperature/humidity measurement device.
//!
//! The acquisition loop only sees two capabilities: a [`SensorConnector`]
//! that opens the device, and the [`SensorDevice`] it returns. Every failure
//! behind them is reported as [`ChamberError::Sensor`](crate::error::ChamberError::Sensor)
//! without device-specific detail.

use async_trait::async_trait;

use crate::error::Result;

pub mod scd4x;

pub use scd4x::{Scd4x, Scd4xConnector};

/// One raw measurement from the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub co2_ppm: f64,
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
}

/// An open measurement device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorDevice: Send {
    /// Put the device into its own periodic measurement cadence
    async fn start_periodic_measurement(&mut self) -> Result<()>;

    /// Whether a new measurement can be read
    async fn is_data_ready(&mut self) -> Result<bool>;

    /// Read the pending measurement
    async fn read_measurement(&mut self) -> Result<Measurement>;
}

/// Opens the measurement device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorConnector: Send {
    async fn connect(&mut self) -> Result<Box<dyn SensorDevice>>;
}
