//! # Chamber Logger Library
//!
//! Continuous CO2, temperature and humidity logging with GPS geotagging.
//!
//! A background [`gps::GpsEngine`] decodes the receiver's NMEA stream while
//! the [`acquisition::Acquisition`] loop reads the sensor and appends
//! timestamped rows to a CSV session file, publishing its connection status
//! for an external dashboard.

pub mod acquisition;
pub mod clock;
pub mod config;
pub mod error;
pub mod gps;
pub mod nmea;
pub mod sensor;
pub mod serial;
pub mod telemetry;
