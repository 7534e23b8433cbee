//! # Telemetry Module
//!
//! Everything the logger writes for the dashboard to read.
//!
//! This module handles:
//! - Publishing the connection status token to the shared status file
//! - Creating one CSV result file per session with its metadata header
//! - Appending sensor readings as CSV rows

pub mod session;
pub mod status;

pub use session::{HeaderMetadata, SensorReading, Session};
pub use status::{ConnectionStatus, StatusFile, StatusPublisher};
