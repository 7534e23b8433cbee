//! # Acquisition Loop
//!
//! Drives a measurement session from start to (fatal) finish:
//!
//! 1. **Awaiting fix** - ask the GPS engine for a fix within a bounded wait,
//!    falling back to the local clock and an unknown position.
//! 2. **Connecting** - open the sensor with a fixed number of attempts and a
//!    fixed delay between them, then start periodic measurement.
//! 3. **Measuring** - poll for data at a short interval and append every
//!    reading to the session file. A sensor fault goes back to step 2.
//!
//! The loop only ends when step 2 runs out of attempts (or the result file
//! cannot be written). Either way the status sink is left at `Error`.

use chrono::Local;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::clock;
use crate::config::{ClockConfig, Config};
use crate::error::{ChamberError, Result};
use crate::gps::{FixResult, GpsEngine};
use crate::sensor::{SensorConnector, SensorDevice};
use crate::telemetry::{ConnectionStatus, HeaderMetadata, SensorReading, Session, StatusPublisher};

/// Loop timing and output settings
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub fix_timeout: Duration,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub results_dir: PathBuf,
    pub file_suffix: String,
    pub clock: ClockConfig,
}

impl From<&Config> for AcquisitionSettings {
    fn from(config: &Config) -> Self {
        Self {
            fix_timeout: config.gps.fix_timeout(),
            connect_attempts: config.sensor.connect_attempts,
            retry_delay: config.sensor.retry_delay(),
            poll_interval: config.sensor.poll_interval(),
            results_dir: config.output.results_dir.clone(),
            file_suffix: config.output.file_suffix.clone(),
            clock: config.clock.clone(),
        }
    }
}

/// A sensor that accepted `start_periodic_measurement`
pub struct ConnectedSensor {
    pub device: Box<dyn SensorDevice>,
    /// 1-based attempt that succeeded
    pub attempts: u32,
}

/// Sensor acquisition loop
pub struct Acquisition<C: SensorConnector> {
    settings: AcquisitionSettings,
    connector: C,
    status: Arc<dyn StatusPublisher>,
}

impl<C: SensorConnector> Acquisition<C> {
    pub fn new(settings: AcquisitionSettings, connector: C, status: Arc<dyn StatusPublisher>) -> Self {
        Self {
            settings,
            connector,
            status,
        }
    }

    /// Run until a fatal condition
    ///
    /// Never returns `Ok`. On return the status sink holds `Error`.
    pub async fn run(&mut self, gps: Option<&GpsEngine>) -> Result<Infallible> {
        let fix = self.acquire_fix(gps).await;
        let mut session = self.start_session(&fix).map_err(|e| self.fail(e))?;

        loop {
            let mut sensor = self.connect_sensor().await.map_err(|e| self.fail(e))?;

            let fault = self.measure(sensor.device.as_mut(), &mut session).await;
            if !fault.is_sensor_fault() {
                return Err(self.fail(fault));
            }
            warn!("Sensor fault while measuring, reconnecting: {}", fault);
        }
    }

    /// Obtain the session's position and start time
    ///
    /// Only waits when the engine still has its receiver. A fix also triggers
    /// a background update of the host clock. Without a fix the position is
    /// unknown (`NaN`) and the time is the local clock.
    pub async fn acquire_fix(&self, gps: Option<&GpsEngine>) -> FixResult {
        self.status.publish(ConnectionStatus::WaitingForGps);

        let fix = match gps {
            Some(engine) if engine.is_connected() => {
                Some(engine.wait_for_fix(self.settings.fix_timeout).await)
            }
            Some(_) => {
                warn!("GPS receiver disconnected, using local clock");
                None
            }
            None => {
                info!("No GPS receiver, using local clock");
                None
            }
        };

        match fix {
            Some(fix) if fix.fix_acquired => {
                clock::set_system_clock(&self.settings.clock, fix.timestamp);
                fix
            }
            _ => FixResult {
                timestamp: Local::now().naive_local(),
                latitude: f64::NAN,
                longitude: f64::NAN,
                altitude: f64::NAN,
                fix_acquired: false,
            },
        }
    }

    /// Create the session's result file with its header
    pub fn start_session(&self, fix: &FixResult) -> Result<Session> {
        let header = if fix.fix_acquired {
            HeaderMetadata {
                latitude: fix.latitude,
                longitude: fix.longitude,
                altitude: fix.altitude,
            }
        } else {
            HeaderMetadata::unknown()
        };
        let session = Session::create(
            &self.settings.results_dir,
            &self.settings.file_suffix,
            Local::now().naive_local(),
            header,
        )?;

        let header = session.header();
        info!(
            "Session started at {} (lat {}, lon {}, alt {} m)",
            session.started_at().format("%Y-%m-%d %H:%M:%S"),
            header.latitude,
            header.longitude,
            header.altitude
        );
        Ok(session)
    }

    /// Connect to the sensor and start periodic measurement
    ///
    /// Makes at most `connect_attempts` attempts with `retry_delay` between
    /// them.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnreachable` once every attempt has failed
    pub async fn connect_sensor(&mut self) -> Result<ConnectedSensor> {
        self.status.publish(ConnectionStatus::ConnectingToSensor);

        let max_attempts = self.settings.connect_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.try_connect().await {
                Ok(device) => {
                    info!("Sensor connected (attempt {}/{})", attempt, max_attempts);
                    return Ok(ConnectedSensor {
                        device,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!("Sensor connection attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.settings.retry_delay).await;
            }
        }

        Err(ChamberError::DeviceUnreachable {
            attempts: max_attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    async fn try_connect(&mut self) -> Result<Box<dyn SensorDevice>> {
        let mut device = self.connector.connect().await?;
        device.start_periodic_measurement().await?;
        Ok(device)
    }

    /// Poll `device` and append readings to `session` until something fails
    ///
    /// Returns the error that stopped measuring.
    pub async fn measure(&mut self, device: &mut dyn SensorDevice, session: &mut Session) -> ChamberError {
        info!("Waiting for first measurement...");

        loop {
            match device.is_data_ready().await {
                Ok(true) => {
                    let measurement = match device.read_measurement().await {
                        Ok(measurement) => measurement,
                        Err(e) => return e,
                    };
                    let reading = SensorReading::new(Local::now().naive_local(), measurement);
                    if let Err(e) = session.append(&reading) {
                        return e;
                    }
                    self.status.publish(ConnectionStatus::Measuring);
                    info!(
                        "Measurement received: {} ppm, {:.2} C, {:.2} %",
                        reading.co2_ppm, reading.temperature_c, reading.relative_humidity_pct
                    );
                }
                Ok(false) => {}
                Err(e) => return e,
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn fail(&self, e: ChamberError) -> ChamberError {
        self.status.publish(ConnectionStatus::Error);
        error!("Acquisition stopped: {}", e);
        e
    }
}
