//! # GPS Module
//!
//! Background GPS fix engine.
//!
//! This module handles:
//! - Reading NMEA lines from the receiver on a dedicated task
//! - Merging decoded fields into the shared [`GpsFixState`]
//! - Optional raw NMEA stream logging
//! - Waiting (with a hard timeout) for a usable fix
//!
//! A serial fault ends the decode task for good: the engine then reports
//! `connected == false` for the rest of its life and keeps the last known
//! fields.

use chrono::Local;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod state;

pub use state::{FixResult, GpsFixState};

use crate::config::GpsConfig;
use crate::error::Result;
use crate::nmea::parse_sentence;
use crate::serial::{GpsSerial, LineSettings};
use crate::telemetry::{ConnectionStatus, StatusPublisher};

/// How often `wait_for_fix` re-checks the shared state
const FIX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest line accepted from the receiver (NMEA sentences are at most 82 bytes)
const MAX_LINE_BYTES: u64 = 1024;

type SharedState = Arc<RwLock<GpsFixState>>;

/// Decode task options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Append every raw line to this file
    pub raw_log: Option<PathBuf>,
    /// Pause after a line that is not valid UTF-8 or is too long
    pub decode_error_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            raw_log: None,
            decode_error_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&GpsConfig> for EngineOptions {
    fn from(config: &GpsConfig) -> Self {
        Self {
            raw_log: config.raw_log.clone(),
            decode_error_backoff: config.decode_error_backoff(),
        }
    }
}

/// GPS fix engine
///
/// Owns the receiver stream through a background task. Readers take
/// snapshots of the shared state and never block the task.
#[derive(Debug)]
pub struct GpsEngine {
    state: SharedState,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    device_path: Option<String>,
}

impl GpsEngine {
    /// Open the receiver described by `config` and start decoding
    ///
    /// When auto-detection finds no serial port at all, a disconnected engine
    /// is returned: it never reports a fix.
    ///
    /// # Errors
    ///
    /// Returns error if the selected port exists but cannot be opened
    pub fn open(config: &GpsConfig, status: &dyn StatusPublisher) -> Result<Self> {
        status.publish(ConnectionStatus::ConnectingToGps);

        match GpsSerial::open(config.port(), LineSettings::from(config))? {
            Some(serial) => {
                let device_path = serial.device_path().to_string();
                let mut engine = Self::spawn(serial.into_stream(), EngineOptions::from(config));
                engine.device_path = Some(device_path);
                Ok(engine)
            }
            None => Ok(Self::disconnected()),
        }
    }

    /// Engine with no receiver attached
    pub fn disconnected() -> Self {
        Self {
            state: Arc::new(RwLock::new(GpsFixState::new(false))),
            shutdown: None,
            task: None,
            device_path: None,
        }
    }

    /// Start decoding NMEA lines from `reader`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<R>(reader: R, options: EngineOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let state = Arc::new(RwLock::new(GpsFixState::new(true)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(decode_loop(reader, Arc::clone(&state), options, shutdown_rx));

        Self {
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            device_path: None,
        }
    }

    /// Copy of the current fix state
    pub fn snapshot(&self) -> GpsFixState {
        read_state(&self.state).clone()
    }

    /// Whether the receiver link is still up
    pub fn is_connected(&self) -> bool {
        read_state(&self.state).connected
    }

    /// Serial device the engine reads from, if any
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// Wait until time, date, latitude and longitude are all known
    ///
    /// Returns as soon as they are, or after `timeout` with
    /// `fix_acquired == false` and the local wall-clock time.
    pub async fn wait_for_fix(&self, timeout: Duration) -> FixResult {
        info!("Waiting for GPS fix...");
        let deadline = Instant::now() + timeout;

        loop {
            let snapshot = self.snapshot();
            if let (true, Some(timestamp)) = (snapshot.has_fix(), snapshot.timestamp()) {
                info!(
                    "GPS fix acquired: {:.6}, {:.6} at {}",
                    snapshot.latitude, snapshot.longitude, timestamp
                );
                return FixResult {
                    timestamp,
                    latitude: snapshot.latitude,
                    longitude: snapshot.longitude,
                    altitude: snapshot.altitude,
                    fix_acquired: true,
                };
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("No GPS fix acquired after {} seconds", timeout.as_secs());
                return FixResult {
                    timestamp: Local::now().naive_local(),
                    latitude: snapshot.latitude,
                    longitude: snapshot.longitude,
                    altitude: snapshot.altitude,
                    fix_acquired: false,
                };
            }

            tokio::time::sleep(FIX_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Stop the decode task and release the serial port
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have ended on a serial fault
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("GPS decode task ended abnormally: {}", e);
            }
            info!("GPS serial connection closed");
        }
        write_state(&self.state).connected = false;
    }
}

fn read_state(state: &SharedState) -> RwLockReadGuard<'_, GpsFixState> {
    state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(state: &SharedState) -> RwLockWriteGuard<'_, GpsFixState> {
    state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Raw NMEA stream file; disables itself on the first failure
struct RawLog {
    path: PathBuf,
    file: Option<File>,
}

impl RawLog {
    async fn open(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => {
                info!("Logging raw NMEA stream to {}", path.display());
                Some(Self {
                    path,
                    file: Some(file),
                })
            }
            Err(e) => {
                warn!(
                    "Unable to open {}: {}. Disabling GPS file stream.",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    async fn append(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line.trim());
        record.push('\n');

        let result = match file.write_all(record.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                "Unable to write {}: {}. Disabling GPS file stream.",
                self.path.display(),
                e
            );
            self.file = None;
        }
    }
}

/// Read-decode-update loop run on the engine's task
async fn decode_loop<R>(
    reader: R,
    state: SharedState,
    options: EngineOptions,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw_log = RawLog::open(options.raw_log.clone()).await;
    let mut buf = Vec::with_capacity(128);

    loop {
        buf.clear();
        let mut line_reader = (&mut reader).take(MAX_LINE_BYTES);

        let read = tokio::select! {
            _ = shutdown.changed() => {
                debug!("GPS decode loop stopping");
                break;
            }
            read = line_reader.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                warn!("GPS disconnected: serial stream closed");
                break;
            }
            Ok(n) if n as u64 == MAX_LINE_BYTES && buf.last() != Some(&b'\n') => {
                debug!("GPS line exceeds {} bytes, dropping it", MAX_LINE_BYTES);
                tokio::time::sleep(options.decode_error_backoff).await;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("GPS disconnected: {}", e);
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                debug!("Undecodable GPS line: {}", e);
                tokio::time::sleep(options.decode_error_backoff).await;
                continue;
            }
        };

        if let Some(log) = raw_log.as_mut() {
            log.append(line).await;
        }

        let Some(decoded) = parse_sentence(line) else {
            continue;
        };
        if let Some(e) = &decoded.error {
            debug!("Error parsing GPS sentence: {}", e);
        }
        if !decoded.fragment.is_empty() {
            let mut fix = write_state(&state);
            let had_fix = fix.acquired;
            fix.apply(&decoded.fragment);
            if fix.acquired && !had_fix {
                info!("GPS fix fields complete");
            }
        }
    }

    write_state(&state).connected = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::io;
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    const GGA: &str = "$GPGGA,123519.00,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";
    const RMC: &str = "$GPRMC,123520.00,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const GSV: &str = "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74\r\n";

    fn fast_options() -> EngineOptions {
        EngineOptions {
            raw_log: None,
            decode_error_backoff: Duration::from_millis(10),
        }
    }

    async fn until_disconnected(engine: &GpsEngine) {
        while engine.is_connected() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_gga_then_rmc_yields_fix() {
        let mock = Builder::new()
            .read(GGA.as_bytes())
            .read(GSV.as_bytes())
            .read(RMC.as_bytes())
            .build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        let fix = engine.wait_for_fix(Duration::from_secs(5)).await;
        assert!(fix.fix_acquired);
        assert_eq!(
            fix.timestamp,
            NaiveDate::from_ymd_opt(1994, 3, 23)
                .unwrap()
                .and_hms_opt(12, 35, 20)
                .unwrap()
        );
        assert!((fix.latitude - (48.0 + 7.038 / 60.0)).abs() < 1e-9);
        assert!((fix.longitude - (11.0 + 31.0 / 60.0)).abs() < 1e-9);
        assert_eq!(fix.altitude, 545.4);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_end_of_stream_disconnects_but_keeps_fields() {
        let mock = Builder::new().read(GGA.as_bytes()).build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        until_disconnected(&engine).await;
        let state = engine.snapshot();
        assert!(!state.connected);
        assert_eq!(state.altitude, 545.4);
        assert_eq!(state.time_of_day, NaiveTime::from_hms_opt(12, 35, 19));
        assert!(!state.acquired);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_serial_fault_is_terminal() {
        let mock = Builder::new()
            .read(GGA.as_bytes())
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
            .build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        until_disconnected(&engine).await;
        // Fields decoded before the fault are kept
        assert_eq!(engine.snapshot().altitude, 545.4);

        engine.close().await;
        assert!(!engine.is_connected());
        assert!(engine.task.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_line_is_skipped() {
        let mock = Builder::new()
            .read(&[0xFF, 0xFE, 0x47, b'\n'])
            .read(GGA.as_bytes())
            .read(RMC.as_bytes())
            .build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        let fix = engine.wait_for_fix(Duration::from_secs(5)).await;
        assert!(fix.fix_acquired);
        engine.close().await;
    }

    #[tokio::test]
    async fn test_malformed_sentence_does_not_clear_fix() {
        let bad = "$GPRMC,123521.00,A,48x7.040,N,01131.002,E,022.4,084.4,230394,003.1,W*6A\r\n";
        let mock = Builder::new()
            .read(GGA.as_bytes())
            .read(RMC.as_bytes())
            .read(bad.as_bytes())
            .build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        until_disconnected(&engine).await;
        let state = engine.snapshot();
        assert!(state.acquired);
        // Time precedes the malformed latitude; position is untouched
        assert_eq!(state.time_of_day, NaiveTime::from_hms_opt(12, 35, 21));
        assert!((state.latitude - (48.0 + 7.038 / 60.0)).abs() < 1e-9);
        engine.close().await;
    }

    #[tokio::test]
    async fn test_fields_before_malformed_field_applied() {
        let bad_altitude = "$GPGGA,123519.00,4807.038,N,01131.000,E,1,08,0.9,54S.4,M,46.9,M,,*47\r\n";
        let mock = Builder::new().read(bad_altitude.as_bytes()).build();
        let mut engine = GpsEngine::spawn(mock, fast_options());

        until_disconnected(&engine).await;
        let state = engine.snapshot();
        assert_eq!(state.time_of_day, NaiveTime::from_hms_opt(12, 35, 19));
        assert!((state.latitude - (48.0 + 7.038 / 60.0)).abs() < 1e-9);
        assert!((state.longitude - (11.0 + 31.0 / 60.0)).abs() < 1e-9);
        assert!(state.altitude.is_nan());
        engine.close().await;
    }

    #[tokio::test]
    async fn test_overlong_line_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gps.txt");
        let garbage = vec![b'A'; 4 * MAX_LINE_BYTES as usize];
        let mock = Builder::new()
            .read(&garbage)
            .read(GGA.as_bytes())
            .read(RMC.as_bytes())
            .build();
        let mut engine = GpsEngine::spawn(
            mock,
            EngineOptions {
                raw_log: Some(path.clone()),
                decode_error_backoff: Duration::from_millis(10),
            },
        );

        until_disconnected(&engine).await;
        assert!(engine.snapshot().acquired);
        engine.close().await;

        // Only the sentences reached the stream log
        let logged = std::fs::read_to_string(&path).unwrap();
        assert_eq!(logged, format!("{}\n{}\n", GGA.trim(), RMC.trim()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_already_available_returns_immediately() {
        let (mut gps, receiver) = tokio::io::duplex(1024);
        let mut engine = GpsEngine::spawn(receiver, fast_options());

        gps.write_all(GGA.as_bytes()).await.unwrap();
        gps.write_all(RMC.as_bytes()).await.unwrap();
        while !engine.snapshot().acquired {
            tokio::task::yield_now().await;
        }

        let expected = engine.snapshot();
        let started = Instant::now();
        let fix = engine.wait_for_fix(Duration::from_secs(1800)).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(fix.fix_acquired);
        assert_eq!(fix.latitude, expected.latitude);
        assert_eq!(fix.longitude, expected.longitude);
        assert_eq!(fix.altitude, expected.altitude);
        assert_eq!(Some(fix.timestamp), expected.timestamp());

        // Engine still connected while the receiver keeps the line open
        assert!(engine.is_connected());
        engine.close().await;
        assert!(!engine.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_gps_waits_full_timeout() {
        let engine = GpsEngine::disconnected();
        assert!(!engine.is_connected());

        let before = Local::now().naive_local();
        let started = Instant::now();
        let fix = engine.wait_for_fix(Duration::from_secs(30 * 60)).await;

        assert!(started.elapsed() >= Duration::from_secs(30 * 60));
        assert!(!fix.fix_acquired);
        assert!(fix.latitude.is_nan());
        assert!(fix.longitude.is_nan());
        assert!(fix.altitude.is_nan());
        assert!(fix.timestamp >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fix_times_out() {
        let (mut gps, receiver) = tokio::io::duplex(1024);
        let mut engine = GpsEngine::spawn(receiver, fast_options());
        gps.write_all(GGA.as_bytes()).await.unwrap();

        let fix = engine.wait_for_fix(Duration::from_secs(60)).await;
        assert!(!fix.fix_acquired);
        // Last known position is still reported
        assert_eq!(fix.altitude, 545.4);

        engine.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_gps, receiver) = tokio::io::duplex(64);
        let mut engine = GpsEngine::spawn(receiver, fast_options());

        engine.close().await;
        engine.close().await;
        assert!(!engine.is_connected());

        let mut never_connected = GpsEngine::disconnected();
        never_connected.close().await;
        assert!(!never_connected.is_connected());
    }

    #[tokio::test]
    async fn test_raw_stream_logged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gps.txt");
        let mock = Builder::new()
            .read(GGA.as_bytes())
            .read(GSV.as_bytes())
            .read(&[0xC3, 0x28, b'\n'])
            .build();
        let mut engine = GpsEngine::spawn(
            mock,
            EngineOptions {
                raw_log: Some(path.clone()),
                decode_error_backoff: Duration::from_millis(1),
            },
        );

        until_disconnected(&engine).await;
        engine.close().await;

        let logged = std::fs::read_to_string(&path).unwrap();
        assert_eq!(logged, format!("{}\n{}\n", GGA.trim(), GSV.trim()));
    }

    #[tokio::test]
    async fn test_unopenable_raw_log_is_not_fatal() {
        let mock = Builder::new().read(GGA.as_bytes()).read(RMC.as_bytes()).build();
        let mut engine = GpsEngine::spawn(
            mock,
            EngineOptions {
                raw_log: Some(PathBuf::from("/nonexistent/dir/gps.txt")),
                decode_error_backoff: Duration::from_millis(1),
            },
        );

        until_disconnected(&engine).await;
        assert!(engine.snapshot().acquired);
        engine.close().await;
    }

    #[test]
    fn test_options_from_config() {
        let mut config = GpsConfig::default();
        config.raw_log = Some(PathBuf::from("gps.txt"));
        config.decode_error_backoff_ms = 250;

        let options = EngineOptions::from(&config);
        assert_eq!(options.raw_log, Some(PathBuf::from("gps.txt")));
        assert_eq!(options.decode_error_backoff, Duration::from_millis(250));
    }
}
