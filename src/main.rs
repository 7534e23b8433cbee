//! # Chamber Logger
//!
//! Logs CO2, temperature and humidity from an SCD4x sensor into a CSV file
//! geotagged by a serial NMEA GPS receiver.
//!
//! Usage: `chamber-logger [config.toml]` (default `config/default.toml`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use chamber_logger::acquisition::{Acquisition, AcquisitionSettings};
use chamber_logger::config::{Config, LoggingConfig, OutputConfig};
use chamber_logger::gps::GpsEngine;
use chamber_logger::sensor::Scd4xConnector;
use chamber_logger::telemetry::{ConnectionStatus, StatusFile, StatusPublisher};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point
///
/// # Control Flow
///
/// 1. Load configuration and open the status file it names
/// 2. Install a panic hook that leaves `Error` in the status file
/// 3. Set up logging (stdout + log file)
/// 4. Open the GPS receiver (a failure only disables GPS)
/// 5. Run the acquisition loop until it fails or Ctrl+C is pressed
///
/// # Errors
///
/// Returns error if the configuration is invalid, logging cannot be set up
/// or the acquisition loop stops on a fatal condition. The status file then
/// holds `Error`.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (status, config) = open_status(&config_path, &OutputConfig::default().status_file);
    install_panic_hook(status.clone());
    let config = config?;

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => return Err(startup_failed(&status, e)),
    };
    info!("Chamber Logger v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path.display());

    let mut gps = if config.gps.enabled {
        match GpsEngine::open(&config.gps, status.as_ref()) {
            Ok(engine) => {
                match engine.device_path() {
                    Some(path) => info!("GPS receiver opened at: {}", path),
                    None => warn!("No serial ports found, continuing without GPS"),
                }
                Some(engine)
            }
            Err(e) => {
                warn!("Failed to open GPS receiver, continuing without GPS: {}", e);
                Some(GpsEngine::disconnected())
            }
        }
    } else {
        info!("GPS disabled in configuration");
        None
    };

    let mut acquisition = Acquisition::new(
        AcquisitionSettings::from(&config),
        Scd4xConnector::new(&config.sensor),
        status.clone(),
    );

    info!("Press Ctrl+C to exit");

    let outcome = tokio::select! {
        result = acquisition.run(gps.as_ref()) => match result {
            Ok(never) => match never {},
            Err(e) => Err(e),
        },

        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
    };

    if let Some(engine) = gps.as_mut() {
        engine.close().await;
    }

    match outcome {
        Ok(()) => {
            status.publish(ConnectionStatus::Idle);
            Ok(())
        }
        // The loop has already published `Error` and logged the cause
        Err(e) => Err(e).context("acquisition failed"),
    }
}

/// Load the configuration and open the status sink it names
///
/// When loading fails the sink is opened at `fallback_status` instead and
/// set to `Error`.
fn open_status(config_path: &Path, fallback_status: &Path) -> (Arc<StatusFile>, Result<Config>) {
    match load_config(config_path) {
        Ok(config) => (Arc::new(StatusFile::new(&config.output.status_file)), Ok(config)),
        Err(e) => {
            let status = Arc::new(StatusFile::new(fallback_status));
            let e = startup_failed(&status, e);
            (status, Err(e))
        }
    }
}

/// Publish `Error` for a failure before the acquisition loop started
fn startup_failed(status: &StatusFile, e: anyhow::Error) -> anyhow::Error {
    status.publish(ConnectionStatus::Error);
    e
}

/// Load `path`, falling back to defaults when the file does not exist
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        eprintln!(
            "Configuration file {} not found, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Build the `EnvFilter`: `RUST_LOG` when set, else the configured level
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize stdout logging plus the optional log file
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the whole run.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer().with_target(false);

    let (file_layer, guard) = match config.file.trim() {
        "" => (None, None),
        file => {
            let path = Path::new(file);
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("invalid log file path {}", path.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")?;

    Ok(guard)
}

/// Write `Error` to the status sink, print the panic and abort
///
/// Panics in spawned tasks abort too, as they do in release builds, instead
/// of being caught by the runtime while acquisition carries on.
fn install_panic_hook(status: Arc<StatusFile>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        status.publish(ConnectionStatus::Error);
        default_hook(info);
        std::process::abort();
    }));
}
