//! # Host Clock
//!
//! Sets the system clock from a GPS fix by running a privileged external
//! command. The command runs in the background; its outcome is only logged.

use chrono::NaiveDateTime;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClockConfig;

/// Argument format passed to the clock command (UTC)
pub const CLOCK_ARG_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Build the command line for `timestamp`
pub fn clock_command(config: &ClockConfig, timestamp: NaiveDateTime) -> Option<Vec<String>> {
    if !config.set_from_gps || config.command.is_empty() {
        return None;
    }
    let mut args = config.command.clone();
    args.push(timestamp.format(CLOCK_ARG_FORMAT).to_string());
    Some(args)
}

/// Spawn the clock update for `timestamp` (GPS time, UTC)
///
/// Returns the background task handle, or `None` when clock updates are
/// disabled. Callers are free to drop the handle.
pub fn set_system_clock(config: &ClockConfig, timestamp: NaiveDateTime) -> Option<JoinHandle<bool>> {
    let args = clock_command(config, timestamp)?;

    Some(tokio::spawn(async move {
        let (program, rest) = match args.split_first() {
            Some(split) => split,
            None => return false,
        };

        match Command::new(program).args(rest).output().await {
            Ok(output) if output.status.success() => {
                info!("System clock set to {} UTC", timestamp.format(CLOCK_ARG_FORMAT));
                true
            }
            Ok(output) => {
                warn!(
                    "Clock command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("Failed to run clock command '{}': {}", program, e);
                false
            }
        }
    }))
}
