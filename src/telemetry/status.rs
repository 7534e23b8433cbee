//! Connection status token shared with the dashboard.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Status shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    WaitingForGps,
    ConnectingToGps,
    ConnectingToSensor,
    Measuring,
    Error,
}

impl ConnectionStatus {
    pub const ALL: [ConnectionStatus; 6] = [
        ConnectionStatus::Idle,
        ConnectionStatus::WaitingForGps,
        ConnectionStatus::ConnectingToGps,
        ConnectionStatus::ConnectingToSensor,
        ConnectionStatus::Measuring,
        ConnectionStatus::Error,
    ];

    /// Token written to the status file
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "Idle",
            ConnectionStatus::WaitingForGps => "Waiting for GPS",
            ConnectionStatus::ConnectingToGps => "Connecting to GPS",
            ConnectionStatus::ConnectingToSensor => "Connecting to sensor",
            ConnectionStatus::Measuring => "Measuring",
            ConnectionStatus::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        ConnectionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or(())
    }
}

/// Capability for publishing the current status
///
/// Publishing never fails from the caller's point of view; sinks log their
/// own errors.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, status: ConnectionStatus);
}

/// Status sink backed by a small text file, overwritten on every update
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status, or `None` when the file is missing or unreadable
    pub fn read(&self) -> Option<ConnectionStatus> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.lines().next()?.parse().ok()
    }

    /// Write `status`, returning any I/O error
    pub fn write(&self, status: ConnectionStatus) -> std::io::Result<()> {
        fs::write(&self.path, status.as_str())
    }
}

impl StatusPublisher for StatusFile {
    fn publish(&self, status: ConnectionStatus) {
        debug!("Status: {}", status);
        if let Err(e) = self.write(status) {
            warn!("Failed to write status file {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Status sink that records every published status
    #[derive(Default)]
    pub struct RecordingStatus {
        pub history: Mutex<Vec<ConnectionStatus>>,
    }

    impl RecordingStatus {
        pub fn history(&self) -> Vec<ConnectionStatus> {
            self.history.lock().unwrap().clone()
        }

        pub fn last(&self) -> Option<ConnectionStatus> {
            self.history.lock().unwrap().last().copied()
        }
    }

    impl StatusPublisher for RecordingStatus {
        fn publish(&self, status: ConnectionStatus) {
            self.history.lock().unwrap().push(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tokens_round_trip() {
        for status in ConnectionStatus::ALL {
            assert_eq!(status.as_str().parse::<ConnectionStatus>(), Ok(status));
        }
        assert!("Calibrating".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn test_publish_overwrites_file() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("status.txt"));

        status.publish(ConnectionStatus::ConnectingToSensor);
        assert_eq!(status.read(), Some(ConnectionStatus::ConnectingToSensor));

        status.publish(ConnectionStatus::Measuring);
        assert_eq!(status.read(), Some(ConnectionStatus::Measuring));
        assert_eq!(
            fs::read_to_string(status.path()).unwrap(),
            "Measuring"
        );
    }

    #[test]
    fn test_missing_file_reads_as_unknown() {
        let dir = tempdir().unwrap();
        let status = StatusFile::new(dir.path().join("absent.txt"));
        assert_eq!(status.read(), None);
    }

    #[test]
    fn test_garbled_file_reads_as_unknown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.txt");
        fs::write(&path, "Measu").unwrap();
        assert_eq!(StatusFile::new(path).read(), None);
    }

    #[test]
    fn test_publish_to_unwritable_path_does_not_panic() {
        let status = StatusFile::new("/nonexistent/dir/status.txt");
        status.publish(ConnectionStatus::Error);
        assert_eq!(status.read(), None);
    }
}
