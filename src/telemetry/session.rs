//! CSV result file for one acquisition session.
//!
//! Layout:
//!
//! ```text
//! Latitude,<deg>
//! Longitude,<deg>
//! Altitude,<m> m
//! Time,CO2 (ppm),Temperature (C),Humidity (%)
//! 2024-05-01T12:00:05,612,22.41,48.3
//! ```
//!
//! The header is written and flushed before the file is handed out, and rows
//! are only ever appended, so a reader may open the file at any moment.

use chrono::NaiveDateTime;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ChamberError, Result};
use crate::sensor::Measurement;

/// Column header row
pub const CSV_HEADER: &str = "Time,CO2 (ppm),Temperature (C),Humidity (%)";

/// Number of metadata lines before the column header
pub const METADATA_LINES: usize = 3;

/// Row timestamp format (local time, no offset)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// File name timestamp format
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// One timestamped measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub timestamp: NaiveDateTime,
    pub co2_ppm: f64,
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
}

impl SensorReading {
    pub fn new(timestamp: NaiveDateTime, measurement: Measurement) -> Self {
        Self {
            timestamp,
            co2_ppm: measurement.co2_ppm,
            temperature_c: measurement.temperature_c,
            relative_humidity_pct: measurement.relative_humidity_pct,
        }
    }

    /// Format as a CSV data row (without line terminator)
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.co2_ppm,
            self.temperature_c,
            self.relative_humidity_pct
        )
    }
}

/// Parse a CSV data row written by [`SensorReading::to_row`]
pub fn parse_row(line: &str) -> Result<SensorReading> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() != 4 {
        return Err(ChamberError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected 4 columns, got {}", fields.len()),
        )));
    }

    let invalid = |what: &str, value: &str| {
        ChamberError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {} '{}'", what, value),
        ))
    };

    Ok(SensorReading {
        timestamp: NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT)
            .map_err(|_| invalid("timestamp", fields[0]))?,
        co2_ppm: fields[1].parse().map_err(|_| invalid("CO2", fields[1]))?,
        temperature_c: fields[2]
            .parse()
            .map_err(|_| invalid("temperature", fields[2]))?,
        relative_humidity_pct: fields[3]
            .parse()
            .map_err(|_| invalid("humidity", fields[3]))?,
    })
}

/// Position written into the file header
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderMetadata {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
}

impl HeaderMetadata {
    pub fn unknown() -> Self {
        Self {
            latitude: f64::NAN,
            longitude: f64::NAN,
            altitude: f64::NAN,
        }
    }
}

/// An open result file
///
/// Created once per process run; reconnecting to the sensor keeps appending
/// to the same file.
#[derive(Debug)]
pub struct Session {
    path: PathBuf,
    file: File,
    header: HeaderMetadata,
    started_at: NaiveDateTime,
    rows: u64,
}

impl Session {
    /// Create the next result file in `results_dir` and write its header
    ///
    /// The directory is created if absent. The file is named
    /// `<seq>_<timestamp>_<suffix>.csv` where `seq` is one past the highest
    /// sequence number already present.
    pub fn create(
        results_dir: &Path,
        suffix: &str,
        started_at: NaiveDateTime,
        header: HeaderMetadata,
    ) -> Result<Self> {
        fs::create_dir_all(results_dir)?;

        let seq = next_sequence(results_dir)?;
        let name = format!(
            "{:04}_{}_{}.csv",
            seq,
            started_at.format(FILE_TIMESTAMP_FORMAT),
            suffix
        );
        let path = results_dir.join(name);

        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "Latitude,{}", header.latitude)?;
        writeln!(file, "Longitude,{}", header.longitude)?;
        writeln!(file, "Altitude,{} m", header.altitude)?;
        writeln!(file, "{}", CSV_HEADER)?;
        file.flush()?;

        info!("Writing results to {}", path.display());

        Ok(Self {
            path,
            file,
            header,
            started_at,
            rows: 0,
        })
    }

    /// Append one reading and flush it to disk
    pub fn append(&mut self, reading: &SensorReading) -> Result<()> {
        writeln!(self.file, "{}", reading.to_row())?;
        self.file.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &HeaderMetadata {
        &self.header
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    /// Rows appended so far
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// One past the largest leading sequence number among the directory's entries
pub fn next_sequence(results_dir: &Path) -> Result<u32> {
    let mut highest = 0;
    for entry in fs::read_dir(results_dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
        if name[digits.len()..].starts_with('_') {
            if let Ok(seq) = digits.parse::<u32>() {
                highest = highest.max(seq);
            }
        }
    }
    Ok(highest + 1)
}
