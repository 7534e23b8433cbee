//! # NMEA Sentence Parser
//!
//! Decodes GGA and RMC sentences into [`RawFixFragment`]s.
//!
//! Sentences are identified by a substring match on the first comma-delimited
//! field, so any talker id (`$GPGGA`, `$GNGGA`, ...) is accepted. Empty fields
//! leave the matching fragment field unknown.
//!
//! Fields are decoded in sentence order. The first malformed field stops
//! decoding: the fields before it are kept, the rest of the sentence is
//! dropped.

use chrono::{NaiveDate, NaiveTime};

use super::projection::{to_utm, UtmCoord};
use crate::error::{ChamberError, Result};

/// Feet to meters conversion factor for altitudes reported in `F`
pub const FEET_TO_METERS: f64 = 0.3048;

/// GGA field indices
const GGA_TIME: usize = 1;
const GGA_LAT: usize = 2;
const GGA_LAT_DIR: usize = 3;
const GGA_LON: usize = 4;
const GGA_LON_DIR: usize = 5;
const GGA_ALT: usize = 9;
const GGA_ALT_UNIT: usize = 10;

/// RMC field indices
const RMC_TIME: usize = 1;
const RMC_LAT: usize = 3;
const RMC_LAT_DIR: usize = 4;
const RMC_LON: usize = 5;
const RMC_LON_DIR: usize = 6;
const RMC_DATE: usize = 9;

/// Fix fields decoded from a single sentence
///
/// `None` means the sentence did not carry the field (or carried it empty).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFixFragment {
    pub time_of_day: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Altitude in meters
    pub altitude: Option<f64>,
    /// Unit letter as received, before conversion to meters
    pub altitude_unit: Option<char>,
    pub projected: Option<UtmCoord>,
}

impl RawFixFragment {
    pub fn is_empty(&self) -> bool {
        *self == RawFixFragment::default()
    }
}

/// Outcome of decoding one sentence
#[derive(Debug)]
pub struct DecodedSentence {
    /// Fields decoded before the first malformed one (all of them when `error` is `None`)
    pub fragment: RawFixFragment,
    /// The malformed field that stopped decoding
    pub error: Option<ChamberError>,
}

impl DecodedSentence {
    fn new(fragment: RawFixFragment, result: Result<()>) -> Self {
        Self {
            fragment,
            error: result.err(),
        }
    }
}

/// Kind of sentence recognised by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceKind {
    Gga,
    Rmc,
}

/// Identify a sentence from its first field
pub fn sentence_kind(line: &str) -> Option<SentenceKind> {
    let header = line.split(',').next()?;
    if header.contains("GGA") {
        Some(SentenceKind::Gga)
    } else if header.contains("RMC") {
        Some(SentenceKind::Rmc)
    } else {
        None
    }
}

/// Parse one line from the GPS receiver
///
/// # Returns
///
/// `None` when the sentence type is not one the parser handles. Otherwise
/// the decoded fields, plus the error of the field that stopped decoding.
///
/// # Examples
///
/// ```
/// use chamber_logger::nmea::parse_sentence;
///
/// let line = "$GPGGA,123519.00,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
/// let decoded = parse_sentence(line).unwrap();
/// assert!(decoded.error.is_none());
/// assert!((decoded.fragment.latitude.unwrap() - 48.1173).abs() < 1e-4);
/// ```
pub fn parse_sentence(line: &str) -> Option<DecodedSentence> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(',').collect();

    match sentence_kind(line)? {
        SentenceKind::Gga => Some(decode_gga(&fields)),
        SentenceKind::Rmc => Some(decode_rmc(&fields)),
    }
}

/// Decode a GGA sentence (time, position, altitude)
pub fn decode_gga(fields: &[&str]) -> DecodedSentence {
    let mut fragment = RawFixFragment::default();
    let result = fill_gga(fields, &mut fragment);
    DecodedSentence::new(fragment, result)
}

fn fill_gga(fields: &[&str], fragment: &mut RawFixFragment) -> Result<()> {
    fragment.time_of_day = parse_time(field(fields, GGA_TIME))?;
    fragment.latitude = parse_coordinate(field(fields, GGA_LAT), field(fields, GGA_LAT_DIR), 2)?;
    fragment.longitude = parse_coordinate(field(fields, GGA_LON), field(fields, GGA_LON_DIR), 3)?;

    let alt = field(fields, GGA_ALT);
    if !alt.is_empty() {
        let mut altitude = parse_number(alt)
            .ok_or_else(|| ChamberError::Nmea(format!("invalid altitude '{}'", alt)))?;
        let unit = field(fields, GGA_ALT_UNIT).chars().next();
        if unit == Some('F') {
            altitude *= FEET_TO_METERS;
        }
        fragment.altitude = Some(altitude);
        fragment.altitude_unit = unit;
    }

    if let (Some(lat), Some(lon)) = (fragment.latitude, fragment.longitude) {
        fragment.projected = to_utm(lat, lon);
    }
    Ok(())
}

/// Decode an RMC sentence (time, date, position)
pub fn decode_rmc(fields: &[&str]) -> DecodedSentence {
    let mut fragment = RawFixFragment::default();
    let result = fill_rmc(fields, &mut fragment);
    DecodedSentence::new(fragment, result)
}

fn fill_rmc(fields: &[&str], fragment: &mut RawFixFragment) -> Result<()> {
    fragment.time_of_day = parse_time(field(fields, RMC_TIME))?;
    fragment.date = parse_date(field(fields, RMC_DATE))?;
    fragment.latitude = parse_coordinate(field(fields, RMC_LAT), field(fields, RMC_LAT_DIR), 2)?;
    fragment.longitude = parse_coordinate(field(fields, RMC_LON), field(fields, RMC_LON_DIR), 3)?;
    Ok(())
}

/// Field at `index`, or empty if the sentence is shorter
fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).map(|f| f.trim()).unwrap_or("")
}

/// `HHMMSS` with an optional fractional part
fn parse_time(s: &str) -> Result<Option<NaiveTime>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(s, "%H%M%S%.f")
        .map(Some)
        .map_err(|e| ChamberError::Nmea(format!("invalid time '{}': {}", s, e)))
}

/// `DDMMYY`
fn parse_date(s: &str) -> Result<Option<NaiveDate>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%d%m%y")
        .map(Some)
        .map_err(|e| ChamberError::Nmea(format!("invalid date '{}': {}", s, e)))
}

/// Finite decimal number; `nan` and `inf` spellings are malformed
fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert `DDMM.mmmm` / `DDDMM.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }

    let malformed = || ChamberError::Nmea(format!("invalid coordinate '{}'", value));

    let degrees = value
        .get(..degree_digits)
        .and_then(parse_number)
        .ok_or_else(malformed)?;
    let minutes = value
        .get(degree_digits..)
        .and_then(parse_number)
        .ok_or_else(malformed)?;

    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "S" | "W" => Ok(Some(-decimal)),
        _ => Ok(Some(decimal)),
    }
}
