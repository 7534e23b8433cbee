//! Fix state shared between the decode task and its consumers.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::nmea::{RawFixFragment, UtmCoord};

/// Latest known GPS fix fields
///
/// Each field is overwritten independently as sentences arrive, so a snapshot
/// may combine a newer position with an older date. Unknown coordinates are
/// `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFixState {
    pub time_of_day: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub projected: Option<UtmCoord>,
    /// Set once time, date, latitude and longitude have all been seen
    pub acquired: bool,
    pub connected: bool,
}

impl GpsFixState {
    /// All-unknown state for an engine attached to a receiver
    pub fn new(connected: bool) -> Self {
        Self {
            time_of_day: None,
            date: None,
            latitude: f64::NAN,
            longitude: f64::NAN,
            altitude: f64::NAN,
            projected: None,
            acquired: false,
            connected,
        }
    }

    /// Merge the fields present in `fragment`, leaving the others untouched
    pub fn apply(&mut self, fragment: &RawFixFragment) {
        if let Some(time) = fragment.time_of_day {
            self.time_of_day = Some(time);
        }
        if let Some(date) = fragment.date {
            self.date = Some(date);
        }
        if let Some(lat) = fragment.latitude {
            self.latitude = lat;
        }
        if let Some(lon) = fragment.longitude {
            self.longitude = lon;
        }
        if let Some(alt) = fragment.altitude {
            self.altitude = alt;
        }
        if let Some(utm) = fragment.projected {
            self.projected = Some(utm);
        }

        if self.has_fix() {
            self.acquired = true;
        }
    }

    /// Whether every field needed for a fix is known
    pub fn has_fix(&self) -> bool {
        self.time_of_day.is_some()
            && self.date.is_some()
            && !self.latitude.is_nan()
            && !self.longitude.is_nan()
    }

    /// GPS date and time combined, if both are known
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time_of_day?))
    }
}

impl Default for GpsFixState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Snapshot returned by [`GpsEngine::wait_for_fix`](super::GpsEngine::wait_for_fix)
///
/// When no fix was acquired, `timestamp` is the local wall-clock time at the
/// moment the wait gave up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixResult {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub fix_acquired: bool,
}
