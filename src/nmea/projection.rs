//! # UTM Projection
//!
//! Converts WGS84 decimal degrees to Universal Transverse Mercator coordinates.
//! Uses the series expansion of the transverse Mercator projection, accurate to
//! well under a meter inside a zone.

/// Scale factor on the central meridian
const K0: f64 = 0.9996;

/// WGS84 first eccentricity squared
const E: f64 = 0.006_694_38;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

/// WGS84 equatorial radius in meters
const R: f64 = 6_378_137.0;

const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude band letters, 8 degrees each from 80S (band X spans 72N..84N)
const ZONE_LETTERS: &[u8] = b"CDEFGHJKLMNPQRSTUVWXX";

/// Projected position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmCoord {
    pub easting: f64,
    pub northing: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

/// Project a latitude/longitude pair onto UTM
///
/// Returns `None` outside the UTM latitude range (80S to 84N), for longitudes
/// outside -180..=180, or for non-finite input.
pub fn to_utm(latitude: f64, longitude: f64) -> Option<UtmCoord> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }
    if !(-80.0..=84.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }

    let zone_number = zone_number(latitude, longitude);
    let zone_letter = zone_letter(latitude);

    let lat_rad = latitude.to_radians();
    let lat_sin = lat_rad.sin();
    let lat_cos = lat_rad.cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let central_lon = f64::from(zone_number - 1) * 6.0 - 180.0 + 3.0;
    let dlon = wrap_degrees(longitude - central_lon).to_radians();

    let n = R / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;

    let a = lat_cos * dlon;
    let a2 = a * a;
    let a3 = a2 * a;
    let a4 = a3 * a;
    let a5 = a4 * a;
    let a6 = a5 * a;

    let m = R
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
            + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a2 / 2.0
                + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));

    if latitude < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    Some(UtmCoord {
        easting,
        northing,
        zone_number,
        zone_letter,
    })
}

fn zone_number(latitude: f64, longitude: f64) -> u8 {
    // Southwest Norway
    if (56.0..64.0).contains(&latitude) && (3.0..12.0).contains(&longitude) {
        return 32;
    }

    // Svalbard
    if (72.0..=84.0).contains(&latitude) && longitude >= 0.0 {
        if longitude < 9.0 {
            return 31;
        } else if longitude < 21.0 {
            return 33;
        } else if longitude < 33.0 {
            return 35;
        } else if longitude < 42.0 {
            return 37;
        }
    }

    // 180E folds back onto zone 1
    (((longitude + 180.0) / 6.0).floor() as i64).rem_euclid(60) as u8 + 1
}

fn zone_letter(latitude: f64) -> char {
    let index = ((latitude + 80.0) / 8.0).floor() as usize;
    ZONE_LETTERS[index.min(ZONE_LETTERS.len() - 1)] as char
}

fn wrap_degrees(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}
