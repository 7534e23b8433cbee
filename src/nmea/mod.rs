//! # NMEA Module
//!
//! Decoding of the NMEA 0183 sentences needed to acquire a GPS fix.
//!
//! This module handles:
//! - GGA sentences (time, position, altitude)
//! - RMC sentences (time, date, position)
//! - Projection of decimal degrees onto UTM coordinates
//!
//! Every other sentence type is ignored.

pub mod parser;
pub mod projection;

pub use parser::{parse_sentence, DecodedSentence, RawFixFragment};
pub use projection::{to_utm, UtmCoord};
