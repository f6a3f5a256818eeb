use serde::{Deserialize, Serialize};

use crate::nmea::{parse_coordinate, parse_field, Sentence};

/// Minimum number of fields in a usable GGA sentence
const GGA_MIN_FIELDS: usize = 15;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Fix quality reported by the receiver
pub enum FixQuality {
    /// No fix (or any unrecognized quality code)
    NoFix,
    /// Autonomous GPS fix
    Gps,
    /// Differential GPS fix
    Dgps,
    /// RTK with fixed integer ambiguities
    RtkFixed,
    /// RTK with float ambiguities
    RtkFloat,
}

impl FixQuality {
    /// Map a GGA quality code
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Gps,
            2 => Self::Dgps,
            4 => Self::RtkFixed,
            5 => Self::RtkFloat,
            _ => Self::NoFix,
        }
    }

    /// Rough horizontal accuracy estimate in centimetres
    pub fn estimated_accuracy(&self, hdop: f64) -> f64 {
        match self {
            Self::RtkFixed => 2.0,
            Self::RtkFloat => 20.0,
            Self::Dgps => 50.0,
            Self::Gps if hdop < 10.0 => (hdop * 100.0).min(1000.0),
            Self::Gps => 1000.0,
            Self::NoFix => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Latest position fix, overwritten in place
pub struct PositionFix {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Altitude above mean sea level
    pub alt: f64,
    /// Raw GGA quality code
    pub quality: u8,
    /// Satellites used (raised by satellites-in-view reports)
    pub satellites: u32,
    /// Horizontal dilution of precision
    pub hdop: f64,
}

impl PositionFix {
    /// Decoded fix quality
    pub fn fix_quality(&self) -> FixQuality {
        FixQuality::from_code(self.quality)
    }

    /// Apply a GGA sentence. Every field is optional: an empty or malformed
    /// field leaves the corresponding value untouched.
    ///
    /// Returns `false` if the sentence is too short to be a fix sentence.
    pub fn update_from_gga(&mut self, sentence: &Sentence) -> bool {
        let parts = sentence.fields();
        if parts.len() < GGA_MIN_FIELDS {
            return false;
        }
        if !parts[2].is_empty() && !parts[4].is_empty() {
            self.lat = parse_coordinate(parts[2], parts[3]);
            self.lon = parse_coordinate(parts[4], parts[5]);
        }
        if let Some(quality) = parse_field(parts.get(6)) {
            self.quality = quality;
        }
        if let Some(sats) = parse_field(parts.get(7)) {
            self.satellites = sats;
        }
        if let Some(hdop) = parse_field(parts.get(8)) {
            self.hdop = hdop;
        }
        if let Some(alt) = parse_field(parts.get(9)) {
            self.alt = alt;
        }
        true
    }

    /// Raise the satellite count to at least `in_view`
    pub fn observe_in_view(&mut self, in_view: u32) {
        self.satellites = self.satellites.max(in_view);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gga(line: &str) -> Sentence {
        Sentence::validate(line).expect("valid sentence")
    }

    #[test]
    fn full_fix() {
        let mut fix = PositionFix::default();
        assert!(fix.update_from_gga(&gga(
            "$GNGGA,221515.00,4238.96342,N,07118.97943,W,2,12,1.04,36.7,M,-33.0,M,,0131*41"
        )));
        assert!((fix.lat - 42.649_390).abs() < 1e-5);
        assert!((fix.lon + 71.316_324).abs() < 1e-5);
        assert!((fix.alt - 36.7).abs() < 1e-9);
        assert_eq!(fix.quality, 2);
        assert_eq!(fix.fix_quality(), FixQuality::Dgps);
        assert_eq!(fix.satellites, 12);
        assert!((fix.hdop - 1.04).abs() < 1e-9);
    }

    #[test]
    fn partial_update_keeps_position() {
        let mut fix = PositionFix {
            lat: 10.0,
            lon: 20.0,
            alt: 30.0,
            ..Default::default()
        };
        assert!(fix.update_from_gga(&gga("$GPGGA,120000.00,,,,,4,,,,M,,M,,")));
        assert_eq!(fix.lat, 10.0);
        assert_eq!(fix.lon, 20.0);
        assert_eq!(fix.alt, 30.0);
        assert_eq!(fix.fix_quality(), FixQuality::RtkFixed);
    }

    #[test]
    fn malformed_field_is_skipped() {
        let mut fix = PositionFix::default();
        fix.hdop = 0.9;
        fix.update_from_gga(&gga("$GPGGA,120000.00,4807.038,N,01131.000,E,1,x,bad,545.4,M,,M,,"));
        assert_eq!(fix.hdop, 0.9);
        assert_eq!(fix.satellites, 0);
        assert!((fix.lat - 48.1173).abs() < 1e-4);
        assert!((fix.alt - 545.4).abs() < 1e-9);
    }

    #[test]
    fn short_sentence_is_ignored() {
        let mut fix = PositionFix::default();
        assert!(!fix.update_from_gga(&gga("$GPGGA,120000.00,4807.038,N")));
        assert_eq!(fix, PositionFix::default());
    }

    #[test]
    fn accuracy_mapping() {
        assert_eq!(FixQuality::from_code(4).estimated_accuracy(0.7), 2.0);
        assert_eq!(FixQuality::from_code(5).estimated_accuracy(0.7), 20.0);
        assert_eq!(FixQuality::from_code(2).estimated_accuracy(0.7), 50.0);
        assert!((FixQuality::from_code(1).estimated_accuracy(1.5) - 150.0).abs() < 1e-9);
        assert_eq!(FixQuality::from_code(1).estimated_accuracy(12.0), 1000.0);
        assert_eq!(FixQuality::from_code(0).estimated_accuracy(1.0), 0.0);
        assert_eq!(FixQuality::from_code(6), FixQuality::NoFix);
    }
}
