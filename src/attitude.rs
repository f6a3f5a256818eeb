use serde::{Serialize, Serializer};

use crate::nmea::{parse_field, Sentence};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
/// Vendor sentence that last updated the attitude
pub enum AttitudeSource {
    /// Nothing received yet
    #[default]
    None,
    /// `GPNAV`: heading, pitch and roll
    Nav,
    /// `GPYBM`: heading and pitch
    Ybm,
    /// `PSTI,030`: roll, pitch and heading
    Psti,
    /// `GPTRA`: heading only
    Tra,
}

impl AttitudeSource {
    /// Status label shown to monitoring clients
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Nav => "GPNAV",
            Self::Ybm => "GPYBM",
            Self::Psti => "PSTI",
            Self::Tra => "GPTRA",
        }
    }
}

impl Serialize for AttitudeSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.label())
    }
}

/// Field layout of one vendor attitude sentence
struct Variant {
    source: AttitudeSource,
    tags: &'static [&'static str],
    min_fields: usize,
    heading: Option<usize>,
    pitch: Option<usize>,
    roll: Option<usize>,
}

/// Tried in order, the first matching variant wins
const VARIANTS: [Variant; 4] = [
    Variant {
        source: AttitudeSource::Nav,
        tags: &["GPNAV", "GNAV"],
        min_fields: 16,
        heading: Some(13),
        pitch: Some(14),
        roll: Some(15),
    },
    Variant {
        source: AttitudeSource::Ybm,
        tags: &["GPYBM", "PYBM"],
        min_fields: 5,
        heading: Some(2),
        pitch: Some(4),
        roll: None,
    },
    Variant {
        source: AttitudeSource::Psti,
        tags: &["PSTI,030"],
        min_fields: 5,
        heading: Some(4),
        pitch: Some(3),
        roll: Some(2),
    },
    Variant {
        source: AttitudeSource::Tra,
        tags: &["GPTRA", "PTRA"],
        min_fields: 3,
        heading: Some(2),
        pitch: None,
        roll: None,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
/// Latest tilt state; each field keeps its last written value
pub struct AttitudeState {
    /// Pitch in degrees, positive forward
    pub pitch: f64,
    /// Roll in degrees, positive right
    pub roll: f64,
    /// Heading in degrees
    pub heading: f64,
    /// Combined tilt angle `sqrt(pitch² + roll²)`
    pub angle: f64,
    /// Sentence kind of the last update
    pub status: AttitudeSource,
}

impl AttitudeState {
    /// Apply an attitude sentence, if it is one.
    ///
    /// Returns the variant that matched. Fields the variant does not carry,
    /// and carried fields that are empty or malformed, keep their value.
    pub fn update(&mut self, sentence: &Sentence) -> Option<AttitudeSource> {
        let variant = VARIANTS
            .iter()
            .find(|v| v.tags.iter().any(|tag| sentence.has_tag(tag)))?;
        let parts = sentence.fields();
        if parts.len() < variant.min_fields {
            return None;
        }
        let read = |idx: Option<usize>| idx.and_then(|i| parse_field::<f64>(parts.get(i)));
        if let Some(heading) = read(variant.heading) {
            self.heading = heading;
        }
        let pitch = read(variant.pitch);
        let roll = read(variant.roll);
        if let Some(pitch) = pitch {
            self.pitch = pitch;
        }
        if let Some(roll) = roll {
            self.roll = roll;
        }
        if pitch.is_some() || roll.is_some() {
            self.angle = self.pitch.hypot(self.roll);
        }
        self.status = variant.source;
        Some(variant.source)
    }
}
