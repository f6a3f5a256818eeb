use lazy_static::lazy_static;
use regex::Regex;

/// Start marker of every NMEA sentence
pub const SENTENCE_MARKER: char = '$';

#[derive(Debug, Clone, PartialEq)]
/// A framed, checksum-verified (or unchecked) NMEA sentence
pub struct Sentence {
    line: String,
    payload_end: usize,
    checked: bool,
}

impl Sentence {
    /// Validate a raw line.
    ///
    /// Lines not starting with `$` and lines whose checksum does not match
    /// are rejected. Lines without a `*` delimiter are accepted unchecked.
    pub fn validate(raw: &str) -> Option<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^\$(?P<payload>.*)\*(?P<cksum>[^*]*)$")
                .expect("Failed to compile regex");
        }
        let line = raw.trim();
        if !line.starts_with(SENTENCE_MARKER) {
            return None;
        }
        match RE.captures(line) {
            Some(caps) => {
                let payload = &caps["payload"];
                let calc_cksum = payload.as_bytes().iter().fold(0u8, |acc, &x| acc ^ x);
                if format!("{:02X}", calc_cksum) != caps["cksum"].to_ascii_uppercase() {
                    return None;
                }
                Some(Sentence {
                    payload_end: 1 + payload.len(),
                    line: line.to_string(),
                    checked: true,
                })
            }
            None => Some(Sentence {
                payload_end: line.len(),
                line: line.to_string(),
                checked: false,
            }),
        }
    }

    /// The full line, marker and checksum included
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The text between the marker and the checksum delimiter
    pub fn payload(&self) -> &str {
        &self.line[1..self.payload_end]
    }

    /// Whether a checksum was present and verified
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Comma separated fields of the payload; field 0 is the address (e.g. `GPGGA`)
    pub fn fields(&self) -> Vec<&str> {
        self.payload().split(',').collect()
    }

    /// The two character talker prefix (`GP`, `GL`, ...)
    pub fn talker(&self) -> &str {
        self.payload().get(..2).unwrap_or("")
    }

    /// Substring match against the full line
    pub fn has_tag(&self, tag: &str) -> bool {
        self.line.contains(tag)
    }
}

/// Parse a numeric field; empty or malformed fields yield `None`
pub(crate) fn parse_field<T: std::str::FromStr>(field: Option<&&str>) -> Option<T> {
    field
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .and_then(|f| f.parse().ok())
}

/// Convert a `DDMM.MMMM` / `DDDMM.MMMM` coordinate to decimal degrees.
///
/// The two digits before the decimal point start the minutes, everything
/// before them is degrees. `S` and `W` negate. Anything malformed is `0.0`.
pub fn parse_coordinate(coord: &str, hemisphere: &str) -> f64 {
    if coord.is_empty() || hemisphere.is_empty() || !coord.is_ascii() {
        return 0.0;
    }
    let Some(dot) = coord.find('.') else {
        return 0.0;
    };
    if dot < 2 {
        return 0.0;
    }
    let degrees = match &coord[..dot - 2] {
        "" => Some(0.0),
        deg => deg.parse::<f64>().ok(),
    };
    let minutes = coord[dot - 2..].parse::<f64>().ok();
    match (degrees, minutes) {
        (Some(deg), Some(min)) => {
            let decimal = deg + min / 60.0;
            if matches!(hemisphere, "S" | "W") {
                -decimal
            } else {
                decimal
            }
        }
        _ => 0.0,
    }
}
