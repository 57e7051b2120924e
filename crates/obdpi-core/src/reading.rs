//! Sensor readings
//!
//! A [`Reading`] is one snapshot of the vehicle's sensors, taken once per
//! acquisition tick. Any sensor field may be absent (unsupported PID, failed
//! query, ignition off) but the timestamp is always present.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Column order used for CSV export
pub const CSV_HEADERS: [&str; 7] = [
    "timestamp",
    "rpm",
    "speed_mph",
    "coolant_temp_f",
    "throttle_pct",
    "load_pct",
    "maf_gps",
];

/// One sensor snapshot in canonical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// UTC capture time, second resolution
    #[serde(with = "iso_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Engine speed (revolutions per minute)
    pub rpm: Option<u32>,
    /// Vehicle speed (miles per hour)
    pub speed_mph: Option<f64>,
    /// Engine coolant temperature (°F)
    pub coolant_temp_f: Option<f64>,
    /// Throttle position (0-100 %)
    pub throttle_pct: Option<f64>,
    /// Calculated engine load (0-100 %)
    pub load_pct: Option<f64>,
    /// Mass air flow (grams per second)
    pub maf_gps: Option<f64>,
}

impl Reading {
    /// Create a reading with every sensor field absent.
    ///
    /// The timestamp is truncated to whole seconds.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            rpm: None,
            speed_mph: None,
            coolant_temp_f: None,
            throttle_pct: None,
            load_pct: None,
            maf_gps: None,
        }
    }

    /// True when no sensor produced a value
    pub fn is_empty(&self) -> bool {
        self.present_fields() == 0
    }

    /// Number of sensor fields carrying a value
    pub fn present_fields(&self) -> usize {
        [
            self.rpm.is_some(),
            self.speed_mph.is_some(),
            self.coolant_temp_f.is_some(),
            self.throttle_pct.is_some(),
            self.load_pct.is_some(),
            self.maf_gps.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// ISO-8601 timestamp as it appears on the wire
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    /// Encode as a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from a JSON object in the wire shape
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Encode as a CSV row matching [`CSV_HEADERS`]; absent values are empty cells
    pub fn to_csv_row(&self) -> String {
        fn cell<T: ToString>(value: Option<T>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }

        [
            self.timestamp_string(),
            cell(self.rpm),
            cell(self.speed_mph),
            cell(self.coolant_temp_f),
            cell(self.throttle_pct),
            cell(self.load_pct),
            cell(self.maf_gps),
        ]
        .join(",")
    }
}

/// Serde adapter for second-resolution RFC 3339 timestamps.
///
/// Accepts both `Z` and `+00:00` offsets on input and always converts to UTC.
pub(crate) mod iso_seconds {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
    }
}

/// Parse a wire-format timestamp
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    iso_seconds::parse(raw)
}
