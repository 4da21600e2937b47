use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::limits::MINUTES_PER_DAY;

/// A string that is not a zero-padded 24h `HH:MM` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError(pub String);

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time must be in HH:MM format, got {:?}", self.0)
    }
}

impl std::error::Error for FormatError {}

/// Parse `HH:MM` (00:00 through 23:59) into minutes since midnight.
pub fn time_to_minutes(t: &str) -> Result<u16, FormatError> {
    let bytes = t.as_bytes();
    let well_formed = bytes.len() == 5
        && bytes[2] == b':'
        && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());
    if !well_formed {
        return Err(FormatError(t.to_string()));
    }
    let digit = |i: usize| u16::from(bytes[i] - b'0');
    let hours = digit(0) * 10 + digit(1);
    let minutes = digit(3) * 10 + digit(4);
    if hours > 23 || minutes > 59 {
        return Err(FormatError(t.to_string()));
    }
    Ok(hours * 60 + minutes)
}

/// Format minutes since midnight as zero-padded `HH:MM`.
/// No wraparound: `m` must stay below 1440.
pub fn minutes_to_time(m: u16) -> String {
    debug_assert!(m < MINUTES_PER_DAY, "minutes out of range: {m}");
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Local wall-clock time of day at minute precision. No timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_minutes(m: u16) -> Option<Self> {
        (m < MINUTES_PER_DAY).then_some(Self(m))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// `self + mins`, or `None` past 23:59.
    pub fn checked_add(self, mins: u16) -> Option<Self> {
        self.0.checked_add(mins).and_then(Self::from_minutes)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&minutes_to_time(self.0))
    }
}

impl FromStr for ClockTime {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        time_to_minutes(s).map(Self)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_times() {
        assert_eq!(time_to_minutes("00:00"), Ok(0));
        assert_eq!(time_to_minutes("09:30"), Ok(570));
        assert_eq!(time_to_minutes("23:59"), Ok(1439));
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["24:00", "9:30", "09:60", "0930", "09:3a", "", "009:30", " 09:30", "29:00"] {
            assert!(time_to_minutes(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn formats_zero_padded() {
        assert_eq!(minutes_to_time(0), "00:00");
        assert_eq!(minutes_to_time(545), "09:05");
        assert_eq!(minutes_to_time(1439), "23:59");
    }

    #[test]
    fn clock_time_ordering_matches_string_ordering() {
        let a: ClockTime = "09:45".parse().unwrap();
        let b: ClockTime = "10:00".parse().unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn checked_add_stops_at_midnight() {
        let late: ClockTime = "23:30".parse().unwrap();
        assert_eq!(late.checked_add(29).map(|t| t.to_string()), Some("23:59".into()));
        assert_eq!(late.checked_add(30), None);
    }

    #[test]
    fn serde_uses_hh_mm() {
        let t: ClockTime = "07:15".parse().unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"07:15\"");
        let back: ClockTime = serde_json::from_str("\"07:15\"").unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<ClockTime>("\"7:15\"").is_err());
    }
}
