//! Precondition gate for every mutating operation. Wire input arrives as
//! strings; these turn it into typed values or a `Validation` error.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{LessonType, Span, SwimStyle};

/// `YYYY-MM-DD` naming a real calendar date.
pub fn validate_date(s: &str) -> Result<NaiveDate, EngineError> {
    let bytes = s.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return Err(EngineError::validation(format!(
            "date must be in YYYY-MM-DD format, got {s:?}"
        )));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| EngineError::validation(format!("not a calendar date: {s}")))
}

pub fn validate_time(s: &str) -> Result<ClockTime, EngineError> {
    Ok(s.parse::<ClockTime>()?)
}

/// Both times well-formed and `start < end`.
pub fn validate_time_range(start: &str, end: &str) -> Result<Span, EngineError> {
    let start = validate_time(start)?;
    let end = validate_time(end)?;
    check_order(start, end)
}

pub(crate) fn check_order(start: ClockTime, end: ClockTime) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::validation(format!(
            "start time {start} must be before end time {end}"
        )));
    }
    Ok(Span::new(start, end))
}

pub fn validate_swim_style(s: &str) -> Result<SwimStyle, EngineError> {
    s.parse()
        .map_err(|_| EngineError::validation(format!("invalid swimming style: {s}")))
}

pub fn validate_swim_styles<S: AsRef<str>>(
    styles: &[S],
    require_one: bool,
) -> Result<BTreeSet<SwimStyle>, EngineError> {
    if require_one && styles.is_empty() {
        return Err(EngineError::validation("at least one swimming style is required"));
    }
    styles.iter().map(|s| validate_swim_style(s.as_ref())).collect()
}

pub fn validate_identifier(s: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(s).map_err(|_| EngineError::validation(format!("invalid identifier: {s:?}")))
}

pub fn validate_lesson_type(s: &str) -> Result<LessonType, EngineError> {
    s.parse().map_err(|_| {
        EngineError::validation(format!("lesson type must be \"private\" or \"group\", got {s:?}"))
    })
}

/// Private slots seat exactly one swimmer.
pub fn validate_capacity(max_capacity: u32, lesson_type: LessonType) -> Result<u32, EngineError> {
    if max_capacity < 1 {
        return Err(EngineError::validation("maximum capacity must be at least 1"));
    }
    if max_capacity > MAX_GROUP_CAPACITY {
        return Err(EngineError::LimitExceeded("maximum capacity too large"));
    }
    if lesson_type == LessonType::Private && max_capacity != 1 {
        return Err(EngineError::validation("private slots have a maximum capacity of 1"));
    }
    Ok(max_capacity)
}

pub fn validate_duration(minutes: u16, what: &str) -> Result<u16, EngineError> {
    if minutes == 0 || minutes >= MINUTES_PER_DAY {
        return Err(EngineError::validation(format!(
            "{what} must be between 1 and {} minutes",
            MINUTES_PER_DAY - 1
        )));
    }
    Ok(minutes)
}

pub fn validate_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::validation("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;

    #[test]
    fn date_requires_shape_and_real_day() {
        assert_eq!(
            validate_date("2025-03-03").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
        );
        assert!(validate_date("2024-02-29").is_ok()); // leap year
        for bad in ["2025-02-29", "2025-13-01", "2025-3-3", "03-03-2025", "2025/03/03", "2025-03-03T10:00"] {
            let err = validate_date(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{bad}");
        }
    }

    #[test]
    fn time_range_must_be_increasing() {
        let span = validate_time_range("09:00", "12:00").unwrap();
        assert_eq!(span.duration_minutes(), 180);
        assert!(validate_time_range("12:00", "12:00").is_err());
        assert!(validate_time_range("13:00", "12:00").is_err());
        assert!(validate_time_range("9:00", "12:00").is_err());
    }

    #[test]
    fn swim_styles_list() {
        let styles = validate_swim_styles(&["Freestyle", "Butterfly", "Freestyle"], true).unwrap();
        assert_eq!(styles.len(), 2);
        assert!(validate_swim_styles::<&str>(&[], true).is_err());
        assert!(validate_swim_styles::<&str>(&[], false).unwrap().is_empty());
        assert!(validate_swim_styles(&["Freestyle", "Sidestroke"], true).is_err());
    }

    #[test]
    fn identifiers_are_ulids() {
        let id = Ulid::new();
        assert_eq!(validate_identifier(&id.to_string()).unwrap(), id);
        assert!(validate_identifier("507f1f77bcf86cd799439011").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn capacity_rules() {
        assert!(validate_capacity(1, LessonType::Private).is_ok());
        assert!(validate_capacity(2, LessonType::Private).is_err());
        assert!(validate_capacity(0, LessonType::Group).is_err());
        assert!(validate_capacity(20, LessonType::Group).is_ok());
        assert!(validate_capacity(MAX_GROUP_CAPACITY + 1, LessonType::Group).is_err());
    }

    #[test]
    fn duration_bounds() {
        assert!(validate_duration(0, "lesson duration").is_err());
        assert!(validate_duration(45, "lesson duration").is_ok());
        assert!(validate_duration(MINUTES_PER_DAY, "lesson duration").is_err());
    }

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  Dana  ").unwrap(), "Dana");
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
