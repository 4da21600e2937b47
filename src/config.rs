use std::path::PathBuf;
use std::str::FromStr;

use crate::engine::EngineError;
use crate::model::LessonType;
use crate::validate::{validate_capacity, validate_duration};

/// Slot sizing and booking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub private_duration: u16,
    pub private_gap: u16,
    pub group_duration: u16,
    pub group_gap: u16,
    /// Seats in a generated group slot.
    pub group_capacity: u32,
    /// Require manually created slots to sit inside an availability window.
    pub enforce_availability: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            private_duration: 45,
            private_gap: 15,
            group_duration: 60,
            group_gap: 0,
            group_capacity: 20,
            enforce_availability: false,
        }
    }
}

impl EngineConfig {
    /// `(duration, gap)` in minutes for generated slots of this type.
    pub fn stride(&self, lesson_type: LessonType) -> (u16, u16) {
        match lesson_type {
            LessonType::Private => (self.private_duration, self.private_gap),
            LessonType::Group => (self.group_duration, self.group_gap),
        }
    }

    pub fn capacity(&self, lesson_type: LessonType) -> u32 {
        match lesson_type {
            LessonType::Private => 1,
            LessonType::Group => self.group_capacity,
        }
    }

    /// Reject settings that would generate slots breaking the capacity or
    /// duration rules.
    pub fn validate(&self) -> Result<(), EngineError> {
        validate_duration(self.private_duration, "private lesson duration")?;
        validate_duration(self.group_duration, "group lesson duration")?;
        for (gap, what) in [(self.private_gap, "private gap"), (self.group_gap, "group gap")] {
            if gap >= crate::limits::MINUTES_PER_DAY {
                return Err(EngineError::validation(format!("{what} must be shorter than a day")));
            }
        }
        validate_capacity(self.group_capacity, LessonType::Group)?;
        Ok(())
    }

    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            private_duration: env_or("SWIMSLOT_PRIVATE_DURATION", d.private_duration),
            private_gap: env_or("SWIMSLOT_PRIVATE_GAP", d.private_gap),
            group_duration: env_or("SWIMSLOT_GROUP_DURATION", d.group_duration),
            group_gap: env_or("SWIMSLOT_GROUP_GAP", d.group_gap),
            group_capacity: env_or("SWIMSLOT_GROUP_CAPACITY", d.group_capacity),
            enforce_availability: env_or("SWIMSLOT_ENFORCE_AVAILABILITY", d.enforce_availability),
        }
    }
}

/// Server settings, read from `SWIMSLOT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("SWIMSLOT_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("SWIMSLOT_PORT", 7878),
            data_dir: std::env::var("SWIMSLOT_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            max_connections: env_or("SWIMSLOT_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("SWIMSLOT_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("SWIMSLOT_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            engine: EngineConfig::from_env(),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("swimslot.wal")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_lesson_rules() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.stride(LessonType::Private), (45, 15));
        assert_eq!(cfg.stride(LessonType::Group), (60, 0));
        assert_eq!(cfg.capacity(LessonType::Private), 1);
        assert_eq!(cfg.capacity(LessonType::Group), 20);
        assert!(!cfg.enforce_availability);
    }

    #[test]
    fn rejects_unusable_group_capacity() {
        let zero = EngineConfig {
            group_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(zero.validate(), Err(EngineError::Validation(_))));

        let huge = EngineConfig {
            group_capacity: crate::limits::MAX_GROUP_CAPACITY + 1,
            ..EngineConfig::default()
        };
        assert!(matches!(huge.validate(), Err(EngineError::LimitExceeded(_))));

        let zero_length = EngineConfig {
            group_duration: 0,
            ..EngineConfig::default()
        };
        assert!(zero_length.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn unparsable_env_falls_back() {
        assert_eq!(env_or("SWIMSLOT_TEST_UNSET_VARIABLE", 42u16), 42);
    }
}
