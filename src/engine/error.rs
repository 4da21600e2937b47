use ulid::Ulid;

use crate::clock::FormatError;

/// What kind of record a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Instructor,
    Swimmer,
    Slot,
    Lesson,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Entity::Instructor => "instructor",
            Entity::Swimmer => "swimmer",
            Entity::Slot => "time slot",
            Entity::Lesson => "lesson",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(Entity, Ulid),
    AlreadyExists(Entity, Ulid),
    /// Slot full at the moment of the conditional update.
    CapacityExceeded { slot_id: Ulid, max_capacity: u32 },
    /// Overlaps an existing non-cancelled slot.
    Overlap(Ulid),
    HasLessons(Ulid),
    AlreadyEnrolled { swimmer_id: Ulid, lesson_id: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

/// Coarse classification for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Capacity,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotFound(..) => ErrorKind::NotFound,
            EngineError::CapacityExceeded { .. } => ErrorKind::Capacity,
            EngineError::AlreadyExists(..)
            | EngineError::Overlap(_)
            | EngineError::HasLessons(_)
            | EngineError::AlreadyEnrolled { .. } => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyExists(entity, id) => write!(f, "{entity} already exists: {id}"),
            EngineError::CapacityExceeded { slot_id, max_capacity } => {
                write!(f, "time slot {slot_id} is full ({max_capacity} of {max_capacity} seats taken)")
            }
            EngineError::Overlap(id) => write!(f, "overlaps existing time slot: {id}"),
            EngineError::HasLessons(id) => {
                write!(f, "time slot {id} has booked lessons")
            }
            EngineError::AlreadyEnrolled { swimmer_id, lesson_id } => {
                write!(f, "swimmer {swimmer_id} is already enrolled in lesson {lesson_id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<FormatError> for EngineError {
    fn from(e: FormatError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
