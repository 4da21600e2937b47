use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Reject `span` if it intersects any non-cancelled slot of the day other
/// than `exclude`.
pub(super) fn check_no_overlap(
    day: &DaySchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match day.overlapping(span, exclude).next() {
        Some(existing) => Err(EngineError::Overlap(existing.id)),
        None => Ok(()),
    }
}

impl Engine {
    /// Non-cancelled slots of one instructor and date intersecting `span`.
    pub async fn find_overlapping(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Vec<TimeSlot> {
        let Some(day) = self.day(&DayKey::new(instructor_id, date)) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.overlapping(&span, exclude).cloned().collect()
    }
}
