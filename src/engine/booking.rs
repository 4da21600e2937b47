use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Entity};

impl Engine {
    /// Take a seat in a slot, creating the slot's lesson on first booking.
    ///
    /// Capacity is checked and incremented under the day's write lock, so
    /// racing bookings on the last seat see exactly one winner.
    pub async fn book_lesson(
        &self,
        swimmer_id: Ulid,
        slot_id: Ulid,
        swim_style: SwimStyle,
    ) -> Result<Lesson, EngineError> {
        let swimmer = self
            .directory
            .swimmer(&swimmer_id)
            .ok_or(EngineError::NotFound(Entity::Swimmer, swimmer_id))?;
        if !swimmer.swim_styles.contains(&swim_style) {
            return Err(EngineError::validation(format!(
                "swimmer {swimmer_id} is not trained in {swim_style}"
            )));
        }

        let _gate = self.compaction_gate.read().await;
        let mut guard = self.lock_slot_day(slot_id).await?;
        let key = guard.key;
        let slot = guard
            .slot(&slot_id)
            .ok_or(EngineError::NotFound(Entity::Slot, slot_id))?;
        if slot.current_capacity >= slot.max_capacity {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => "capacity")
                .increment(1);
            return Err(EngineError::CapacityExceeded {
                slot_id,
                max_capacity: slot.max_capacity,
            });
        }
        if !slot.swim_styles.contains(&swim_style) {
            return Err(EngineError::validation(format!(
                "{swim_style} is not offered in time slot {slot_id}"
            )));
        }
        let dropped_style = self
            .directory
            .instructor(&key.instructor_id)
            .is_some_and(|i| !i.swim_styles.contains(&swim_style));
        if dropped_style {
            return Err(EngineError::validation(format!(
                "instructor {} no longer teaches {swim_style}",
                key.instructor_id
            )));
        }
        if slot.is_cancelled() {
            return Err(EngineError::validation(format!("time slot {slot_id} is cancelled")));
        }

        let lesson_id = match guard.lesson_for_slot(&slot_id) {
            Some(lesson) if lesson.has_student(&swimmer_id) => {
                return Err(EngineError::AlreadyEnrolled {
                    swimmer_id,
                    lesson_id: lesson.id,
                });
            }
            Some(lesson) => lesson.id,
            None => Ulid::new(),
        };

        let event = Event::SeatBooked {
            key,
            slot_id,
            lesson_id,
            swimmer_id,
            swim_style,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(slot = %slot_id, lesson = %lesson_id, swimmer = %swimmer_id, "seat booked");
        guard
            .lessons
            .get(&lesson_id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))
    }

    /// Give up a swimmer's seat. The lesson goes away with its last student.
    pub async fn cancel_lesson(&self, swimmer_id: Ulid, lesson_id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.lock_lesson_day(lesson_id).await?;
        let key = guard.key;
        let enrolled = guard
            .lessons
            .get(&lesson_id)
            .is_some_and(|l| l.has_student(&swimmer_id));
        if !enrolled {
            return Err(EngineError::validation(format!(
                "swimmer {swimmer_id} is not enrolled in lesson {lesson_id}"
            )));
        }

        let event = Event::SeatReleased {
            key,
            lesson_id,
            swimmer_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!(lesson = %lesson_id, swimmer = %swimmer_id, "seat released");
        Ok(true)
    }

    pub async fn set_lesson_status(
        &self,
        lesson_id: Ulid,
        status: LessonStatus,
    ) -> Result<Lesson, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.lock_lesson_day(lesson_id).await?;
        let key = guard.key;
        let event = Event::LessonStatusChanged {
            key,
            lesson_id,
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .lessons
            .get(&lesson_id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))
    }

    pub async fn get_lesson(&self, lesson_id: Ulid) -> Result<Lesson, EngineError> {
        let guard = self.read_lesson_day(lesson_id).await?;
        guard
            .lessons
            .get(&lesson_id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))
    }
}
