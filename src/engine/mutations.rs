use std::collections::BTreeSet;

use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::validate::{check_order, validate_capacity, validate_name};

use super::overlap::check_no_overlap;
use super::{Engine, EngineError, Entity, WalCommand};

fn require_styles(styles: &BTreeSet<SwimStyle>) -> Result<(), EngineError> {
    if styles.is_empty() {
        return Err(EngineError::validation("at least one swimming style is required"));
    }
    Ok(())
}

/// The slot as it would look after `patch`, checked against the day's lessons.
/// Overlap is checked by the caller against the target day.
fn patched_slot(day: &DaySchedule, slot_id: Ulid, patch: &SlotPatch) -> Result<TimeSlot, EngineError> {
    let slot = day
        .slot(&slot_id)
        .ok_or(EngineError::NotFound(Entity::Slot, slot_id))?;
    let mut next = slot.clone();

    if let Some(date) = patch.date {
        next.date = date;
    }
    if let Some(start) = patch.start_time {
        next.start_time = start;
    }
    if let Some(end) = patch.end_time {
        next.end_time = end;
    }
    check_order(next.start_time, next.end_time)?;

    if let Some(lesson_type) = patch.lesson_type {
        next.lesson_type = lesson_type;
    }
    if let Some(max_capacity) = patch.max_capacity {
        next.max_capacity = max_capacity;
    }
    validate_capacity(next.max_capacity, next.lesson_type)?;
    if next.max_capacity < slot.current_capacity {
        return Err(EngineError::validation(format!(
            "cannot reduce capacity to {} with {} seats booked",
            next.max_capacity, slot.current_capacity
        )));
    }

    if let Some(styles) = &patch.swim_styles {
        require_styles(styles)?;
        if let Some(lesson) = day.lessons_for(slot).find(|l| !styles.contains(&l.swim_style)) {
            return Err(EngineError::validation(format!(
                "lesson {} is booked for {}, which the slot would no longer offer",
                lesson.id, lesson.swim_style
            )));
        }
        next.swim_styles = styles.clone();
    }

    match patch.status {
        Some(SlotStatus::Cancelled) => {
            if !slot.lesson_ids.is_empty() {
                return Err(EngineError::HasLessons(slot_id));
            }
            next.status = SlotStatus::Cancelled;
        }
        // Booked is derived; either value reopens a cancelled slot.
        Some(SlotStatus::Available | SlotStatus::Booked) => next.status = SlotStatus::Available,
        None => {}
    }
    next.refresh_status();
    Ok(next)
}

impl Engine {
    // ── Directory ────────────────────────────────────────────

    pub async fn register_instructor(
        &self,
        id: Ulid,
        name: &str,
        swim_styles: BTreeSet<SwimStyle>,
    ) -> Result<Instructor, EngineError> {
        let name = validate_name(name)?;
        require_styles(&swim_styles)?;
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        if self.directory.instructors.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Instructor, id));
        }
        let event = Event::InstructorRegistered { id, name, swim_styles };
        self.persist_directory(&event).await?;
        self.get_instructor(id)
    }

    /// Existing slots keep their styles. New bookings of a dropped style are
    /// refused, and `get_conflicts` lists what still carries it.
    pub async fn update_instructor_styles(
        &self,
        id: Ulid,
        swim_styles: BTreeSet<SwimStyle>,
    ) -> Result<Instructor, EngineError> {
        require_styles(&swim_styles)?;
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        self.get_instructor(id)?;
        let event = Event::InstructorStylesUpdated { id, swim_styles };
        self.persist_directory(&event).await?;
        self.get_instructor(id)
    }

    /// Drops the profile only. Slots and lessons stay; views show a placeholder name.
    pub async fn remove_instructor(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        self.get_instructor(id)?;
        self.persist_directory(&Event::InstructorRemoved { id }).await
    }

    pub async fn register_swimmer(
        &self,
        id: Ulid,
        name: &str,
        swim_styles: BTreeSet<SwimStyle>,
    ) -> Result<Swimmer, EngineError> {
        let name = validate_name(name)?;
        require_styles(&swim_styles)?;
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        if self.directory.swimmers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(Entity::Swimmer, id));
        }
        let event = Event::SwimmerRegistered { id, name, swim_styles };
        self.persist_directory(&event).await?;
        self.get_swimmer(id)
    }

    pub async fn update_swimmer_styles(
        &self,
        id: Ulid,
        swim_styles: BTreeSet<SwimStyle>,
    ) -> Result<Swimmer, EngineError> {
        require_styles(&swim_styles)?;
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        self.get_swimmer(id)?;
        let event = Event::SwimmerStylesUpdated { id, swim_styles };
        self.persist_directory(&event).await?;
        self.get_swimmer(id)
    }

    pub async fn remove_swimmer(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        self.get_swimmer(id)?;
        self.persist_directory(&Event::SwimmerRemoved { id }).await
    }

    /// Replace the instructor's availability windows. Slots are untouched;
    /// see `apply_availability` for regeneration.
    pub async fn set_availability(
        &self,
        instructor_id: Ulid,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<Instructor, EngineError> {
        self.replace_availability(instructor_id, windows).await?;
        self.get_instructor(instructor_id)
    }

    /// Returns the windows that were replaced.
    pub(super) async fn replace_availability(
        &self,
        instructor_id: Ulid,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        if windows.len() > MAX_AVAILABILITY_WINDOWS {
            return Err(EngineError::LimitExceeded("too many availability windows"));
        }
        for w in &windows {
            check_order(w.start_time, w.end_time)?;
        }
        let _gate = self.compaction_gate.read().await;
        let _dir = self.directory_lock.lock().await;
        let previous = self.get_instructor(instructor_id)?.availability;
        let event = Event::AvailabilitySet { instructor_id, windows };
        self.persist_directory(&event).await?;
        Ok(previous)
    }

    // ── Slots ────────────────────────────────────────────────

    /// Apply a partial update. `Ok(None)` when the slot does not exist.
    ///
    /// Changing the date moves the slot, with its lessons, to another day;
    /// both days are locked in key order.
    pub async fn update_slot(
        &self,
        slot_id: Ulid,
        patch: SlotPatch,
    ) -> Result<Option<TimeSlot>, EngineError> {
        let _gate = self.compaction_gate.read().await;
        loop {
            let Some(from_key) = self.index.slot_day(&slot_id) else {
                return Ok(None);
            };
            let to_key = DayKey::new(from_key.instructor_id, patch.date.unwrap_or(from_key.date));

            if to_key == from_key {
                let mut guard = match self.lock_slot_day(slot_id).await {
                    Ok(g) => g,
                    Err(EngineError::NotFound(..)) => return Ok(None),
                    Err(e) => return Err(e),
                };
                if guard.key != from_key {
                    continue; // moved while we waited
                }
                let updated = patched_slot(&guard, slot_id, &patch)?;
                if !updated.is_cancelled() {
                    check_no_overlap(&guard, &updated.span(), Some(slot_id))?;
                }
                let event = Event::SlotUpdated {
                    from: from_key,
                    slot: updated.clone(),
                };
                self.persist_and_apply(&mut guard, &event).await?;
                return Ok(Some(updated));
            }

            let (mut from, mut to) = self.lock_pair(from_key, to_key).await;
            if from.slot(&slot_id).is_none() {
                if self.index.slot_day(&slot_id) == Some(from_key) {
                    return Ok(None);
                }
                continue;
            }
            let updated = patched_slot(&from, slot_id, &patch)?;
            if !updated.is_cancelled() {
                check_no_overlap(&to, &updated.span(), Some(slot_id))?;
            }
            if to.slots.len() >= MAX_SLOTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many slots on one day"));
            }
            let event = Event::SlotUpdated {
                from: from_key,
                slot: updated.clone(),
            };
            self.wal_append(&event).await?;
            self.index.apply_move(&mut from, &mut to, &updated);
            info!(slot = %slot_id, from = %from_key.date, to = %to_key.date, "slot moved");
            return Ok(Some(updated));
        }
    }

    /// `Ok(false)` when the slot does not exist. Slots with lessons are kept.
    pub async fn delete_slot(&self, slot_id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = match self.lock_slot_day(slot_id).await {
            Ok(g) => g,
            Err(EngineError::NotFound(..)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let has_lessons = guard
            .slot(&slot_id)
            .is_some_and(|s| !s.lesson_ids.is_empty());
        if has_lessons {
            return Err(EngineError::HasLessons(slot_id));
        }
        let event = Event::SlotDeleted {
            key: guard.key,
            id: slot_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the shortest event sequence that rebuilds the
    /// current state. Mutations wait at the compaction gate meanwhile.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::new();

        let mut instructors: Vec<Instructor> =
            self.directory.instructors.iter().map(|e| e.value().clone()).collect();
        instructors.sort_by_key(|i| i.id);
        for i in instructors {
            let has_windows = !i.availability.is_empty();
            events.push(Event::InstructorRegistered {
                id: i.id,
                name: i.name,
                swim_styles: i.swim_styles,
            });
            if has_windows {
                events.push(Event::AvailabilitySet {
                    instructor_id: i.id,
                    windows: i.availability,
                });
            }
        }

        let mut swimmers: Vec<Swimmer> =
            self.directory.swimmers.iter().map(|e| e.value().clone()).collect();
        swimmers.sort_by_key(|s| s.id);
        events.extend(swimmers.into_iter().map(|s| Event::SwimmerRegistered {
            id: s.id,
            name: s.name,
            swim_styles: s.swim_styles,
        }));

        let mut days: Vec<(DayKey, super::SharedDay)> =
            self.days.iter().map(|e| (*e.key(), e.value().clone())).collect();
        days.sort_by_key(|(k, _)| *k);
        for (key, day) in days {
            let guard = day.read().await;
            for slot in &guard.slots {
                let mut fresh = slot.clone();
                fresh.current_capacity = 0;
                fresh.lesson_ids.clear();
                if !fresh.is_cancelled() {
                    fresh.status = SlotStatus::Available;
                }
                events.push(Event::SlotCreated { slot: fresh });
                for lesson in guard.lessons_for(slot) {
                    for swimmer_id in &lesson.students {
                        events.push(Event::SeatBooked {
                            key,
                            slot_id: slot.id,
                            lesson_id: lesson.id,
                            swimmer_id: *swimmer_id,
                            swim_style: lesson.swim_style,
                        });
                    }
                    if lesson.status != LessonStatus::Scheduled {
                        events.push(Event::LessonStatusChanged {
                            key,
                            lesson_id: lesson.id,
                            status: lesson.status,
                        });
                    }
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
