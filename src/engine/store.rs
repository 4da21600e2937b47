use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Reverse lookups from slot and lesson ids to the day that holds them.
/// Only mutated by `apply`/`apply_move`, under the owning day's write lock.
#[derive(Default)]
pub(super) struct Indexes {
    pub(super) slots: DashMap<Ulid, DayKey>,
    pub(super) lessons: DashMap<Ulid, DayKey>,
}

impl Indexes {
    pub(super) fn slot_day(&self, slot_id: &Ulid) -> Option<DayKey> {
        self.slots.get(slot_id).map(|e| *e.value())
    }

    pub(super) fn lesson_day(&self, lesson_id: &Ulid) -> Option<DayKey> {
        self.lessons.get(lesson_id).map(|e| *e.value())
    }

    /// Apply a single-day event. Cross-day moves go through `apply_move`.
    pub(super) fn apply(&self, day: &mut DaySchedule, event: &Event) {
        match event {
            Event::SlotCreated { slot } => {
                self.slots.insert(slot.id, day.key);
                day.insert_slot(slot.clone());
            }
            Event::SlotUpdated { slot, .. } => {
                day.remove_slot(slot.id);
                sync_lesson_types(day, slot);
                day.insert_slot(slot.clone());
            }
            Event::SlotDeleted { id, .. } => {
                if let Some(slot) = day.remove_slot(*id) {
                    for lid in &slot.lesson_ids {
                        day.lessons.remove(lid);
                        self.lessons.remove(lid);
                    }
                }
                self.slots.remove(id);
            }
            Event::SeatBooked {
                slot_id,
                lesson_id,
                swimmer_id,
                swim_style,
                ..
            } => {
                let Some(slot) = day.slots.iter_mut().find(|s| s.id == *slot_id) else {
                    return;
                };
                match day.lessons.get_mut(lesson_id) {
                    Some(lesson) => lesson.students.push(*swimmer_id),
                    None => {
                        day.lessons.insert(
                            *lesson_id,
                            Lesson {
                                id: *lesson_id,
                                time_slot_id: slot.id,
                                instructor_id: slot.instructor_id,
                                lesson_type: LessonType::for_capacity(slot.max_capacity),
                                swim_style: *swim_style,
                                students: vec![*swimmer_id],
                                status: LessonStatus::Scheduled,
                            },
                        );
                        slot.lesson_ids.push(*lesson_id);
                        self.lessons.insert(*lesson_id, day.key);
                    }
                }
                slot.current_capacity += 1;
                slot.refresh_status();
            }
            Event::SeatReleased {
                lesson_id,
                swimmer_id,
                ..
            } => {
                let Some(lesson) = day.lessons.get_mut(lesson_id) else {
                    return;
                };
                lesson.students.retain(|s| s != swimmer_id);
                let emptied = lesson.students.is_empty();
                let slot_id = lesson.time_slot_id;
                if emptied {
                    day.lessons.remove(lesson_id);
                    self.lessons.remove(lesson_id);
                }
                if let Some(slot) = day.slot_mut(&slot_id) {
                    slot.current_capacity = slot.current_capacity.saturating_sub(1);
                    if emptied {
                        slot.lesson_ids.retain(|l| l != lesson_id);
                    }
                    slot.refresh_status();
                }
            }
            Event::LessonStatusChanged {
                lesson_id, status, ..
            } => {
                if let Some(lesson) = day.lessons.get_mut(lesson_id) {
                    lesson.status = *status;
                }
            }
            // Directory events never touch a day.
            _ => {}
        }
    }

    /// Move a slot and its lessons from `from` to `to`, replacing it with
    /// the updated record.
    pub(super) fn apply_move(&self, from: &mut DaySchedule, to: &mut DaySchedule, slot: &TimeSlot) {
        from.remove_slot(slot.id);
        for lid in &slot.lesson_ids {
            if let Some(lesson) = from.lessons.remove(lid) {
                to.lessons.insert(*lid, lesson);
                self.lessons.insert(*lid, to.key);
            }
        }
        sync_lesson_types(to, slot);
        to.insert_slot(slot.clone());
        self.slots.insert(slot.id, to.key);
    }
}

fn sync_lesson_types(day: &mut DaySchedule, slot: &TimeSlot) {
    let lesson_type = LessonType::for_capacity(slot.max_capacity);
    for lid in &slot.lesson_ids {
        if let Some(lesson) = day.lessons.get_mut(lid) {
            lesson.lesson_type = lesson_type;
        }
    }
}

/// The day a slot/lesson event targets. `None` for directory events.
pub(super) fn event_day(event: &Event) -> Option<DayKey> {
    match event {
        Event::SlotCreated { slot } | Event::SlotUpdated { slot, .. } => Some(slot.day_key()),
        Event::SlotDeleted { key, .. }
        | Event::SeatBooked { key, .. }
        | Event::SeatReleased { key, .. }
        | Event::LessonStatusChanged { key, .. } => Some(*key),
        Event::InstructorRegistered { .. }
        | Event::InstructorStylesUpdated { .. }
        | Event::InstructorRemoved { .. }
        | Event::AvailabilitySet { .. }
        | Event::SwimmerRegistered { .. }
        | Event::SwimmerStylesUpdated { .. }
        | Event::SwimmerRemoved { .. } => None,
    }
}

/// Instructor and swimmer profiles.
#[derive(Default)]
pub(super) struct Directory {
    pub(super) instructors: DashMap<Ulid, Instructor>,
    pub(super) swimmers: DashMap<Ulid, Swimmer>,
}

impl Directory {
    pub(super) fn instructor(&self, id: &Ulid) -> Option<Instructor> {
        self.instructors.get(id).map(|e| e.value().clone())
    }

    pub(super) fn swimmer(&self, id: &Ulid) -> Option<Swimmer> {
        self.swimmers.get(id).map(|e| e.value().clone())
    }

    pub(super) fn instructor_name(&self, id: &Ulid) -> String {
        self.instructors
            .get(id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| UNKNOWN_INSTRUCTOR.to_string())
    }

    pub(super) fn swimmer_name(&self, id: &Ulid) -> String {
        self.swimmers
            .get(id)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| UNKNOWN_SWIMMER.to_string())
    }

    /// Apply a directory event. Returns false for slot/lesson events.
    pub(super) fn apply(&self, event: &Event) -> bool {
        match event {
            Event::InstructorRegistered { id, name, swim_styles } => {
                self.instructors.insert(
                    *id,
                    Instructor {
                        id: *id,
                        name: name.clone(),
                        swim_styles: swim_styles.clone(),
                        availability: Vec::new(),
                    },
                );
            }
            Event::InstructorStylesUpdated { id, swim_styles } => {
                if let Some(mut i) = self.instructors.get_mut(id) {
                    i.swim_styles = swim_styles.clone();
                }
            }
            Event::InstructorRemoved { id } => {
                self.instructors.remove(id);
            }
            Event::AvailabilitySet { instructor_id, windows } => {
                if let Some(mut i) = self.instructors.get_mut(instructor_id) {
                    i.availability = windows.clone();
                }
            }
            Event::SwimmerRegistered { id, name, swim_styles } => {
                self.swimmers.insert(
                    *id,
                    Swimmer {
                        id: *id,
                        name: name.clone(),
                        swim_styles: swim_styles.clone(),
                    },
                );
            }
            Event::SwimmerStylesUpdated { id, swim_styles } => {
                if let Some(mut s) = self.swimmers.get_mut(id) {
                    s.swim_styles = swim_styles.clone();
                }
            }
            Event::SwimmerRemoved { id } => {
                self.swimmers.remove(id);
            }
            _ => return false,
        }
        true
    }
}
