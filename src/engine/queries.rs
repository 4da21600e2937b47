use std::collections::HashSet;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::limits::DAYS_PER_WEEK;
use crate::model::*;
use crate::validate::check_order;

use super::{Engine, EngineError, Entity, SharedDay};

fn week_dates(week_start: NaiveDate) -> Result<Vec<NaiveDate>, EngineError> {
    (0..DAYS_PER_WEEK)
        .map(|offset| {
            week_start
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| EngineError::validation("week runs past the supported calendar"))
        })
        .collect()
}

fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

impl Engine {
    pub fn get_instructor(&self, id: Ulid) -> Result<Instructor, EngineError> {
        self.directory
            .instructor(&id)
            .ok_or(EngineError::NotFound(Entity::Instructor, id))
    }

    pub fn get_swimmer(&self, id: Ulid) -> Result<Swimmer, EngineError> {
        self.directory
            .swimmer(&id)
            .ok_or(EngineError::NotFound(Entity::Swimmer, id))
    }

    pub async fn get_slot(&self, slot_id: Ulid) -> Option<TimeSlot> {
        let key = self.index.slot_day(&slot_id)?;
        let day = self.day(&key)?;
        let guard = day.read().await;
        guard.slot(&slot_id).cloned()
    }

    /// Every day schedule on `date`, across instructors, in key order.
    /// Callers lock them one at a time.
    fn days_on(&self, date: NaiveDate) -> Vec<(DayKey, SharedDay)> {
        let mut days: Vec<(DayKey, SharedDay)> = self
            .days
            .iter()
            .filter(|e| e.key().date == date)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        days.sort_by_key(|(k, _)| *k);
        days
    }

    fn slot_view(&self, day: &DaySchedule, slot: &TimeSlot, instructor_name: &str) -> SlotView {
        let lessons = day
            .lessons_for(slot)
            .map(|lesson| LessonView {
                student_details: lesson
                    .students
                    .iter()
                    .map(|id| StudentInfo {
                        id: *id,
                        name: self.directory.swimmer_name(id),
                    })
                    .collect(),
                lesson: lesson.clone(),
            })
            .collect();
        SlotView {
            slot: slot.clone(),
            instructor_name: instructor_name.to_string(),
            lessons,
        }
    }

    /// One instructor's slots for a date, with lessons and student names.
    pub async fn get_instructor_schedule(&self, instructor_id: Ulid, date: NaiveDate) -> ScheduleView {
        let instructor_name = self.directory.instructor_name(&instructor_id);
        let mut view = ScheduleView {
            instructor_id,
            instructor_name,
            date,
            slots: Vec::new(),
        };
        if let Some(day) = self.day(&DayKey::new(instructor_id, date)) {
            let guard = day.read().await;
            view.slots = guard
                .slots
                .iter()
                .map(|s| self.slot_view(&guard, s, &view.instructor_name))
                .collect();
        }
        view
    }

    /// Bookable slots on a date, ordered by start time then instructor.
    /// A style filter also drops slots whose instructor no longer teaches it.
    pub async fn get_available_slots(
        &self,
        date: NaiveDate,
        swim_style: Option<SwimStyle>,
        lesson_type: Option<LessonType>,
    ) -> Vec<AvailableSlot> {
        let mut out = Vec::new();
        for (_, day) in self.days_on(date) {
            let guard = day.read().await;
            let instructor_name = self.directory.instructor_name(&guard.key.instructor_id);
            let taught = self
                .directory
                .instructor(&guard.key.instructor_id)
                .map(|i| i.swim_styles);
            for slot in &guard.slots {
                if !slot.has_room() {
                    continue;
                }
                if let Some(st) = swim_style {
                    let dropped = taught.as_ref().is_some_and(|t| !t.contains(&st));
                    if !slot.swim_styles.contains(&st) || dropped {
                        continue;
                    }
                }
                if lesson_type.is_some_and(|lt| slot.lesson_type != lt) {
                    continue;
                }
                out.push(AvailableSlot {
                    remaining_seats: slot.remaining_seats(),
                    slot: slot.clone(),
                    instructor_name: instructor_name.clone(),
                });
            }
        }
        out.sort_by(|a, b| {
            (a.slot.start_time, &a.instructor_name, a.slot.instructor_id).cmp(&(
                b.slot.start_time,
                &b.instructor_name,
                b.slot.instructor_id,
            ))
        });
        out
    }

    /// Seven days from `week_start`, every instructor's slots per day.
    /// Canceled lessons are left out of the totals.
    pub async fn get_weekly_schedule(&self, week_start: NaiveDate) -> Result<WeeklySchedule, EngineError> {
        let mut days = Vec::new();
        let mut total_lessons = 0;
        let mut swimmers = HashSet::new();
        for date in week_dates(week_start)? {
            let mut slots = Vec::new();
            for (_, day) in self.days_on(date) {
                let guard = day.read().await;
                let instructor_name = self.directory.instructor_name(&guard.key.instructor_id);
                for lesson in guard.lessons.values() {
                    if lesson.status != LessonStatus::Canceled {
                        total_lessons += 1;
                        swimmers.extend(lesson.students.iter().copied());
                    }
                }
                slots.extend(
                    guard
                        .slots
                        .iter()
                        .map(|s| self.slot_view(&guard, s, &instructor_name)),
                );
            }
            slots.sort_by(|a, b| {
                (a.slot.start_time, &a.instructor_name, a.slot.instructor_id).cmp(&(
                    b.slot.start_time,
                    &b.instructor_name,
                    b.slot.instructor_id,
                ))
            });
            days.push(DayOverview { date, slots });
        }
        Ok(WeeklySchedule {
            week_start,
            days,
            total_lessons,
            total_swimmers: swimmers.len(),
        })
    }

    /// Non-canceled lessons of the week, broken down by lesson type, style
    /// and day. Every type, style and day is listed, zero counts included.
    pub async fn get_weekly_statistics(
        &self,
        week_start: NaiveDate,
    ) -> Result<WeeklyStatistics, EngineError> {
        let mut by_type: Vec<TypeCount> = [LessonType::Private, LessonType::Group]
            .into_iter()
            .map(|lesson_type| TypeCount { lesson_type, count: 0 })
            .collect();
        let mut by_style: Vec<StyleCount> = SwimStyle::ALL
            .into_iter()
            .map(|swim_style| StyleCount { swim_style, count: 0 })
            .collect();
        let mut by_day = Vec::new();
        let mut total_lessons = 0;

        for date in week_dates(week_start)? {
            let mut count = 0;
            for (_, day) in self.days_on(date) {
                let guard = day.read().await;
                for lesson in guard.lessons.values() {
                    if lesson.status == LessonStatus::Canceled {
                        continue;
                    }
                    count += 1;
                    if let Some(t) = by_type.iter_mut().find(|t| t.lesson_type == lesson.lesson_type) {
                        t.count += 1;
                    }
                    if let Some(s) = by_style.iter_mut().find(|s| s.swim_style == lesson.swim_style) {
                        s.count += 1;
                    }
                }
            }
            total_lessons += count;
            by_day.push(DayCount {
                date,
                weekday: weekday_name(date),
                count,
            });
        }

        Ok(WeeklyStatistics {
            week_start,
            total_lessons,
            by_type,
            by_style,
            by_day,
        })
    }

    /// Instructors with a window on `date` that is open at `start` and, when
    /// given, runs until at least `end`. Sorted by name, then id.
    pub fn get_available_instructors(
        &self,
        date: NaiveDate,
        start: ClockTime,
        end: Option<ClockTime>,
        swim_style: Option<SwimStyle>,
    ) -> Result<Vec<Instructor>, EngineError> {
        if let Some(end) = end {
            check_order(start, end)?;
        }
        let mut out: Vec<Instructor> = self
            .directory
            .instructors
            .iter()
            .filter(|e| swim_style.is_none_or(|st| e.swim_styles.contains(&st)))
            .filter(|e| {
                e.availability.iter().any(|w| {
                    w.date == date
                        && w.start_time <= start
                        && start < w.end_time
                        && end.is_none_or(|end| end <= w.end_time)
                })
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (&a.name, a.id).cmp(&(&b.name, b.id)));
        Ok(out)
    }

    /// Scan a week for intersecting live slots and for styles an instructor
    /// offers or has booked but no longer teaches. Removed instructors are
    /// only checked for intersections.
    pub async fn get_conflicts(&self, week_start: NaiveDate) -> Result<Vec<ScheduleConflict>, EngineError> {
        let mut out = Vec::new();
        for date in week_dates(week_start)? {
            for (key, day) in self.days_on(date) {
                let instructor = self.directory.instructor(&key.instructor_id);
                let guard = day.read().await;
                let live: Vec<&TimeSlot> = guard.slots.iter().filter(|s| !s.is_cancelled()).collect();

                // `live` is sorted by start, so later slots starting at or
                // after `a.end_time` cannot intersect it.
                for (i, a) in live.iter().enumerate() {
                    for b in live[i + 1..].iter().take_while(|b| b.start_time < a.end_time) {
                        out.push(ScheduleConflict::InstructorDoubleBooking {
                            instructor_id: key.instructor_id,
                            date,
                            slot_ids: [a.id, b.id],
                        });
                    }
                }

                let Some(instructor) = instructor else {
                    continue;
                };
                for slot in &live {
                    for style in slot.swim_styles.difference(&instructor.swim_styles) {
                        out.push(ScheduleConflict::StyleIncompatibility {
                            instructor_id: key.instructor_id,
                            slot_id: slot.id,
                            lesson_id: None,
                            swim_style: *style,
                        });
                    }
                    for lesson in guard.lessons_for(slot) {
                        if lesson.status == LessonStatus::Scheduled
                            && !instructor.swim_styles.contains(&lesson.swim_style)
                        {
                            out.push(ScheduleConflict::StyleIncompatibility {
                                instructor_id: key.instructor_id,
                                slot_id: slot.id,
                                lesson_id: Some(lesson.id),
                                swim_style: lesson.swim_style,
                            });
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Scheduled lessons of the same instructor and date whose slots
    /// intersect this lesson's slot.
    pub async fn get_lesson_conflicts(&self, lesson_id: Ulid) -> Result<Vec<Lesson>, EngineError> {
        let guard = self.read_lesson_day(lesson_id).await?;
        let lesson = guard
            .lessons
            .get(&lesson_id)
            .ok_or(EngineError::NotFound(Entity::Lesson, lesson_id))?;
        let Some(own) = guard.slot(&lesson.time_slot_id) else {
            return Ok(Vec::new());
        };
        let span = own.span();
        Ok(guard
            .slots
            .iter()
            .filter(|s| s.id != own.id && s.span().overlaps(&span))
            .flat_map(|s| guard.lessons_for(s))
            .filter(|l| l.status == LessonStatus::Scheduled)
            .cloned()
            .collect())
    }

    /// Lessons a swimmer is enrolled in, earliest first.
    pub async fn get_swimmer_lessons(&self, swimmer_id: Ulid) -> Vec<SwimmerLesson> {
        let all: Vec<SharedDay> = self.days.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for day in all {
            let guard = day.read().await;
            for slot in &guard.slots {
                for lesson in guard.lessons_for(slot) {
                    if lesson.has_student(&swimmer_id) {
                        out.push(SwimmerLesson {
                            lesson: lesson.clone(),
                            date: slot.date,
                            start_time: slot.start_time,
                            end_time: slot.end_time,
                            instructor_name: self.directory.instructor_name(&slot.instructor_id),
                        });
                    }
                }
            }
        }
        out.sort_by_key(|l| (l.date, l.start_time, l.lesson.id));
        out
    }
}
