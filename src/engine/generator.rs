use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::validate::{check_order, validate_capacity, validate_duration};

use super::overlap::check_no_overlap;
use super::{Engine, EngineError, Entity};

/// A template resolved against an instructor and the engine defaults.
struct SlotPlan {
    lesson_type: LessonType,
    swim_styles: BTreeSet<SwimStyle>,
    duration: u16,
    gap: u16,
    capacity: u32,
}

/// Requested styles the instructor teaches, or all of theirs when none were
/// requested. Empty result is an error.
fn offered_styles(
    instructor: &Instructor,
    requested: &BTreeSet<SwimStyle>,
) -> Result<BTreeSet<SwimStyle>, EngineError> {
    let styles: BTreeSet<SwimStyle> = if requested.is_empty() {
        instructor.swim_styles.clone()
    } else {
        requested.intersection(&instructor.swim_styles).copied().collect()
    };
    if styles.is_empty() {
        return Err(EngineError::validation(format!(
            "instructor {} does not teach any of the requested swimming styles",
            instructor.id
        )));
    }
    Ok(styles)
}

/// Candidate starts `t = start; t + duration <= end; t += duration + gap`.
fn candidates(window: Span, duration: u16, gap: u16) -> Vec<Span> {
    let mut out = Vec::new();
    let mut start = window.start;
    while let Some(end) = start.checked_add(duration) {
        if end > window.end {
            break;
        }
        out.push(Span::new(start, end));
        match end.checked_add(gap) {
            Some(next) => start = next,
            None => break,
        }
    }
    out
}

impl Engine {
    fn instructor_or_not_found(&self, id: Ulid) -> Result<Instructor, EngineError> {
        self.directory
            .instructor(&id)
            .ok_or(EngineError::NotFound(Entity::Instructor, id))
    }

    fn plan(&self, instructor: &Instructor, template: &SlotTemplate) -> Result<SlotPlan, EngineError> {
        let swim_styles = offered_styles(instructor, &template.swim_styles)?;
        let (default_duration, default_gap) = self.config.stride(template.lesson_type);
        let duration = validate_duration(
            template.lesson_duration.unwrap_or(default_duration),
            "lesson duration",
        )?;
        let gap = template.gap.unwrap_or(default_gap);
        if gap >= MINUTES_PER_DAY {
            return Err(EngineError::validation("gap must be shorter than a day"));
        }
        Ok(SlotPlan {
            lesson_type: template.lesson_type,
            swim_styles,
            duration,
            gap,
            capacity: validate_capacity(
                self.config.capacity(template.lesson_type),
                template.lesson_type,
            )?,
        })
    }

    /// Cut an availability window into back-to-back slots.
    ///
    /// Candidates that overlap an existing non-cancelled slot are skipped, so
    /// calling this again with the same window creates nothing. The day stays
    /// write-locked for the whole run.
    pub async fn generate_slots(
        &self,
        instructor_id: Ulid,
        window: AvailabilityWindow,
        template: &SlotTemplate,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        let span = check_order(window.start_time, window.end_time)?;
        let instructor = self.instructor_or_not_found(instructor_id)?;
        let plan = self.plan(&instructor, template)?;

        let _gate = self.compaction_gate.read().await;
        let key = DayKey::new(instructor_id, window.date);
        let day = self.day_or_create(key);
        let mut guard = day.write_owned().await;

        let mut created = Vec::new();
        let mut skipped = 0usize;
        for candidate in candidates(span, plan.duration, plan.gap) {
            if guard.overlapping(&candidate, None).next().is_some() {
                skipped += 1;
                continue;
            }
            if guard.slots.len() >= MAX_SLOTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many slots on one day"));
            }
            let slot = TimeSlot {
                id: Ulid::new(),
                instructor_id,
                date: window.date,
                start_time: candidate.start,
                end_time: candidate.end,
                lesson_type: plan.lesson_type,
                swim_styles: plan.swim_styles.clone(),
                max_capacity: plan.capacity,
                current_capacity: 0,
                status: SlotStatus::Available,
                lesson_ids: Vec::new(),
            };
            let event = Event::SlotCreated { slot: slot.clone() };
            self.persist_and_apply(&mut guard, &event).await?;
            created.push(slot);
        }
        debug!(
            instructor = %instructor_id,
            date = %window.date,
            created = created.len(),
            skipped,
            "generated slots"
        );
        Ok(created)
    }

    /// Create one slot by hand. Overlaps are rejected, not skipped.
    pub async fn create_slot(&self, new: NewSlot) -> Result<TimeSlot, EngineError> {
        let instructor = self.instructor_or_not_found(new.instructor_id)?;
        let lesson_type = new
            .lesson_type
            .unwrap_or_else(|| LessonType::for_capacity(new.max_capacity));
        let max_capacity = validate_capacity(new.max_capacity, lesson_type)?;
        let swim_styles = offered_styles(&instructor, &new.swim_styles)?;
        if self.config.enforce_availability
            && !instructor
                .availability
                .iter()
                .any(|w| w.covers(new.date, &new.span))
        {
            return Err(EngineError::validation(format!(
                "{} {}-{} is outside the instructor's availability",
                new.date, new.span.start, new.span.end
            )));
        }

        let _gate = self.compaction_gate.read().await;
        let key = DayKey::new(new.instructor_id, new.date);
        let day = self.day_or_create(key);
        let mut guard = day.write_owned().await;
        check_no_overlap(&guard, &new.span, None)?;
        if guard.slots.len() >= MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots on one day"));
        }

        let slot = TimeSlot {
            id: Ulid::new(),
            instructor_id: new.instructor_id,
            date: new.date,
            start_time: new.span.start,
            end_time: new.span.end,
            lesson_type,
            swim_styles,
            max_capacity,
            current_capacity: 0,
            status: SlotStatus::Available,
            lesson_ids: Vec::new(),
        };
        let event = Event::SlotCreated { slot: slot.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(slot)
    }

    /// Replace an instructor's availability and bring their slots in line:
    /// lesson-free slots on affected dates that no window covers any more are
    /// deleted, then every window is generated.
    pub async fn apply_availability(
        &self,
        instructor_id: Ulid,
        windows: Vec<AvailabilityWindow>,
        template: SlotTemplate,
    ) -> Result<AvailabilityOutcome, EngineError> {
        let instructor = self.instructor_or_not_found(instructor_id)?;
        self.plan(&instructor, &template)?;

        let previous = self.replace_availability(instructor_id, windows.clone()).await?;
        let dates: BTreeSet<NaiveDate> = previous
            .iter()
            .chain(windows.iter())
            .map(|w| w.date)
            .collect();

        let mut removed = Vec::new();
        for date in dates {
            removed.extend(self.prune_uncovered(instructor_id, date, &windows).await?);
        }

        let mut created = Vec::new();
        for window in windows {
            created.extend(self.generate_slots(instructor_id, window, &template).await?);
        }
        info!(
            instructor = %instructor_id,
            removed = removed.len(),
            created = created.len(),
            "availability applied"
        );
        Ok(AvailabilityOutcome { removed, created })
    }

    async fn prune_uncovered(
        &self,
        instructor_id: Ulid,
        date: NaiveDate,
        windows: &[AvailabilityWindow],
    ) -> Result<Vec<Ulid>, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let key = DayKey::new(instructor_id, date);
        let Some(day) = self.day(&key) else {
            return Ok(Vec::new());
        };
        let mut guard = day.write_owned().await;
        let stale: Vec<Ulid> = guard
            .slots
            .iter()
            .filter(|s| {
                !s.is_cancelled()
                    && s.lesson_ids.is_empty()
                    && !windows.iter().any(|w| w.covers(date, &s.span()))
            })
            .map(|s| s.id)
            .collect();
        for id in &stale {
            let event = Event::SlotDeleted { key, id: *id };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockTime;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn starts(spans: &[Span]) -> Vec<String> {
        spans.iter().map(|s| format!("{}-{}", s.start, s.end)).collect()
    }

    #[test]
    fn stride_fills_window_exactly() {
        let spans = candidates(Span::new(t("09:00"), t("12:00")), 60, 0);
        assert_eq!(starts(&spans), ["09:00-10:00", "10:00-11:00", "11:00-12:00"]);
    }

    #[test]
    fn stride_stops_before_window_end() {
        let spans = candidates(Span::new(t("09:00"), t("10:30")), 45, 15);
        assert_eq!(starts(&spans), ["09:00-09:45"]);
    }

    #[test]
    fn window_shorter_than_duration_yields_nothing() {
        assert!(candidates(Span::new(t("09:00"), t("09:30")), 45, 15).is_empty());
    }

    #[test]
    fn stride_near_midnight_terminates() {
        let spans = candidates(Span::new(t("22:00"), t("23:59")), 50, 30);
        assert_eq!(starts(&spans), ["22:00-22:50"]);
    }

    #[test]
    fn offered_styles_intersects() {
        let instructor = Instructor {
            id: Ulid::new(),
            name: "Dana".into(),
            swim_styles: BTreeSet::from([SwimStyle::Freestyle, SwimStyle::Backstroke]),
            availability: Vec::new(),
        };
        let all = offered_styles(&instructor, &BTreeSet::new()).unwrap();
        assert_eq!(all, instructor.swim_styles);
        let some = offered_styles(
            &instructor,
            &BTreeSet::from([SwimStyle::Backstroke, SwimStyle::Butterfly]),
        )
        .unwrap();
        assert_eq!(some, BTreeSet::from([SwimStyle::Backstroke]));
        assert!(offered_styles(&instructor, &BTreeSet::from([SwimStyle::Butterfly])).is_err());
    }
}
