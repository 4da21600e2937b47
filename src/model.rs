use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::ClockTime;

pub const UNKNOWN_INSTRUCTOR: &str = "Unknown instructor";
pub const UNKNOWN_SWIMMER: &str = "Unknown swimmer";

/// Half-open interval `[start, end)` of wall-clock minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl Span {
    pub fn new(start: ClockTime, end: ClockTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SwimStyle {
    Freestyle,
    Backstroke,
    Breaststroke,
    Butterfly,
}

impl SwimStyle {
    pub const ALL: [SwimStyle; 4] = [
        SwimStyle::Freestyle,
        SwimStyle::Backstroke,
        SwimStyle::Breaststroke,
        SwimStyle::Butterfly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SwimStyle::Freestyle => "Freestyle",
            SwimStyle::Backstroke => "Backstroke",
            SwimStyle::Breaststroke => "Breaststroke",
            SwimStyle::Butterfly => "Butterfly",
        }
    }
}

impl fmt::Display for SwimStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwimStyle {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        SwimStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Private,
    Group,
}

impl LessonType {
    /// Lessons take their type from the seat count of their slot.
    pub fn for_capacity(max_capacity: u32) -> Self {
        if max_capacity > 1 {
            LessonType::Group
        } else {
            LessonType::Private
        }
    }
}

impl fmt::Display for LessonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LessonType::Private => "private",
            LessonType::Group => "group",
        })
    }
}

impl FromStr for LessonType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "private" => Ok(LessonType::Private),
            "group" => Ok(LessonType::Group),
            _ => Err(()),
        }
    }
}

/// `Booked` is derived from capacity; only `Cancelled` is set explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
    Cancelled,
}

impl FromStr for SlotStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "available" => Ok(SlotStatus::Available),
            "booked" => Ok(SlotStatus::Booked),
            "cancelled" => Ok(SlotStatus::Cancelled),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonStatus {
    Scheduled,
    Completed,
    Canceled,
}

impl FromStr for LessonStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scheduled" => Ok(LessonStatus::Scheduled),
            "completed" => Ok(LessonStatus::Completed),
            "canceled" => Ok(LessonStatus::Canceled),
            _ => Err(()),
        }
    }
}

/// One instructor on one calendar day: the unit of slot storage and locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub instructor_id: Ulid,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(instructor_id: Ulid, date: NaiveDate) -> Self {
        Self { instructor_id, date }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl AvailabilityWindow {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn covers(&self, date: NaiveDate, span: &Span) -> bool {
        self.date == date && self.span().contains_span(span)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructor {
    pub id: Ulid,
    pub name: String,
    pub swim_styles: BTreeSet<SwimStyle>,
    pub availability: Vec<AvailabilityWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swimmer {
    pub id: Ulid,
    pub name: String,
    pub swim_styles: BTreeSet<SwimStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub lesson_type: LessonType,
    pub swim_styles: BTreeSet<SwimStyle>,
    pub max_capacity: u32,
    pub current_capacity: u32,
    pub status: SlotStatus,
    pub lesson_ids: Vec<Ulid>,
}

impl TimeSlot {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn day_key(&self) -> DayKey {
        DayKey::new(self.instructor_id, self.date)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == SlotStatus::Cancelled
    }

    /// Bookable: not cancelled and at least one seat left.
    pub fn has_room(&self) -> bool {
        !self.is_cancelled() && self.current_capacity < self.max_capacity
    }

    pub fn remaining_seats(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_capacity)
    }

    /// Recompute the advisory status from capacity. Cancelled is sticky.
    pub fn refresh_status(&mut self) {
        if self.is_cancelled() {
            return;
        }
        self.status = if self.current_capacity >= self.max_capacity {
            SlotStatus::Booked
        } else {
            SlotStatus::Available
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Ulid,
    pub time_slot_id: Ulid,
    pub instructor_id: Ulid,
    pub lesson_type: LessonType,
    pub swim_style: SwimStyle,
    pub students: Vec<Ulid>,
    pub status: LessonStatus,
}

impl Lesson {
    pub fn has_student(&self, swimmer_id: &Ulid) -> bool {
        self.students.contains(swimmer_id)
    }
}

/// Partial update for a slot. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
    pub max_capacity: Option<u32>,
    pub lesson_type: Option<LessonType>,
    pub swim_styles: Option<BTreeSet<SwimStyle>>,
    pub status: Option<SlotStatus>,
}

/// How generated slots are shaped. Unset duration/gap fall back to the
/// configured defaults for the lesson type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTemplate {
    pub lesson_type: LessonType,
    /// Empty means every style the instructor teaches.
    pub swim_styles: BTreeSet<SwimStyle>,
    pub lesson_duration: Option<u16>,
    pub gap: Option<u16>,
}

/// A manually created slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlot {
    pub instructor_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub max_capacity: u32,
    /// Derived from `max_capacity` when unset.
    pub lesson_type: Option<LessonType>,
    pub swim_styles: BTreeSet<SwimStyle>,
}

/// All slots and lessons of one instructor on one date.
#[derive(Debug, Clone)]
pub struct DaySchedule {
    pub key: DayKey,
    /// Sorted by `start_time`.
    pub slots: Vec<TimeSlot>,
    pub lessons: HashMap<Ulid, Lesson>,
}

impl DaySchedule {
    pub fn new(key: DayKey) -> Self {
        Self {
            key,
            slots: Vec::new(),
            lessons: HashMap::new(),
        }
    }

    /// Insert slot maintaining sort order by start time.
    pub fn insert_slot(&mut self, slot: TimeSlot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.start_time, |s| s.start_time)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<TimeSlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slot(&self, id: &Ulid) -> Option<&TimeSlot> {
        self.slots.iter().find(|s| s.id == *id)
    }

    pub fn slot_mut(&mut self, id: &Ulid) -> Option<&mut TimeSlot> {
        self.slots.iter_mut().find(|s| s.id == *id)
    }

    /// Non-cancelled slots intersecting `query`, skipping `exclude`.
    /// Slots starting at or after `query.end` are cut off by binary search.
    pub fn overlapping(&self, query: &Span, exclude: Option<Ulid>) -> impl Iterator<Item = &TimeSlot> {
        let right_bound = self.slots.partition_point(|s| s.start_time < query.end);
        self.slots[..right_bound].iter().filter(move |s| {
            s.end_time > query.start && !s.is_cancelled() && Some(s.id) != exclude
        })
    }

    /// The single lesson occupying a slot, if any.
    pub fn lesson_for_slot(&self, slot_id: &Ulid) -> Option<&Lesson> {
        self.slot(slot_id)
            .and_then(|s| s.lesson_ids.first())
            .and_then(|lid| self.lessons.get(lid))
    }

    pub fn lessons_for<'a>(&'a self, slot: &'a TimeSlot) -> impl Iterator<Item = &'a Lesson> + 'a {
        slot.lesson_ids.iter().filter_map(|lid| self.lessons.get(lid))
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    InstructorRegistered {
        id: Ulid,
        name: String,
        swim_styles: BTreeSet<SwimStyle>,
    },
    InstructorStylesUpdated {
        id: Ulid,
        swim_styles: BTreeSet<SwimStyle>,
    },
    InstructorRemoved {
        id: Ulid,
    },
    AvailabilitySet {
        instructor_id: Ulid,
        windows: Vec<AvailabilityWindow>,
    },
    SwimmerRegistered {
        id: Ulid,
        name: String,
        swim_styles: BTreeSet<SwimStyle>,
    },
    SwimmerStylesUpdated {
        id: Ulid,
        swim_styles: BTreeSet<SwimStyle>,
    },
    SwimmerRemoved {
        id: Ulid,
    },
    SlotCreated {
        slot: TimeSlot,
    },
    /// Full replacement; `from` differs from `slot.day_key()` when the slot moved.
    SlotUpdated {
        from: DayKey,
        slot: TimeSlot,
    },
    SlotDeleted {
        key: DayKey,
        id: Ulid,
    },
    SeatBooked {
        key: DayKey,
        slot_id: Ulid,
        lesson_id: Ulid,
        swimmer_id: Ulid,
        swim_style: SwimStyle,
    },
    SeatReleased {
        key: DayKey,
        lesson_id: Ulid,
        swimmer_id: Ulid,
    },
    LessonStatusChanged {
        key: DayKey,
        lesson_id: Ulid,
        status: LessonStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentInfo {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonView {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub student_details: Vec<StudentInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotView {
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub instructor_name: String,
    pub lessons: Vec<LessonView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleView {
    pub instructor_id: Ulid,
    pub instructor_name: String,
    pub date: NaiveDate,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlot {
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub instructor_name: String,
    pub remaining_seats: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayOverview {
    pub date: NaiveDate,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklySchedule {
    pub week_start: NaiveDate,
    pub days: Vec<DayOverview>,
    pub total_lessons: usize,
    pub total_swimmers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwimmerLesson {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub instructor_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityOutcome {
    pub removed: Vec<Ulid>,
    pub created: Vec<TimeSlot>,
}

/// One finding from a week's conflict scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleConflict {
    /// Two non-cancelled slots of one instructor intersect.
    InstructorDoubleBooking {
        instructor_id: Ulid,
        date: NaiveDate,
        slot_ids: [Ulid; 2],
    },
    /// A slot offers, or a scheduled lesson uses, a style the instructor no
    /// longer teaches. `lesson_id` is unset for the slot-level finding.
    StyleIncompatibility {
        instructor_id: Ulid,
        slot_id: Ulid,
        lesson_id: Option<Ulid>,
        swim_style: SwimStyle,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub lesson_type: LessonType,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleCount {
    pub swim_style: SwimStyle,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub weekday: &'static str,
    pub count: usize,
}

/// Lesson counts for seven days. Canceled lessons are not counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyStatistics {
    pub week_start: NaiveDate,
    pub total_lessons: usize,
    pub by_type: Vec<TypeCount>,
    pub by_style: Vec<StyleCount>,
    pub by_day: Vec<DayCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(t(a), t(b))
    }

    fn key() -> DayKey {
        DayKey::new(Ulid::new(), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap())
    }

    fn slot(key: DayKey, a: &str, b: &str) -> TimeSlot {
        TimeSlot {
            id: Ulid::new(),
            instructor_id: key.instructor_id,
            date: key.date,
            start_time: t(a),
            end_time: t(b),
            lesson_type: LessonType::Private,
            swim_styles: BTreeSet::from([SwimStyle::Freestyle]),
            max_capacity: 1,
            current_capacity: 0,
            status: SlotStatus::Available,
            lesson_ids: Vec::new(),
        }
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = span("09:00", "10:00");
        assert!(a.overlaps(&span("09:30", "10:30")));
        assert!(a.overlaps(&span("08:00", "11:00")));
        assert!(!a.overlaps(&span("10:00", "11:00"))); // touching
        assert!(!a.overlaps(&span("08:00", "09:00")));
        assert_eq!(a.duration_minutes(), 60);
    }

    #[test]
    fn span_contains_span() {
        let outer = span("09:00", "12:00");
        assert!(outer.contains_span(&span("09:00", "12:00")));
        assert!(outer.contains_span(&span("10:00", "11:00")));
        assert!(!outer.contains_span(&span("11:30", "12:30")));
    }

    #[test]
    fn swim_style_parsing() {
        assert_eq!("Butterfly".parse(), Ok(SwimStyle::Butterfly));
        assert_eq!(" Backstroke ".parse(), Ok(SwimStyle::Backstroke));
        assert!("Doggy paddle".parse::<SwimStyle>().is_err());
        assert!("freestyle".parse::<SwimStyle>().is_err());
    }

    #[test]
    fn lesson_type_follows_capacity() {
        assert_eq!(LessonType::for_capacity(1), LessonType::Private);
        assert_eq!(LessonType::for_capacity(5), LessonType::Group);
    }

    #[test]
    fn day_keeps_slots_sorted() {
        let k = key();
        let mut day = DaySchedule::new(k);
        day.insert_slot(slot(k, "11:00", "12:00"));
        day.insert_slot(slot(k, "09:00", "10:00"));
        day.insert_slot(slot(k, "10:00", "11:00"));
        let starts: Vec<String> = day.slots.iter().map(|s| s.start_time.to_string()).collect();
        assert_eq!(starts, ["09:00", "10:00", "11:00"]);
    }

    #[test]
    fn overlapping_skips_cancelled_and_excluded() {
        let k = key();
        let mut day = DaySchedule::new(k);
        let a = slot(k, "09:00", "10:00");
        let mut b = slot(k, "09:30", "10:30");
        b.status = SlotStatus::Cancelled;
        let c = slot(k, "10:00", "11:00");
        let (a_id, c_id) = (a.id, c.id);
        day.insert_slot(a);
        day.insert_slot(b);
        day.insert_slot(c);

        let query = span("09:45", "10:15");
        let hits: Vec<Ulid> = day.overlapping(&query, None).map(|s| s.id).collect();
        assert_eq!(hits, vec![a_id, c_id]);

        let hits: Vec<Ulid> = day.overlapping(&query, Some(a_id)).map(|s| s.id).collect();
        assert_eq!(hits, vec![c_id]);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let k = key();
        let mut day = DaySchedule::new(k);
        day.insert_slot(slot(k, "09:00", "10:00"));
        day.insert_slot(slot(k, "11:00", "12:00"));
        assert_eq!(day.overlapping(&span("10:00", "11:00"), None).count(), 0);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let k = key();
        let mut day = DaySchedule::new(k);
        day.insert_slot(slot(k, "09:00", "10:00"));
        assert!(day.remove_slot(Ulid::new()).is_none());
        assert_eq!(day.slots.len(), 1);
    }

    #[test]
    fn refresh_status_tracks_capacity_but_keeps_cancelled() {
        let mut s = slot(key(), "09:00", "10:00");
        s.current_capacity = 1;
        s.refresh_status();
        assert_eq!(s.status, SlotStatus::Booked);
        s.current_capacity = 0;
        s.refresh_status();
        assert_eq!(s.status, SlotStatus::Available);
        s.status = SlotStatus::Cancelled;
        s.refresh_status();
        assert_eq!(s.status, SlotStatus::Cancelled);
        assert!(!s.has_room());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let k = key();
        let event = Event::SlotCreated { slot: slot(k, "09:00", "09:45") };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
