//! JSON-lines request/response protocol.
//!
//! Each request is one JSON object with an `"op"` field naming the
//! operation. Fields arrive as plain strings (`YYYY-MM-DD`, `HH:MM`, ULIDs,
//! style names) and are validated into a typed [`Command`] before anything
//! reaches the engine.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::validate::*;

#[derive(Debug, Clone, Deserialize)]
pub struct WindowInput {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

/// A request as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterInstructor {
        id: Option<String>,
        name: String,
        swim_styles: Vec<String>,
    },
    UpdateInstructorStyles {
        id: String,
        swim_styles: Vec<String>,
    },
    RemoveInstructor {
        id: String,
    },
    GetInstructor {
        id: String,
    },
    RegisterSwimmer {
        id: Option<String>,
        name: String,
        swim_styles: Vec<String>,
    },
    UpdateSwimmerStyles {
        id: String,
        swim_styles: Vec<String>,
    },
    RemoveSwimmer {
        id: String,
    },
    GetSwimmer {
        id: String,
    },
    SetAvailability {
        instructor_id: String,
        windows: Vec<WindowInput>,
    },
    ApplyAvailability {
        instructor_id: String,
        windows: Vec<WindowInput>,
        lesson_type: String,
        #[serde(default)]
        swim_styles: Vec<String>,
        lesson_duration: Option<u16>,
        gap: Option<u16>,
    },
    GenerateSlots {
        instructor_id: String,
        date: String,
        start_time: String,
        end_time: String,
        lesson_type: String,
        #[serde(default)]
        swim_styles: Vec<String>,
        lesson_duration: Option<u16>,
        gap: Option<u16>,
    },
    CreateSlot {
        instructor_id: String,
        date: String,
        start_time: String,
        end_time: String,
        max_capacity: u32,
        lesson_type: Option<String>,
        #[serde(default)]
        swim_styles: Vec<String>,
    },
    UpdateSlot {
        slot_id: String,
        date: Option<String>,
        start_time: Option<String>,
        end_time: Option<String>,
        max_capacity: Option<u32>,
        lesson_type: Option<String>,
        swim_styles: Option<Vec<String>>,
        status: Option<String>,
    },
    DeleteSlot {
        slot_id: String,
    },
    GetSlot {
        slot_id: String,
    },
    FindOverlapping {
        instructor_id: String,
        date: String,
        start_time: String,
        end_time: String,
        exclude_slot_id: Option<String>,
    },
    BookLesson {
        swimmer_id: String,
        time_slot_id: String,
        swim_style: String,
    },
    CancelLesson {
        swimmer_id: String,
        lesson_id: String,
    },
    SetLessonStatus {
        lesson_id: String,
        status: String,
    },
    GetLesson {
        lesson_id: String,
    },
    GetInstructorSchedule {
        instructor_id: String,
        date: String,
    },
    GetAvailableSlots {
        date: String,
        swim_style: Option<String>,
        lesson_type: Option<String>,
    },
    GetWeeklySchedule {
        week_start: String,
    },
    GetSwimmerLessons {
        swimmer_id: String,
    },
    GetWeeklyStatistics {
        week_start: String,
    },
    GetAvailableInstructors {
        date: String,
        start_time: String,
        end_time: Option<String>,
        swim_style: Option<String>,
    },
    GetConflicts {
        week_start: String,
    },
    GetLessonConflicts {
        lesson_id: String,
    },
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RegisterInstructor { id: Ulid, name: String, swim_styles: BTreeSet<SwimStyle> },
    UpdateInstructorStyles { id: Ulid, swim_styles: BTreeSet<SwimStyle> },
    RemoveInstructor { id: Ulid },
    GetInstructor { id: Ulid },
    RegisterSwimmer { id: Ulid, name: String, swim_styles: BTreeSet<SwimStyle> },
    UpdateSwimmerStyles { id: Ulid, swim_styles: BTreeSet<SwimStyle> },
    RemoveSwimmer { id: Ulid },
    GetSwimmer { id: Ulid },
    SetAvailability { instructor_id: Ulid, windows: Vec<AvailabilityWindow> },
    ApplyAvailability {
        instructor_id: Ulid,
        windows: Vec<AvailabilityWindow>,
        template: SlotTemplate,
    },
    GenerateSlots {
        instructor_id: Ulid,
        window: AvailabilityWindow,
        template: SlotTemplate,
    },
    CreateSlot(NewSlot),
    UpdateSlot { slot_id: Ulid, patch: SlotPatch },
    DeleteSlot { slot_id: Ulid },
    GetSlot { slot_id: Ulid },
    FindOverlapping {
        instructor_id: Ulid,
        date: NaiveDate,
        span: Span,
        exclude: Option<Ulid>,
    },
    BookLesson { swimmer_id: Ulid, slot_id: Ulid, swim_style: SwimStyle },
    CancelLesson { swimmer_id: Ulid, lesson_id: Ulid },
    SetLessonStatus { lesson_id: Ulid, status: LessonStatus },
    GetLesson { lesson_id: Ulid },
    GetInstructorSchedule { instructor_id: Ulid, date: NaiveDate },
    GetAvailableSlots {
        date: NaiveDate,
        swim_style: Option<SwimStyle>,
        lesson_type: Option<LessonType>,
    },
    GetWeeklySchedule { week_start: NaiveDate },
    GetSwimmerLessons { swimmer_id: Ulid },
    GetWeeklyStatistics { week_start: NaiveDate },
    GetAvailableInstructors {
        date: NaiveDate,
        start: ClockTime,
        end: Option<ClockTime>,
        swim_style: Option<SwimStyle>,
    },
    GetConflicts { week_start: NaiveDate },
    GetLessonConflicts { lesson_id: Ulid },
}

fn window(input: &WindowInput) -> Result<AvailabilityWindow, EngineError> {
    let date = validate_date(&input.date)?;
    let span = validate_time_range(&input.start_time, &input.end_time)?;
    Ok(AvailabilityWindow {
        date,
        start_time: span.start,
        end_time: span.end,
    })
}

fn windows(inputs: &[WindowInput]) -> Result<Vec<AvailabilityWindow>, EngineError> {
    inputs.iter().map(window).collect()
}

fn new_or_given(id: Option<&str>) -> Result<Ulid, EngineError> {
    id.map_or_else(|| Ok(Ulid::new()), validate_identifier)
}

fn slot_status(s: &str) -> Result<SlotStatus, EngineError> {
    s.parse().map_err(|_| {
        EngineError::validation(format!(
            "slot status must be available, booked or cancelled, got {s:?}"
        ))
    })
}

fn lesson_status(s: &str) -> Result<LessonStatus, EngineError> {
    s.parse().map_err(|_| {
        EngineError::validation(format!(
            "lesson status must be scheduled, completed or canceled, got {s:?}"
        ))
    })
}

impl Request {
    pub fn into_command(self) -> Result<Command, EngineError> {
        Ok(match self {
            Request::RegisterInstructor { id, name, swim_styles } => Command::RegisterInstructor {
                id: new_or_given(id.as_deref())?,
                name: validate_name(&name)?,
                swim_styles: validate_swim_styles(&swim_styles, true)?,
            },
            Request::UpdateInstructorStyles { id, swim_styles } => Command::UpdateInstructorStyles {
                id: validate_identifier(&id)?,
                swim_styles: validate_swim_styles(&swim_styles, true)?,
            },
            Request::RemoveInstructor { id } => Command::RemoveInstructor {
                id: validate_identifier(&id)?,
            },
            Request::GetInstructor { id } => Command::GetInstructor {
                id: validate_identifier(&id)?,
            },
            Request::RegisterSwimmer { id, name, swim_styles } => Command::RegisterSwimmer {
                id: new_or_given(id.as_deref())?,
                name: validate_name(&name)?,
                swim_styles: validate_swim_styles(&swim_styles, true)?,
            },
            Request::UpdateSwimmerStyles { id, swim_styles } => Command::UpdateSwimmerStyles {
                id: validate_identifier(&id)?,
                swim_styles: validate_swim_styles(&swim_styles, true)?,
            },
            Request::RemoveSwimmer { id } => Command::RemoveSwimmer {
                id: validate_identifier(&id)?,
            },
            Request::GetSwimmer { id } => Command::GetSwimmer {
                id: validate_identifier(&id)?,
            },
            Request::SetAvailability { instructor_id, windows: ws } => Command::SetAvailability {
                instructor_id: validate_identifier(&instructor_id)?,
                windows: windows(&ws)?,
            },
            Request::ApplyAvailability {
                instructor_id,
                windows: ws,
                lesson_type,
                swim_styles,
                lesson_duration,
                gap,
            } => Command::ApplyAvailability {
                instructor_id: validate_identifier(&instructor_id)?,
                windows: windows(&ws)?,
                template: SlotTemplate {
                    lesson_type: validate_lesson_type(&lesson_type)?,
                    swim_styles: validate_swim_styles(&swim_styles, false)?,
                    lesson_duration,
                    gap,
                },
            },
            Request::GenerateSlots {
                instructor_id,
                date,
                start_time,
                end_time,
                lesson_type,
                swim_styles,
                lesson_duration,
                gap,
            } => Command::GenerateSlots {
                instructor_id: validate_identifier(&instructor_id)?,
                window: window(&WindowInput { date, start_time, end_time })?,
                template: SlotTemplate {
                    lesson_type: validate_lesson_type(&lesson_type)?,
                    swim_styles: validate_swim_styles(&swim_styles, false)?,
                    lesson_duration,
                    gap,
                },
            },
            Request::CreateSlot {
                instructor_id,
                date,
                start_time,
                end_time,
                max_capacity,
                lesson_type,
                swim_styles,
            } => Command::CreateSlot(NewSlot {
                instructor_id: validate_identifier(&instructor_id)?,
                date: validate_date(&date)?,
                span: validate_time_range(&start_time, &end_time)?,
                max_capacity,
                lesson_type: lesson_type.as_deref().map(validate_lesson_type).transpose()?,
                swim_styles: validate_swim_styles(&swim_styles, false)?,
            }),
            Request::UpdateSlot {
                slot_id,
                date,
                start_time,
                end_time,
                max_capacity,
                lesson_type,
                swim_styles,
                status,
            } => Command::UpdateSlot {
                slot_id: validate_identifier(&slot_id)?,
                patch: SlotPatch {
                    date: date.as_deref().map(validate_date).transpose()?,
                    start_time: start_time.as_deref().map(validate_time).transpose()?,
                    end_time: end_time.as_deref().map(validate_time).transpose()?,
                    max_capacity,
                    lesson_type: lesson_type.as_deref().map(validate_lesson_type).transpose()?,
                    swim_styles: swim_styles
                        .map(|s| validate_swim_styles(&s, true))
                        .transpose()?,
                    status: status.as_deref().map(slot_status).transpose()?,
                },
            },
            Request::DeleteSlot { slot_id } => Command::DeleteSlot {
                slot_id: validate_identifier(&slot_id)?,
            },
            Request::GetSlot { slot_id } => Command::GetSlot {
                slot_id: validate_identifier(&slot_id)?,
            },
            Request::FindOverlapping {
                instructor_id,
                date,
                start_time,
                end_time,
                exclude_slot_id,
            } => Command::FindOverlapping {
                instructor_id: validate_identifier(&instructor_id)?,
                date: validate_date(&date)?,
                span: validate_time_range(&start_time, &end_time)?,
                exclude: exclude_slot_id.as_deref().map(validate_identifier).transpose()?,
            },
            Request::BookLesson {
                swimmer_id,
                time_slot_id,
                swim_style,
            } => Command::BookLesson {
                swimmer_id: validate_identifier(&swimmer_id)?,
                slot_id: validate_identifier(&time_slot_id)?,
                swim_style: validate_swim_style(&swim_style)?,
            },
            Request::CancelLesson { swimmer_id, lesson_id } => Command::CancelLesson {
                swimmer_id: validate_identifier(&swimmer_id)?,
                lesson_id: validate_identifier(&lesson_id)?,
            },
            Request::SetLessonStatus { lesson_id, status } => Command::SetLessonStatus {
                lesson_id: validate_identifier(&lesson_id)?,
                status: lesson_status(&status)?,
            },
            Request::GetLesson { lesson_id } => Command::GetLesson {
                lesson_id: validate_identifier(&lesson_id)?,
            },
            Request::GetInstructorSchedule { instructor_id, date } => Command::GetInstructorSchedule {
                instructor_id: validate_identifier(&instructor_id)?,
                date: validate_date(&date)?,
            },
            Request::GetAvailableSlots {
                date,
                swim_style,
                lesson_type,
            } => Command::GetAvailableSlots {
                date: validate_date(&date)?,
                swim_style: swim_style.as_deref().map(validate_swim_style).transpose()?,
                lesson_type: lesson_type.as_deref().map(validate_lesson_type).transpose()?,
            },
            Request::GetWeeklySchedule { week_start } => Command::GetWeeklySchedule {
                week_start: validate_date(&week_start)?,
            },
            Request::GetSwimmerLessons { swimmer_id } => Command::GetSwimmerLessons {
                swimmer_id: validate_identifier(&swimmer_id)?,
            },
            Request::GetWeeklyStatistics { week_start } => Command::GetWeeklyStatistics {
                week_start: validate_date(&week_start)?,
            },
            Request::GetAvailableInstructors {
                date,
                start_time,
                end_time,
                swim_style,
            } => Command::GetAvailableInstructors {
                date: validate_date(&date)?,
                start: validate_time(&start_time)?,
                end: end_time.as_deref().map(validate_time).transpose()?,
                swim_style: swim_style.as_deref().map(validate_swim_style).transpose()?,
            },
            Request::GetConflicts { week_start } => Command::GetConflicts {
                week_start: validate_date(&week_start)?,
            },
            Request::GetLessonConflicts { lesson_id } => Command::GetLessonConflicts {
                lesson_id: validate_identifier(&lesson_id)?,
            },
        })
    }
}

/// Parse one request line into a command.
pub fn parse_request(line: &str) -> Result<Command, EngineError> {
    let request: Request = serde_json::from_str(line)
        .map_err(|e| EngineError::validation(format!("malformed request: {e}")))?;
    request.into_command()
}

/// Successful payloads. Serialized without a tag.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Instructor(Instructor),
    Swimmer(Swimmer),
    Slot(TimeSlot),
    MaybeSlot(Option<TimeSlot>),
    Slots(Vec<TimeSlot>),
    Lesson(Lesson),
    Flag(bool),
    Schedule(ScheduleView),
    Available(Vec<AvailableSlot>),
    Week(WeeklySchedule),
    SwimmerLessons(Vec<SwimmerLesson>),
    Availability(AvailabilityOutcome),
    Statistics(WeeklyStatistics),
    Instructors(Vec<Instructor>),
    Conflicts(Vec<ScheduleConflict>),
    Lessons(Vec<Lesson>),
    Unit,
}

pub async fn execute(engine: &Engine, cmd: Command) -> Result<Reply, EngineError> {
    Ok(match cmd {
        Command::RegisterInstructor { id, name, swim_styles } => {
            Reply::Instructor(engine.register_instructor(id, &name, swim_styles).await?)
        }
        Command::UpdateInstructorStyles { id, swim_styles } => {
            Reply::Instructor(engine.update_instructor_styles(id, swim_styles).await?)
        }
        Command::RemoveInstructor { id } => {
            engine.remove_instructor(id).await?;
            Reply::Unit
        }
        Command::GetInstructor { id } => Reply::Instructor(engine.get_instructor(id)?),
        Command::RegisterSwimmer { id, name, swim_styles } => {
            Reply::Swimmer(engine.register_swimmer(id, &name, swim_styles).await?)
        }
        Command::UpdateSwimmerStyles { id, swim_styles } => {
            Reply::Swimmer(engine.update_swimmer_styles(id, swim_styles).await?)
        }
        Command::RemoveSwimmer { id } => {
            engine.remove_swimmer(id).await?;
            Reply::Unit
        }
        Command::GetSwimmer { id } => Reply::Swimmer(engine.get_swimmer(id)?),
        Command::SetAvailability { instructor_id, windows } => {
            Reply::Instructor(engine.set_availability(instructor_id, windows).await?)
        }
        Command::ApplyAvailability {
            instructor_id,
            windows,
            template,
        } => Reply::Availability(engine.apply_availability(instructor_id, windows, template).await?),
        Command::GenerateSlots {
            instructor_id,
            window,
            template,
        } => Reply::Slots(engine.generate_slots(instructor_id, window, &template).await?),
        Command::CreateSlot(new) => Reply::Slot(engine.create_slot(new).await?),
        Command::UpdateSlot { slot_id, patch } => {
            Reply::MaybeSlot(engine.update_slot(slot_id, patch).await?)
        }
        Command::DeleteSlot { slot_id } => Reply::Flag(engine.delete_slot(slot_id).await?),
        Command::GetSlot { slot_id } => Reply::MaybeSlot(engine.get_slot(slot_id).await),
        Command::FindOverlapping {
            instructor_id,
            date,
            span,
            exclude,
        } => Reply::Slots(engine.find_overlapping(instructor_id, date, span, exclude).await),
        Command::BookLesson {
            swimmer_id,
            slot_id,
            swim_style,
        } => Reply::Lesson(engine.book_lesson(swimmer_id, slot_id, swim_style).await?),
        Command::CancelLesson { swimmer_id, lesson_id } => {
            Reply::Flag(engine.cancel_lesson(swimmer_id, lesson_id).await?)
        }
        Command::SetLessonStatus { lesson_id, status } => {
            Reply::Lesson(engine.set_lesson_status(lesson_id, status).await?)
        }
        Command::GetLesson { lesson_id } => Reply::Lesson(engine.get_lesson(lesson_id).await?),
        Command::GetInstructorSchedule { instructor_id, date } => {
            Reply::Schedule(engine.get_instructor_schedule(instructor_id, date).await)
        }
        Command::GetAvailableSlots {
            date,
            swim_style,
            lesson_type,
        } => Reply::Available(engine.get_available_slots(date, swim_style, lesson_type).await),
        Command::GetWeeklySchedule { week_start } => {
            Reply::Week(engine.get_weekly_schedule(week_start).await?)
        }
        Command::GetSwimmerLessons { swimmer_id } => {
            Reply::SwimmerLessons(engine.get_swimmer_lessons(swimmer_id).await)
        }
        Command::GetWeeklyStatistics { week_start } => {
            Reply::Statistics(engine.get_weekly_statistics(week_start).await?)
        }
        Command::GetAvailableInstructors {
            date,
            start,
            end,
            swim_style,
        } => Reply::Instructors(engine.get_available_instructors(date, start, end, swim_style)?),
        Command::GetConflicts { week_start } => {
            Reply::Conflicts(engine.get_conflicts(week_start).await?)
        }
        Command::GetLessonConflicts { lesson_id } => {
            Reply::Lessons(engine.get_lesson_conflicts(lesson_id).await?)
        }
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// `{"ok":true,"data":...}` or `{"ok":false,"error":{...}}`.
#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: Reply) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &EngineError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: err.kind().as_str(),
                message: err.to_string(),
            }),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("failed to encode response: {e}");
            r#"{"ok":false,"error":{"kind":"internal","message":"failed to encode response"}}"#
                .to_string()
        })
    }
}

/// Parse, execute, and time one request line.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    let cmd = match parse_request(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            metrics::counter!(observability::COMMANDS_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            return Response::failure(&e);
        }
    };
    let label = observability::command_label(&cmd);
    let start = Instant::now();
    let result = execute(engine, cmd).await;
    metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    match result {
        Ok(reply) => {
            metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => "ok")
                .increment(1);
            Response::success(reply)
        }
        Err(e) => {
            metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => "error")
                .increment(1);
            if e.kind() == crate::engine::ErrorKind::Internal {
                tracing::error!(command = label, "command failed: {e}");
            }
            Response::failure(&e)
        }
    }
}
