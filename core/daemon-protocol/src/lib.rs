//! IPC protocol types and the attendance event schema for classeye-daemon.
//!
//! This crate is shared by the daemon, the accounting core and the CLI so the
//! event log contract cannot drift: whatever the live engine appends, the
//! reconstructor must be able to read back with the same meaning.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Identity used for session control events.
pub const SYSTEM_ID: &str = "SYSTEM";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const MAX_EVENT_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Frame,
    StartSession,
    EndSession,
    GetVerdicts,
    GetReport,
    ListEvents,
    RecordCorrection,
    RegisterStudent,
    RemoveStudent,
    ListStudents,
    ListBatches,
    /// Final evaluation and summary save, then the daemon exits.
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event log schema
// ═══════════════════════════════════════════════════════════════════════════════

/// What happened, with the payload that belongs to each kind.
///
/// Only `entry` and `exit` take part in interval pairing; every other kind is
/// an annotation for humans reading the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    Entry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        absent_seconds: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        late_at: Option<NaiveTime>,
    },
    Exit,
    Late {
        entered_at: NaiveTime,
    },
    EarlyLeave {
        left_at: NaiveTime,
    },
    AbsentInterval {
        absent_seconds: i64,
    },
    BlockedBatch {
        batches: Vec<String>,
        active_batch: String,
    },
    SessionStart,
    SessionEnd,
    CorrectionNote,
}

impl EventKind {
    /// A plain entry with no re-entry or lateness annotations.
    pub fn entry() -> Self {
        EventKind::Entry {
            absent_seconds: None,
            late_at: None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Entry { .. } => "entry",
            EventKind::Exit => "exit",
            EventKind::Late { .. } => "late",
            EventKind::EarlyLeave { .. } => "early_leave",
            EventKind::AbsentInterval { .. } => "absent_interval",
            EventKind::BlockedBatch { .. } => "blocked_batch",
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::CorrectionNote => "correction_note",
        }
    }
}

/// One immutable row of the append-only attendance log.
///
/// `recorded_at` stays a string on the wire and in storage; a record whose
/// timestamp cannot be parsed is skipped by readers rather than rejected by
/// the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub recorded_at: String,
    pub student_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl EventRecord {
    pub fn new(
        at: NaiveDateTime,
        student_id: impl Into<String>,
        name: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            event_id: make_event_id(),
            recorded_at: format_timestamp(at),
            student_id: student_id.into(),
            name: name.into(),
            kind,
            note: None,
        }
    }

    pub fn system(at: NaiveDateTime, kind: EventKind) -> Self {
        Self::new(at, SYSTEM_ID, SYSTEM_ID, kind)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.note = if note.trim().is_empty() {
            None
        } else {
            Some(note)
        };
        self
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.recorded_at)
    }

    /// Human-readable detail line, as shown in event listings.
    pub fn details(&self) -> String {
        let base = match &self.kind {
            EventKind::Entry {
                absent_seconds,
                late_at,
            } => {
                let mut parts = Vec::new();
                if let Some(seconds) = absent_seconds {
                    parts.push(format!("re-entry, absent_seconds={}", seconds));
                }
                if let Some(at) = late_at {
                    parts.push(format!("late (entered at {})", at.format("%H:%M")));
                }
                parts.join("; ")
            }
            EventKind::Late { entered_at } => {
                format!("late (entered at {})", entered_at.format("%H:%M"))
            }
            EventKind::EarlyLeave { left_at } => {
                format!("early_leave (left at {})", left_at.format("%H:%M"))
            }
            EventKind::AbsentInterval { absent_seconds } => absent_seconds.to_string(),
            EventKind::BlockedBatch {
                batches,
                active_batch,
            } => format!(
                "detected for batch {} while current batch is {}",
                batches.join(", "),
                active_batch
            ),
            EventKind::SessionStart | EventKind::SessionEnd => self
                .timestamp()
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            EventKind::Exit | EventKind::CorrectionNote => String::new(),
        };

        match (&self.note, base.is_empty()) {
            (Some(note), true) => note.clone(),
            (Some(note), false) => format!("{}; {}", base, note),
            (None, _) => base,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > MAX_EVENT_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }
        if self.timestamp().is_none() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be YYYY-MM-DDTHH:MM:SS",
            ));
        }
        require_str(&self.student_id, "student_id")?;
        Ok(())
    }
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts both `T` and space separated timestamps, with optional fraction.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, LEGACY_TIMESTAMP_FORMAT))
        .ok()
}

fn make_event_id() -> String {
    format!("evt-{}", ulid::Ulid::new())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roster schema
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub batches: Vec<String>,
}

impl Student {
    pub fn new(student_id: impl Into<String>, name: impl Into<String>, batches: &str) -> Self {
        Self {
            student_id: student_id.into(),
            name: name.into(),
            batches: parse_batches(batches),
        }
    }

    /// Batch tags normalized for case-insensitive comparison.
    pub fn batch_keys(&self) -> BTreeSet<String> {
        self.batches
            .iter()
            .map(|batch| batch.trim().to_uppercase())
            .filter(|batch| !batch.is_empty())
            .collect()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_str(&self.student_id, "student_id")?;
        require_str(&self.name, "name")?;
        if self.student_id == SYSTEM_ID {
            return Err(ErrorInfo::new(
                "invalid_student_id",
                "SYSTEM is reserved for session events",
            ));
        }
        Ok(())
    }
}

/// Splits a comma-separated batch list, dropping blanks.
pub fn parse_batches(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request parameters
// ═══════════════════════════════════════════════════════════════════════════════

/// One face region as classified by the external recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameParams {
    #[serde(default)]
    pub observations: Vec<FaceObservation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictParams {
    #[serde(default)]
    pub save: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportParams {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub rebuild: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventQueryParams {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub student_id: Option<String>,
}

impl EventQueryParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ErrorInfo::new(
                    "invalid_range",
                    "from must not be after to",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    Entry,
    Exit,
    CorrectionNote,
}

impl CorrectionKind {
    pub fn to_event_kind(self) -> EventKind {
        match self {
            CorrectionKind::Entry => EventKind::entry(),
            CorrectionKind::Exit => EventKind::Exit,
            CorrectionKind::CorrectionNote => EventKind::CorrectionNote,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrectionParams {
    pub student_id: String,
    pub kind: CorrectionKind,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

impl CorrectionParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        require_str(&self.student_id, "student_id")?;
        if let Some(recorded_at) = &self.recorded_at {
            if parse_timestamp(recorded_at).is_none() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be YYYY-MM-DD HH:MM:SS",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveStudentParams {
    pub student_id: String,
}

/// Decodes request params, treating absent params as an empty object.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorInfo> {
    let params = params.unwrap_or_else(|| Value::Object(Default::default()));
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))
}

fn require_str(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}
