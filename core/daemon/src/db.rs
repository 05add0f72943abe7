//! SQLite persistence for classeye-daemon.
//!
//! Single-writer store: an append-only `events` table holding each record's
//! JSON payload, the `students` roster, and per-day `summaries` written when a
//! session is evaluated.

use attendance_core::{
    sort_events, AttendanceError, AttendanceStatus, AttendanceVerdict, EventFilter, EventStore,
};
use chrono::NaiveDate;
use classeye_daemon_protocol::{EventRecord, Student};
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;

pub struct Db {
    path: PathBuf,
}

/// A stored day summary: the batch it was evaluated for plus its verdicts.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRows {
    pub batch: String,
    pub verdicts: Vec<AttendanceVerdict>,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn insert_event(&self, event: &EventRecord) -> Result<(), String> {
        self.with_connection(|conn| {
            let payload = serde_json::to_string(event)
                .map_err(|err| format!("Failed to serialize event payload: {}", err))?;

            conn.execute(
                "INSERT INTO events (id, recorded_at, student_id, kind, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO NOTHING",
                params![
                    event.event_id,
                    event.recorded_at,
                    event.student_id,
                    event.kind.as_str(),
                    payload
                ],
            )
            .map_err(|err| format!("Failed to insert event: {}", err))?;

            Ok(())
        })
    }

    /// Events matching `filter`, in timestamp order with insertion order kept
    /// for ties. Rows whose payload no longer parses are skipped.
    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, String> {
        let from = filter.from.map(|date| date.to_string());
        let to = filter.to.map(|date| date.to_string());

        let mut events = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT payload FROM events \
                     WHERE (?1 IS NULL OR student_id = ?1) \
                       AND (?2 IS NULL OR substr(recorded_at, 1, 10) >= ?2) \
                       AND (?3 IS NULL OR substr(recorded_at, 1, 10) <= ?3) \
                     ORDER BY seq ASC",
                )
                .map_err(|err| format!("Failed to prepare events query: {}", err))?;

            let rows = stmt
                .query_map(params![filter.student_id, from, to], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|err| format!("Failed to read event rows: {}", err))?;

            let mut events = Vec::new();
            for row in rows {
                let payload = row.map_err(|err| format!("Failed to decode event row: {}", err))?;
                match serde_json::from_str::<EventRecord>(&payload) {
                    Ok(event) => events.push(event),
                    Err(err) => {
                        tracing::warn!(error = %err, "Skipping unreadable event payload");
                    }
                }
            }
            Ok(events)
        })?;

        events.retain(|event| filter.matches(event));
        sort_events(&mut events);
        Ok(events)
    }

    pub fn insert_student(&self, student: &Student) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO students (student_id, name, batches) VALUES (?1, ?2, ?3)",
                params![student.student_id, student.name, student.batches.join(",")],
            )
            .map_err(|err| format!("Failed to insert student: {}", err))?;
            Ok(())
        })
    }

    /// Returns whether a row was deleted.
    pub fn delete_student(&self, student_id: &str) -> Result<bool, String> {
        self.with_connection(|conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM students WHERE student_id = ?1",
                    params![student_id],
                )
                .map_err(|err| format!("Failed to delete student: {}", err))?;
            Ok(deleted > 0)
        })
    }

    pub fn list_students(&self) -> Result<Vec<Student>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT student_id, name, batches FROM students ORDER BY student_id ASC")
                .map_err(|err| format!("Failed to prepare students query: {}", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(Student::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        &row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|err| format!("Failed to read student rows: {}", err))?;

            let mut students = Vec::new();
            for row in rows {
                students.push(row.map_err(|err| format!("Failed to decode student row: {}", err))?);
            }
            Ok(students)
        })
    }

    /// Replaces the stored summary for `date`.
    pub fn save_summary(
        &self,
        date: NaiveDate,
        batch: &str,
        verdicts: &[AttendanceVerdict],
        saved_at: &str,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin summary transaction: {}", err))?;
            tx.execute(
                "DELETE FROM summaries WHERE date = ?1",
                params![date.to_string()],
            )
            .map_err(|err| format!("Failed to clear summary: {}", err))?;

            for verdict in verdicts {
                tx.execute(
                    "INSERT INTO summaries \
                        (date, student_id, name, cumulative_seconds, status, batch, saved_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        date.to_string(),
                        verdict.student_id,
                        verdict.name,
                        verdict.cumulative_seconds,
                        verdict.status.as_str(),
                        batch,
                        saved_at
                    ],
                )
                .map_err(|err| format!("Failed to insert summary row: {}", err))?;
            }

            tx.commit()
                .map_err(|err| format!("Failed to commit summary: {}", err))
        })
    }

    pub fn load_summary(&self, date: NaiveDate) -> Result<Option<SummaryRows>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT student_id, name, cumulative_seconds, status, batch \
                     FROM summaries WHERE date = ?1 ORDER BY student_id ASC",
                )
                .map_err(|err| format!("Failed to prepare summary query: {}", err))?;

            let rows = stmt
                .query_map(params![date.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(|err| format!("Failed to read summary rows: {}", err))?;

            let mut batch = None;
            let mut verdicts = Vec::new();
            for row in rows {
                let (student_id, name, cumulative_seconds, status, row_batch) =
                    row.map_err(|err| format!("Failed to decode summary row: {}", err))?;
                let Some(status) = AttendanceStatus::parse(&status) else {
                    tracing::warn!(student_id = %student_id, status = %status, "Skipping summary row with unknown status");
                    continue;
                };
                batch.get_or_insert(row_batch);
                verdicts.push(AttendanceVerdict {
                    date,
                    student_id,
                    name,
                    cumulative_seconds,
                    status,
                });
            }

            Ok(batch.map(|batch| SummaryRows { batch, verdicts }))
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS events (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    recorded_at TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    payload TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS events_student_id ON events(student_id);
                 CREATE INDEX IF NOT EXISTS events_recorded_at ON events(recorded_at);
                 CREATE TABLE IF NOT EXISTS students (
                    student_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    batches TEXT NOT NULL DEFAULT ''
                 );
                 CREATE TABLE IF NOT EXISTS summaries (
                    date TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    cumulative_seconds REAL NOT NULL,
                    status TEXT NOT NULL,
                    batch TEXT NOT NULL,
                    saved_at TEXT NOT NULL,
                    PRIMARY KEY (date, student_id)
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl EventStore for Db {
    fn append(&self, event: &EventRecord) -> attendance_core::Result<()> {
        self.insert_event(event).map_err(AttendanceError::Store)
    }

    fn read_all(&self, filter: &EventFilter) -> attendance_core::Result<Vec<EventRecord>> {
        self.list_events(filter).map_err(AttendanceError::Store)
    }
}
