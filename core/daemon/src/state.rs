//! In-memory state managed by the daemon.
//!
//! One `PresenceEngine` behind a mutex. Every mutation reads the clock once,
//! runs the engine, and appends the resulting events to SQLite while still
//! holding the lock so the log order matches the engine's order.

use attendance_core::{
    reconstruct_logged_day, sightings_from_frame, AttendanceConfig, AttendanceReport,
    AttendanceVerdict, BatchFilter, Clock, EventFilter, EventStore, InMemoryRoster, ManualSession,
    PresenceEngine, ReportSource, Roster, SessionClose, SessionWindow, SystemClock,
};
use chrono::NaiveDateTime;
use classeye_daemon_protocol::{
    format_timestamp, parse_timestamp, CorrectionParams, ErrorInfo, EventRecord,
    FaceObservation, ReportParams, Student,
};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

use crate::db::Db;
use crate::recognizer::RosterRecognizer;

type Engine = PresenceEngine<InMemoryRoster>;

pub struct SharedState {
    db: Db,
    clock: Box<dyn Clock>,
    engine: Mutex<Engine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameOutcome {
    pub sightings: usize,
    pub events: Vec<EventRecord>,
    pub present: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub now: String,
    pub registered: usize,
    pub tracked: usize,
    pub present: usize,
    pub present_students: Vec<String>,
    pub active_batch: String,
    pub window: SessionWindow,
    pub manual_session: ManualSession,
}

impl SharedState {
    pub fn new(db: Db, config: AttendanceConfig) -> Self {
        Self::with_clock(db, config, Box::new(SystemClock))
    }

    pub fn with_clock(db: Db, config: AttendanceConfig, clock: Box<dyn Clock>) -> Self {
        let students = match db.list_students() {
            Ok(students) => students,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load roster; starting empty");
                Vec::new()
            }
        };
        tracing::info!(
            students = students.len(),
            active_batch = %config.active_batch,
            "Roster loaded"
        );
        let engine = PresenceEngine::new(config, InMemoryRoster::new(students));
        Self {
            db,
            clock,
            engine: Mutex::new(engine),
        }
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, Engine>, ErrorInfo> {
        self.engine
            .lock()
            .map_err(|_| ErrorInfo::new("state_unavailable", "engine lock poisoned"))
    }

    /// Appends in order and stops at the first failed write.
    fn persist(&self, events: &[EventRecord]) -> Result<(), ErrorInfo> {
        self.db.append_all(events).map_err(storage_error)
    }

    pub fn ingest_frame(&self, observations: &[FaceObservation]) -> Result<FrameOutcome, ErrorInfo> {
        let now = self.clock.now();
        let mut engine = self.lock_engine()?;
        let sightings = sightings_from_frame(&RosterRecognizer::new(engine.roster()), observations);
        let events = engine.tick(now, &sightings);
        self.persist(&events)?;

        Ok(FrameOutcome {
            sightings: sightings.len(),
            present: engine.present_count(),
            events,
        })
    }

    /// Exit-timeout sweep with an empty frame.
    pub fn sweep(&self) -> Result<usize, ErrorInfo> {
        let now = self.clock.now();
        let mut engine = self.lock_engine()?;
        let events = engine.tick(now, &[]);
        self.persist(&events)?;
        Ok(events.len())
    }

    pub fn start_session(&self) -> Result<EventRecord, ErrorInfo> {
        let now = self.clock.now();
        let mut engine = self.lock_engine()?;
        let event = engine.start_session(now);
        self.persist(std::slice::from_ref(&event))?;
        Ok(event)
    }

    /// Closes the manual session and stores the day summary. `None` when no
    /// manual session was started.
    pub fn end_session(&self) -> Result<Option<SessionClose>, ErrorInfo> {
        let now = self.clock.now();
        let mut engine = self.lock_engine()?;
        let Some(close) = engine.end_session(now) else {
            return Ok(None);
        };
        self.close_out(&engine, now, close).map(Some)
    }

    /// Final evaluation before the daemon exits: closes an open manual
    /// session, counts open presence intervals up to now, and saves the day.
    pub fn finish(&self) -> Result<SessionClose, ErrorInfo> {
        let now = self.clock.now();
        let mut engine = self.lock_engine()?;
        let close = engine.finish(now);
        tracing::info!(
            present = engine.present_count(),
            ended_session = close.event.is_some(),
            "Final attendance evaluation"
        );
        self.close_out(&engine, now, close)
    }

    /// Persists the closing event and saves the batch-admitted verdicts as the
    /// day summary; the returned close carries the same verdicts.
    fn close_out(
        &self,
        engine: &Engine,
        now: NaiveDateTime,
        close: SessionClose,
    ) -> Result<SessionClose, ErrorInfo> {
        if let Some(event) = &close.event {
            self.persist(std::slice::from_ref(event))?;
        }
        let verdicts = admitted(engine, close.verdicts);
        self.save_summary(engine, now, &verdicts)?;
        Ok(SessionClose {
            event: close.event,
            verdicts,
        })
    }

    /// Verdicts as of now; open intervals are previewed, not closed.
    pub fn verdicts(&self, save: bool) -> Result<Vec<AttendanceVerdict>, ErrorInfo> {
        let now = self.clock.now();
        let engine = self.lock_engine()?;
        let verdicts = admitted(&engine, engine.evaluate(now));
        if save {
            self.save_summary(&engine, now, &verdicts)?;
        }
        Ok(verdicts)
    }

    fn save_summary(
        &self,
        engine: &Engine,
        now: NaiveDateTime,
        verdicts: &[AttendanceVerdict],
    ) -> Result<(), ErrorInfo> {
        let date = engine.sessions().resolve(now).start.date();
        self.db
            .save_summary(
                date,
                &engine.batch_filter().to_string(),
                verdicts,
                &format_timestamp(now),
            )
            .map_err(storage_error)?;
        tracing::info!(
            date = %date,
            students = verdicts.len(),
            present = verdicts.iter().filter(|v| v.is_present()).count(),
            "Attendance summary saved"
        );
        Ok(())
    }

    /// Stored summary for the day unless a rebuild is requested or none
    /// exists; otherwise reconstructed from that day's events.
    pub fn report(&self, params: &ReportParams) -> Result<AttendanceReport, ErrorInfo> {
        let now = self.clock.now();
        let engine = self.lock_engine()?;
        let date = params.date.unwrap_or_else(|| now.date());
        let filter = params
            .batch
            .as_deref()
            .map(BatchFilter::parse)
            .unwrap_or_else(|| engine.batch_filter().clone());

        if !params.rebuild {
            if let Some(summary) = self.db.load_summary(date).map_err(storage_error)? {
                let verdicts = summary
                    .verdicts
                    .into_iter()
                    .filter(|verdict| match engine.roster().batches_of(&verdict.student_id) {
                        Some(batches) => filter.admits(&batches),
                        None => filter == BatchFilter::All,
                    })
                    .collect();
                return Ok(AttendanceReport::from_verdicts(
                    date,
                    &filter,
                    ReportSource::Summary,
                    verdicts,
                ));
            }
        }

        let events = self
            .db
            .read_all(&EventFilter::on(date))
            .map_err(storage_error)?;
        let config = engine.config();
        let verdicts = reconstruct_logged_day(
            config.schedule(),
            date,
            &events,
            engine.roster(),
            &filter,
            config.min_in_class_seconds(),
        );
        tracing::debug!(date = %date, events = events.len(), "Report rebuilt from events");
        Ok(AttendanceReport::from_verdicts(
            date,
            &filter,
            ReportSource::Events,
            verdicts,
        ))
    }

    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, ErrorInfo> {
        self.db.read_all(filter).map_err(storage_error)
    }

    /// Appends an operator-authored row. Live presence is left untouched; the
    /// row only affects reconstruction.
    pub fn record_correction(&self, params: &CorrectionParams) -> Result<EventRecord, ErrorInfo> {
        params.validate()?;
        let engine = self.lock_engine()?;
        let Some(name) = engine.roster().name_of(&params.student_id) else {
            return Err(student_not_found(&params.student_id));
        };
        let at = params
            .recorded_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(|| self.clock.now());

        let reason = params.reason.trim();
        let note = if reason.is_empty() {
            "manual correction".to_string()
        } else {
            format!("manual correction: {}", reason)
        };
        let event = EventRecord::new(at, params.student_id.as_str(), name, params.kind.to_event_kind())
            .with_note(note);
        self.db.append(&event).map_err(storage_error)?;
        tracing::info!(
            student_id = %event.student_id,
            kind = event.kind.as_str(),
            recorded_at = %event.recorded_at,
            "Manual correction recorded"
        );
        Ok(event)
    }

    pub fn register_student(&self, student: Student) -> Result<Student, ErrorInfo> {
        student.validate()?;
        let mut engine = self.lock_engine()?;
        if engine.roster().contains(&student.student_id) {
            return Err(ErrorInfo::new(
                "student_exists",
                format!("student {} is already registered", student.student_id),
            ));
        }
        self.db.insert_student(&student).map_err(storage_error)?;
        engine
            .roster_mut()
            .insert(student.clone())
            .map_err(|err| ErrorInfo::new("student_exists", err.to_string()))?;
        engine.register(&student.student_id);
        tracing::info!(student_id = %student.student_id, batches = ?student.batches, "Student registered");
        Ok(student)
    }

    /// Removes a student from the roster. Their events stay in the log.
    pub fn remove_student(&self, student_id: &str) -> Result<Student, ErrorInfo> {
        let mut engine = self.lock_engine()?;
        if !engine.roster().contains(student_id) {
            return Err(student_not_found(student_id));
        }
        self.db.delete_student(student_id).map_err(storage_error)?;
        let student = engine
            .roster_mut()
            .remove(student_id)
            .map_err(|_| student_not_found(student_id))?;
        engine.forget(student_id);
        tracing::info!(student_id = %student_id, "Student removed");
        Ok(student)
    }

    pub fn list_students(&self) -> Result<Vec<Student>, ErrorInfo> {
        let engine = self.lock_engine()?;
        Ok(engine.roster().students().cloned().collect())
    }

    pub fn list_batches(&self) -> Result<Vec<String>, ErrorInfo> {
        let engine = self.lock_engine()?;
        Ok(engine.roster().batches())
    }

    pub fn health_snapshot(&self) -> Result<HealthSnapshot, ErrorInfo> {
        let now = self.clock.now();
        let engine = self.lock_engine()?;
        let mut present_students: Vec<String> = engine
            .store()
            .iter()
            .filter(|(_, record)| record.is_present())
            .map(|(student_id, _)| student_id.clone())
            .collect();
        present_students.sort();
        Ok(HealthSnapshot {
            now: format_timestamp(now),
            registered: engine.roster().len(),
            tracked: engine.store().len(),
            present: engine.present_count(),
            present_students,
            active_batch: engine.batch_filter().to_string(),
            window: engine.sessions().resolve(now),
            manual_session: engine.manual_session(),
        })
    }
}

/// Drops students outside the active batch from a verdict list.
fn admitted(engine: &Engine, verdicts: Vec<AttendanceVerdict>) -> Vec<AttendanceVerdict> {
    let filter = engine.batch_filter();
    verdicts
        .into_iter()
        .filter(|verdict| {
            engine
                .roster()
                .batches_of(&verdict.student_id)
                .is_some_and(|batches| filter.admits(&batches))
        })
        .collect()
}

fn storage_error(err: impl std::fmt::Display) -> ErrorInfo {
    tracing::warn!(error = %err, "Storage operation failed");
    ErrorInfo::new("storage_error", err.to_string())
}

fn student_not_found(student_id: &str) -> ErrorInfo {
    ErrorInfo::new(
        "student_not_found",
        format!("student {} is not registered", student_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_core::{AttendanceStatus, FixedClock};
    use chrono::{Duration, NaiveDate};
    use classeye_daemon_protocol::{CorrectionKind, EventKind};
    use std::sync::Arc;

    struct SharedClock(Arc<FixedClock>);

    impl Clock for SharedClock {
        fn now(&self) -> NaiveDateTime {
            self.0.now()
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("time")
    }

    fn setup(active_batch: &str) -> (tempfile::TempDir, Arc<FixedClock>, SharedState) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("attendance.db")).expect("db init");
        let clock = Arc::new(FixedClock::new(at(9, 0)));
        let config = AttendanceConfig {
            active_batch: active_batch.to_string(),
            ..AttendanceConfig::default()
        };
        let state = SharedState::with_clock(db, config, Box::new(SharedClock(Arc::clone(&clock))));
        state
            .register_student(Student::new("S1", "Asha", "B1"))
            .expect("register S1");
        state
            .register_student(Student::new("S2", "Bea", "B2"))
            .expect("register S2");
        (temp_dir, clock, state)
    }

    fn frame(labels: &[&str]) -> Vec<FaceObservation> {
        labels
            .iter()
            .map(|label| FaceObservation {
                label: label.to_string(),
                confidence: 40.0,
            })
            .collect()
    }

    /// One frame per second from the current clock time through `until`.
    fn run(state: &SharedState, clock: &FixedClock, labels: &[&str], until: NaiveDateTime) {
        while clock.now() <= until {
            state.ingest_frame(&frame(labels)).expect("frame");
            clock.advance(Duration::seconds(1));
        }
    }

    #[test]
    fn frames_persist_events_and_report_rebuilds_from_log() {
        let (_dir, clock, state) = setup("ALL");
        run(&state, &clock, &["S1"], at(9, 45));
        clock.set(at(9, 46));
        assert_eq!(state.sweep().expect("sweep"), 2);

        let events = state
            .list_events(&EventFilter::on(at(0, 0).date()))
            .expect("events");
        let kinds: Vec<_> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["entry", "early_leave", "exit"]);

        let report = state
            .report(&ReportParams {
                date: Some(at(0, 0).date()),
                batch: None,
                rebuild: false,
            })
            .expect("report");
        assert_eq!(report.source, ReportSource::Events);
        assert_eq!(report.present.len(), 1);
        assert_eq!(report.present[0].cumulative_seconds, 2700.0);
        assert_eq!(report.absent[0].student_id, "S2");
    }

    #[test]
    fn saved_summary_is_preferred_unless_rebuild_requested() {
        let (_dir, clock, state) = setup("ALL");
        run(&state, &clock, &["S1"], at(9, 10));

        let preview = state.verdicts(true).expect("verdicts");
        assert_eq!(preview[0].status, AttendanceStatus::Absent);

        let params = ReportParams {
            date: Some(at(0, 0).date()),
            batch: None,
            rebuild: false,
        };
        let stored = state.report(&params).expect("report");
        assert_eq!(stored.source, ReportSource::Summary);

        let rebuilt = state
            .report(&ReportParams {
                rebuild: true,
                ..params
            })
            .expect("report");
        assert_eq!(rebuilt.source, ReportSource::Events);
        assert_eq!(rebuilt.present[0].student_id, "S1");
    }

    #[test]
    fn verdicts_exclude_students_outside_active_batch() {
        let (_dir, clock, state) = setup("B1");
        run(&state, &clock, &["S1", "S2"], at(9, 0));
        let verdicts = state.verdicts(false).expect("verdicts");
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].student_id, "S1");

        let events = state.list_events(&EventFilter::default()).expect("events");
        assert!(events
            .iter()
            .any(|e| matches!(e.kind, EventKind::BlockedBatch { .. })));
    }

    #[test]
    fn manual_session_end_saves_summary() {
        let (_dir, clock, state) = setup("ALL");
        assert!(state.end_session().expect("end").is_none());

        clock.set(at(13, 0));
        state.start_session().expect("start");
        run(&state, &clock, &["S1"], at(13, 40));

        let close = state.end_session().expect("end").expect("close");
        assert_eq!(close.verdicts[0].status, AttendanceStatus::Present);

        let report = state
            .report(&ReportParams {
                date: Some(at(0, 0).date()),
                batch: Some("b1".to_string()),
                rebuild: false,
            })
            .expect("report");
        assert_eq!(report.source, ReportSource::Summary);
        assert_eq!(report.batch, "B1");
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn correction_is_logged_without_touching_live_state() {
        let (_dir, _clock, state) = setup("ALL");
        let event = state
            .record_correction(&CorrectionParams {
                student_id: "S2".to_string(),
                kind: CorrectionKind::Entry,
                reason: "camera offline".to_string(),
                recorded_at: Some("2026-03-02 09:00:00".to_string()),
            })
            .expect("correction");
        assert_eq!(event.name, "Bea");
        assert_eq!(event.note.as_deref(), Some("manual correction: camera offline"));
        assert_eq!(state.health_snapshot().expect("health").present, 0);

        let report = state
            .report(&ReportParams {
                date: Some(at(0, 0).date()),
                batch: None,
                rebuild: true,
            })
            .expect("report");
        let bea = report
            .present
            .iter()
            .find(|v| v.student_id == "S2")
            .expect("S2 present after correction");
        assert_eq!(bea.cumulative_seconds, 3600.0);

        let err = state
            .record_correction(&CorrectionParams {
                student_id: "S9".to_string(),
                kind: CorrectionKind::Exit,
                reason: String::new(),
                recorded_at: None,
            })
            .expect_err("unknown student");
        assert_eq!(err.code, "student_not_found");
    }

    #[test]
    fn roster_admin_round_trip() {
        let (_dir, _clock, state) = setup("ALL");
        let err = state
            .register_student(Student::new("S1", "Again", "B3"))
            .expect_err("duplicate");
        assert_eq!(err.code, "student_exists");

        assert_eq!(state.list_batches().expect("batches"), vec!["B1", "B2"]);
        state.remove_student("S2").expect("remove");
        assert_eq!(state.list_students().expect("students").len(), 1);
        assert_eq!(
            state.remove_student("S2").expect_err("gone").code,
            "student_not_found"
        );
    }

    #[test]
    fn store_failure_is_reported_to_caller() {
        let (dir, _clock, state) = setup("ALL");
        let db_dir = dir.path().to_path_buf();
        fs_err::remove_dir_all(&db_dir).expect("remove db dir");
        fs_err::write(&db_dir, b"not a directory").expect("replace with file");

        let err = state.ingest_frame(&frame(&["S1"])).expect_err("append fails");
        assert_eq!(err.code, "storage_error");
        assert_eq!(
            state.start_session().expect_err("append fails").code,
            "storage_error"
        );
    }

    #[test]
    fn session_end_summary_only_holds_active_batch() {
        let (_dir, clock, state) = setup("B1");
        state.start_session().expect("start");
        run(&state, &clock, &["S1"], at(9, 41));

        let close = state.end_session().expect("end").expect("close");
        assert_eq!(close.verdicts.len(), 1);
        assert_eq!(close.verdicts[0].student_id, "S1");

        let summary = state
            .db
            .load_summary(at(0, 0).date())
            .expect("load")
            .expect("summary saved");
        assert_eq!(summary.batch, "B1");
        let ids: Vec<_> = summary.verdicts.iter().map(|v| v.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S1"]);
    }

    #[test]
    fn finish_counts_open_intervals_and_saves_summary() {
        let (_dir, clock, state) = setup("ALL");
        run(&state, &clock, &["S1"], at(9, 40));
        let health = state.health_snapshot().expect("health");
        assert_eq!(health.present_students, vec!["S1"]);
        assert_eq!(health.tracked, 2);

        let close = state.finish().expect("finish");
        assert!(close.event.is_none());
        let s1 = close
            .verdicts
            .iter()
            .find(|v| v.student_id == "S1")
            .expect("S1 verdict");
        assert_eq!(s1.status, AttendanceStatus::Present);

        let report = state
            .report(&ReportParams {
                date: Some(at(0, 0).date()),
                batch: None,
                rebuild: false,
            })
            .expect("report");
        assert_eq!(report.source, ReportSource::Summary);
        assert_eq!(report.present.len(), 1);
        assert_eq!(report.absent.len(), 1);
    }

    #[test]
    fn finish_closes_open_manual_session_in_log() {
        let (_dir, clock, state) = setup("ALL");
        clock.set(at(13, 0));
        state.start_session().expect("start");
        clock.set(at(13, 30));

        let close = state.finish().expect("finish");
        let event = close.event.expect("session end");
        assert!(matches!(event.kind, EventKind::SessionEnd));

        let kinds: Vec<_> = state
            .list_events(&EventFilter::default())
            .expect("events")
            .iter()
            .map(|e| e.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["session_start", "session_end"]);
    }
}
