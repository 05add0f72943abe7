//! Live presence state machine.
//!
//! Driven by ticks: each tick carries one frame's sightings and a single
//! `now`, followed by one exit-timeout sweep. The engine is the only writer of
//! presence records; it returns the events it produced and leaves persisting
//! them to the caller.
//!
//! Transition rules:
//! - sightings at or above the recognition threshold are ignored
//! - unregistered students are ignored
//! - students outside the active batch produce `blocked_batch` and never enter
//! - an absent student enters unless the last entry is within the debounce
//! - a present student leaves once unseen for longer than the exit timeout;
//!   the interval closes at the last sighting, not at detection time

use chrono::NaiveDateTime;
use classeye_daemon_protocol::{EventKind, EventRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::AttendanceVerdict;
use crate::config::AttendanceConfig;
use crate::presence::{PresenceRecord, PresenceState, PresenceStore};
use crate::recognizer::Sighting;
use crate::roster::{BatchFilter, Roster};
use crate::session::{ManualSession, SessionWindowResolver};

/// Result of closing a session: the control event (if one was emitted) and
/// every registered student's verdict against the closing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionClose {
    pub event: Option<EventRecord>,
    pub verdicts: Vec<AttendanceVerdict>,
}

pub struct PresenceEngine<R: Roster> {
    config: AttendanceConfig,
    filter: BatchFilter,
    sessions: SessionWindowResolver,
    store: PresenceStore,
    roster: R,
}

impl<R: Roster> PresenceEngine<R> {
    pub fn new(config: AttendanceConfig, roster: R) -> Self {
        Self::with_store(config, roster, PresenceStore::new())
    }

    /// Every registered student gets a zeroed record up front.
    pub fn with_store(config: AttendanceConfig, roster: R, mut store: PresenceStore) -> Self {
        for student_id in roster.student_ids() {
            store.entry(&student_id);
        }
        Self {
            filter: config.batch_filter(),
            sessions: SessionWindowResolver::new(config.schedule()),
            config,
            store,
            roster,
        }
    }

    pub fn config(&self) -> &AttendanceConfig {
        &self.config
    }

    pub fn batch_filter(&self) -> &BatchFilter {
        &self.filter
    }

    pub fn roster(&self) -> &R {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut R {
        &mut self.roster
    }

    pub fn store(&self) -> &PresenceStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionWindowResolver {
        &self.sessions
    }

    pub fn manual_session(&self) -> ManualSession {
        self.sessions.manual()
    }

    pub fn record(&self, student_id: &str) -> Option<&PresenceRecord> {
        self.store.get(student_id)
    }

    pub fn present_count(&self) -> usize {
        self.store.present_count()
    }

    /// Starts tracking a newly registered student.
    pub fn register(&mut self, student_id: &str) {
        self.store.entry(student_id);
    }

    /// Drops a removed student's live record.
    pub fn forget(&mut self, student_id: &str) -> Option<PresenceRecord> {
        self.store.remove(student_id)
    }

    pub fn tick(&mut self, now: NaiveDateTime, sightings: &[Sighting]) -> Vec<EventRecord> {
        let mut events = Vec::new();
        for sighting in sightings {
            self.observe(now, sighting, &mut events);
        }
        self.sweep_exits(now, &mut events);
        events
    }

    fn observe(&mut self, now: NaiveDateTime, sighting: &Sighting, events: &mut Vec<EventRecord>) {
        let student_id = sighting.student_id.as_str();
        if sighting.confidence >= self.config.recognition_threshold {
            debug!(
                student_id = %student_id,
                confidence = sighting.confidence,
                "Sighting above recognition threshold; ignored"
            );
            return;
        }

        let (name, batches) = match (
            self.roster.name_of(student_id),
            self.roster.batches_of(student_id),
        ) {
            (Some(name), Some(batches)) => (name, batches),
            _ => {
                debug!(student_id = %student_id, "Sighting for unregistered student; ignored");
                return;
            }
        };

        let record = self.store.entry(student_id);
        record.last_seen_at = Some(now);

        if !self.filter.admits(&batches) {
            debug!(
                student_id = %student_id,
                active_batch = %self.filter,
                "Sighting blocked by batch filter"
            );
            events.push(EventRecord::new(
                now,
                student_id,
                name,
                EventKind::BlockedBatch {
                    batches: batches.into_iter().collect(),
                    active_batch: self.filter.to_string(),
                },
            ));
            return;
        }

        if record.is_present() {
            return;
        }

        if let Some(last_entry) = record.last_entry_logged_at {
            if now - last_entry <= self.config.debounce() {
                debug!(student_id = %student_id, "Entry within debounce window; ignored");
                return;
            }
        }

        let absent_seconds = record
            .last_exit_at
            .map(|exit| (now - exit).num_seconds());
        record.enter(now);

        if let Some(absent_seconds) = absent_seconds {
            events.push(EventRecord::new(
                now,
                student_id,
                name.clone(),
                EventKind::AbsentInterval { absent_seconds },
            ));
        }

        let window = self.sessions.resolve(now);
        let late_at = (now > window.start).then(|| now.time());
        if let Some(entered_at) = late_at {
            events.push(EventRecord::new(
                now,
                student_id,
                name.clone(),
                EventKind::Late { entered_at },
            ));
        }

        info!(
            student_id = %student_id,
            late = late_at.is_some(),
            absent_seconds = ?absent_seconds,
            "Student entered"
        );
        events.push(EventRecord::new(
            now,
            student_id,
            name,
            EventKind::Entry {
                absent_seconds,
                late_at,
            },
        ));
    }

    fn sweep_exits(&mut self, now: NaiveDateTime, events: &mut Vec<EventRecord>) {
        let timeout = self.config.exit_timeout();
        let window = self.sessions.resolve(now);

        for (student_id, record) in self.store.iter_mut() {
            let PresenceState::Present { entered_at } = record.state else {
                continue;
            };
            let exit = record.last_seen_at.unwrap_or(entered_at);
            if now - exit <= timeout {
                continue;
            }

            let credited = window.overlap(entered_at, exit);
            record.leave(exit, credited);

            let name = self.roster.name_of(student_id).unwrap_or_default();
            if exit < window.end && credited > 0.0 {
                events.push(EventRecord::new(
                    exit,
                    student_id.as_str(),
                    name.clone(),
                    EventKind::EarlyLeave {
                        left_at: exit.time(),
                    },
                ));
            }

            info!(
                student_id = %student_id,
                credited_seconds = credited,
                cumulative_seconds = record.cumulative_seconds,
                "Student exited"
            );
            events.push(EventRecord::new(exit, student_id.as_str(), name, EventKind::Exit));
        }
    }

    /// Read-only verdict as of `now`; an open interval is counted up to `now`
    /// without being closed.
    pub fn classify(&self, student_id: &str, now: NaiveDateTime) -> AttendanceVerdict {
        let window = self.sessions.resolve(now);
        let record = self.store.get(student_id);
        let mut total = record.map(|r| r.cumulative_seconds).unwrap_or(0.0);
        if let Some(entered_at) = record.and_then(PresenceRecord::entered_at) {
            total += window.overlap(entered_at, now);
        }

        AttendanceVerdict::new(
            window.start.date(),
            student_id,
            self.roster.name_of(student_id).unwrap_or_default(),
            total,
            self.config.min_in_class_seconds(),
        )
    }

    /// Verdicts for every registered student, ordered by id.
    pub fn evaluate(&self, now: NaiveDateTime) -> Vec<AttendanceVerdict> {
        self.roster
            .student_ids()
            .iter()
            .map(|student_id| self.classify(student_id, now))
            .collect()
    }

    pub fn start_session(&mut self, now: NaiveDateTime) -> EventRecord {
        self.sessions.start(now);
        info!(started_at = %now, "Manual session started");
        EventRecord::system(now, EventKind::SessionStart)
    }

    /// Closes the manual session and evaluates everyone against it. Returns
    /// `None` when no manual session was started.
    pub fn end_session(&mut self, now: NaiveDateTime) -> Option<SessionClose> {
        if !self.sessions.end(now) {
            warn!("End requested without a manual session start; ignored");
            return None;
        }
        info!(ended_at = %now, "Manual session ended");
        Some(SessionClose {
            event: Some(EventRecord::system(now, EventKind::SessionEnd)),
            verdicts: self.evaluate(now),
        })
    }

    /// Final evaluation before the engine is discarded. Ends an open manual
    /// session first; open presence intervals are counted up to `now`.
    pub fn finish(&mut self, now: NaiveDateTime) -> SessionClose {
        if self.sessions.manual().is_open() {
            if let Some(close) = self.end_session(now) {
                return close;
            }
        }
        SessionClose {
            event: None,
            verdicts: self.evaluate(now),
        }
    }
}
