//! Per-student live presence records.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PresenceState {
    Absent,
    Present { entered_at: NaiveDateTime },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceRecord {
    pub state: PresenceState,
    pub last_seen_at: Option<NaiveDateTime>,
    /// Debounce watermark; only moves forward on accepted entries.
    pub last_entry_logged_at: Option<NaiveDateTime>,
    pub cumulative_seconds: f64,
    pub last_exit_at: Option<NaiveDateTime>,
}

impl Default for PresenceRecord {
    fn default() -> Self {
        Self {
            state: PresenceState::Absent,
            last_seen_at: None,
            last_entry_logged_at: None,
            cumulative_seconds: 0.0,
            last_exit_at: None,
        }
    }
}

impl PresenceRecord {
    pub fn is_present(&self) -> bool {
        matches!(self.state, PresenceState::Present { .. })
    }

    pub fn entered_at(&self) -> Option<NaiveDateTime> {
        match self.state {
            PresenceState::Present { entered_at } => Some(entered_at),
            PresenceState::Absent => None,
        }
    }

    pub(crate) fn enter(&mut self, now: NaiveDateTime) {
        self.state = PresenceState::Present { entered_at: now };
        self.last_entry_logged_at = Some(now);
        self.last_seen_at = Some(now);
    }

    pub(crate) fn leave(&mut self, exit: NaiveDateTime, credited_seconds: f64) {
        self.cumulative_seconds += credited_seconds.max(0.0);
        self.state = PresenceState::Absent;
        self.last_exit_at = Some(exit);
        self.last_seen_at = None;
    }
}

/// Owned map of presence records, keyed by student id.
#[derive(Debug, Clone, Default)]
pub struct PresenceStore {
    records: BTreeMap<String, PresenceRecord>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, student_id: &str) -> Option<&PresenceRecord> {
        self.records.get(student_id)
    }

    /// Returns the record, creating a zeroed one on first use.
    pub fn entry(&mut self, student_id: &str) -> &mut PresenceRecord {
        self.records.entry(student_id.to_string()).or_default()
    }

    pub fn remove(&mut self, student_id: &str) -> Option<PresenceRecord> {
        self.records.remove(student_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PresenceRecord)> {
        self.records.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut PresenceRecord)> {
        self.records.iter_mut()
    }

    pub fn present_count(&self) -> usize {
        self.records.values().filter(|r| r.is_present()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
