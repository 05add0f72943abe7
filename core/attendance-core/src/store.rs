//! Append-only event log seam.
//!
//! The engine never writes here itself; callers persist the events a tick
//! returns. Implementations must return rows in timestamp order, keeping
//! insertion order for equal timestamps.

use chrono::NaiveDate;
use classeye_daemon_protocol::{EventQueryParams, EventRecord};
use std::sync::Mutex;

use crate::error::{AttendanceError, Result};

pub trait EventStore {
    fn append(&self, event: &EventRecord) -> Result<()>;

    fn read_all(&self, filter: &EventFilter) -> Result<Vec<EventRecord>>;

    fn append_all(&self, events: &[EventRecord]) -> Result<()> {
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }
}

/// Inclusive date range plus optional student.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub student_id: Option<String>,
}

impl EventFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
            student_id: None,
        }
    }

    /// Rows with unparseable timestamps only match a filter without dates.
    pub fn matches(&self, event: &EventRecord) -> bool {
        if let Some(student_id) = &self.student_id {
            if &event.student_id != student_id {
                return false;
            }
        }
        if self.from.is_none() && self.to.is_none() {
            return true;
        }
        let Some(date) = event.timestamp().map(|at| at.date()) else {
            return false;
        };
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

impl From<EventQueryParams> for EventFilter {
    fn from(params: EventQueryParams) -> Self {
        Self {
            from: params.from,
            to: params.to,
            student_id: params
                .student_id
                .filter(|id| !id.trim().is_empty()),
        }
    }
}

/// Sorts by parsed timestamp; unparseable rows sort first. Stable.
pub fn sort_events(events: &mut [EventRecord]) {
    events.sort_by_key(EventRecord::timestamp);
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &EventRecord) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| AttendanceError::Store("event log lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }

    fn read_all(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let events = self
            .events
            .lock()
            .map_err(|_| AttendanceError::Store("event log lock poisoned".to_string()))?;
        let mut rows: Vec<EventRecord> = events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        sort_events(&mut rows);
        Ok(rows)
    }
}
