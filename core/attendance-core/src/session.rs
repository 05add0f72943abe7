//! Resolves which session window is authoritative at a given instant.
//!
//! Priority: an open manual session, then the last completed manual session
//! (sticky until the next manual start), then the default daily window.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use classeye_daemon_protocol::{EventKind, EventRecord};
use serde::Serialize;

use crate::window::SessionWindow;

/// The fixed daily class window from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSchedule {
    start: NaiveTime,
    end: NaiveTime,
}

impl SessionSchedule {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Default window for `date`; an end at or before the start wraps to the
    /// next calendar day.
    pub fn window_for(&self, date: NaiveDate) -> SessionWindow {
        let start = date.and_time(self.start);
        let mut end = date.and_time(self.end);
        if end <= start {
            end += Duration::days(1);
        }
        SessionWindow::new(start, end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManualSession {
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
}

impl ManualSession {
    pub fn is_open(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SessionWindowResolver {
    schedule: SessionSchedule,
    manual: ManualSession,
}

impl SessionWindowResolver {
    pub fn new(schedule: SessionSchedule) -> Self {
        Self {
            schedule,
            manual: ManualSession::default(),
        }
    }

    pub fn schedule(&self) -> SessionSchedule {
        self.schedule
    }

    pub fn manual(&self) -> ManualSession {
        self.manual
    }

    pub fn resolve(&self, now: NaiveDateTime) -> SessionWindow {
        match (self.manual.started_at, self.manual.ended_at) {
            (Some(start), None) => SessionWindow::new(start, now),
            (Some(start), Some(end)) => SessionWindow::new(start, end),
            _ => self.schedule.window_for(now.date()),
        }
    }

    pub(crate) fn start(&mut self, now: NaiveDateTime) {
        self.manual = ManualSession {
            started_at: Some(now),
            ended_at: None,
        };
    }

    /// Records the manual end. Returns false when no manual session was ever
    /// started, in which case nothing changes.
    pub(crate) fn end(&mut self, now: NaiveDateTime) -> bool {
        if self.manual.started_at.is_none() {
            return false;
        }
        self.manual.ended_at = Some(now);
        true
    }

    /// Window of a past day as recorded in its log: the last manual session
    /// started that day and later ended, else the default window. A manual
    /// session that was never ended has no usable end and is ignored.
    pub fn for_logged_day(
        schedule: SessionSchedule,
        date: NaiveDate,
        events: &[EventRecord],
    ) -> SessionWindow {
        let mut controls: Vec<(NaiveDateTime, bool)> = events
            .iter()
            .filter_map(|event| {
                let is_start = match event.kind {
                    EventKind::SessionStart => true,
                    EventKind::SessionEnd => false,
                    _ => return None,
                };
                event.timestamp().map(|at| (at, is_start))
            })
            .collect();
        controls.sort_by_key(|(at, _)| *at);

        let mut pending_start = None;
        let mut completed = None;
        for (at, is_start) in controls {
            if is_start {
                pending_start = (at.date() == date).then_some(at);
            } else if let Some(start) = pending_start {
                completed = Some(SessionWindow::new(start, at));
            }
        }

        completed.unwrap_or_else(|| schedule.window_for(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).expect("date")
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        date().and_hms_opt(hour, minute, 0).expect("time")
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("time")
    }

    fn resolver() -> SessionWindowResolver {
        SessionWindowResolver::new(SessionSchedule::new(hm(9, 0), hm(10, 0)))
    }

    #[test]
    fn default_window_uses_date_of_now() {
        let window = resolver().resolve(at(9, 30));
        assert_eq!(window, SessionWindow::new(at(9, 0), at(10, 0)));
    }

    #[test]
    fn end_before_start_wraps_to_next_day() {
        let schedule = SessionSchedule::new(hm(22, 0), hm(1, 0));
        let window = schedule.window_for(date());
        assert_eq!(window.start, at(22, 0));
        assert_eq!(window.end, at(1, 0) + Duration::days(1));

        let same = SessionSchedule::new(hm(9, 0), hm(9, 0)).window_for(date());
        assert_eq!(same.end - same.start, Duration::days(1));
    }

    #[test]
    fn open_manual_session_ends_at_now() {
        let mut resolver = resolver();
        resolver.start(at(11, 0));
        assert_eq!(
            resolver.resolve(at(11, 20)),
            SessionWindow::new(at(11, 0), at(11, 20))
        );
        assert!(resolver.manual().is_open());
    }

    #[test]
    fn completed_manual_session_is_sticky_until_restart() {
        let mut resolver = resolver();
        resolver.start(at(11, 0));
        assert!(resolver.end(at(12, 0)));
        assert_eq!(
            resolver.resolve(at(15, 0)),
            SessionWindow::new(at(11, 0), at(12, 0))
        );

        resolver.start(at(16, 0));
        assert_eq!(
            resolver.resolve(at(16, 5)),
            SessionWindow::new(at(16, 0), at(16, 5))
        );
    }

    #[test]
    fn end_without_start_is_ignored() {
        let mut resolver = resolver();
        assert!(!resolver.end(at(9, 30)));
        assert_eq!(
            resolver.resolve(at(9, 30)),
            SessionWindow::new(at(9, 0), at(10, 0))
        );
    }

    #[test]
    fn logged_day_prefers_completed_manual_session() {
        let schedule = resolver().schedule();
        let events = vec![
            EventRecord::system(at(13, 0), EventKind::SessionStart),
            EventRecord::system(at(14, 0), EventKind::SessionEnd),
        ];
        assert_eq!(
            SessionWindowResolver::for_logged_day(schedule, date(), &events),
            SessionWindow::new(at(13, 0), at(14, 0))
        );
    }

    #[test]
    fn logged_day_ignores_unfinished_manual_session() {
        let schedule = resolver().schedule();
        let events = vec![EventRecord::system(at(13, 0), EventKind::SessionStart)];
        assert_eq!(
            SessionWindowResolver::for_logged_day(schedule, date(), &events),
            SessionWindow::new(at(9, 0), at(10, 0))
        );
    }
}
