//! Offline accounting rebuilt from the persisted event log.
//!
//! Only `entry` and `exit` rows pair into intervals; every other kind is an
//! annotation. An entry while already open and an exit while nothing is open
//! are both ignored. An interval still open at the end of the log is counted
//! through the window end.

use chrono::{NaiveDate, NaiveDateTime};
use classeye_daemon_protocol::{EventKind, EventRecord};
use std::collections::HashMap;
use tracing::warn;

use crate::classify::AttendanceVerdict;
use crate::roster::{BatchFilter, Roster};
use crate::session::{SessionSchedule, SessionWindowResolver};
use crate::window::SessionWindow;

/// Parses timestamps, skips rows that fail, and stable-sorts the rest so
/// equal timestamps keep their log order.
fn order_events(events: &[EventRecord]) -> Vec<(NaiveDateTime, &EventRecord)> {
    let mut ordered: Vec<(NaiveDateTime, &EventRecord)> = events
        .iter()
        .filter_map(|event| match event.timestamp() {
            Some(at) => Some((at, event)),
            None => {
                warn!(
                    event_id = %event.event_id,
                    recorded_at = %event.recorded_at,
                    "Skipping event with unparseable timestamp"
                );
                None
            }
        })
        .collect();
    ordered.sort_by_key(|(at, _)| *at);
    ordered
}

fn pair_intervals<'a>(
    ordered: impl IntoIterator<Item = (NaiveDateTime, &'a EventRecord)>,
    window: SessionWindow,
) -> f64 {
    let mut open: Option<NaiveDateTime> = None;
    let mut total = 0.0;

    for (at, event) in ordered {
        match event.kind {
            EventKind::Entry { .. } => {
                if open.is_none() {
                    open = Some(at);
                }
            }
            EventKind::Exit => {
                if let Some(enter) = open.take() {
                    total += window.overlap(enter, at);
                }
            }
            _ => {}
        }
    }

    if let Some(enter) = open {
        total += window.overlap(enter, window.end);
    }
    total
}

/// In-window seconds for one student's events.
pub fn accumulate_seconds(events: &[EventRecord], window: SessionWindow) -> f64 {
    pair_intervals(order_events(events), window)
}

/// Verdicts for every roster student admitted by `filter`, ordered by id.
/// Events of unknown or filtered-out students are ignored.
pub fn reconstruct_day<R: Roster>(
    events: &[EventRecord],
    window: SessionWindow,
    roster: &R,
    filter: &BatchFilter,
    threshold: f64,
) -> Vec<AttendanceVerdict> {
    let mut by_student: HashMap<&str, Vec<(NaiveDateTime, &EventRecord)>> = HashMap::new();
    for (at, event) in order_events(events) {
        by_student
            .entry(event.student_id.as_str())
            .or_default()
            .push((at, event));
    }

    roster
        .student_ids()
        .into_iter()
        .filter(|student_id| {
            roster
                .batches_of(student_id)
                .is_some_and(|batches| filter.admits(&batches))
        })
        .map(|student_id| {
            let seconds = by_student
                .remove(student_id.as_str())
                .map(|rows| pair_intervals(rows, window))
                .unwrap_or(0.0);
            let name = roster.name_of(&student_id).unwrap_or_default();
            AttendanceVerdict::new(window.start.date(), student_id, name, seconds, threshold)
        })
        .collect()
}

/// Rebuilds a logged day: keeps the events recorded on `date`, resolves the
/// window that governed it, then reconstructs.
pub fn reconstruct_logged_day<R: Roster>(
    schedule: SessionSchedule,
    date: NaiveDate,
    events: &[EventRecord],
    roster: &R,
    filter: &BatchFilter,
    threshold: f64,
) -> Vec<AttendanceVerdict> {
    let day: Vec<EventRecord> = events
        .iter()
        .filter(|event| event.timestamp().is_some_and(|at| at.date() == date))
        .cloned()
        .collect();
    let window = SessionWindowResolver::for_logged_day(schedule, date, &day);
    reconstruct_day(&day, window, roster, filter, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::AttendanceStatus;
    use crate::roster::InMemoryRoster;
    use chrono::NaiveTime;
    use classeye_daemon_protocol::Student;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .expect("time")
    }

    fn window() -> SessionWindow {
        SessionWindow::new(at(9, 0), at(10, 0))
    }

    fn entry(student_id: &str, when: NaiveDateTime) -> EventRecord {
        EventRecord::new(when, student_id, student_id, EventKind::entry())
    }

    fn exit(student_id: &str, when: NaiveDateTime) -> EventRecord {
        EventRecord::new(when, student_id, student_id, EventKind::Exit)
    }

    #[test]
    fn pairs_entries_and_exits_clipped_to_window() {
        let events = vec![
            entry("S1", at(8, 50)),
            exit("S1", at(9, 10)),
            entry("S1", at(9, 30)),
            exit("S1", at(10, 30)),
        ];
        assert_eq!(accumulate_seconds(&events, window()), 600.0 + 1800.0);
    }

    #[test]
    fn ignores_duplicate_entries_and_orphan_exits() {
        let events = vec![
            exit("S1", at(9, 0)),
            entry("S1", at(9, 5)),
            entry("S1", at(9, 15)),
            exit("S1", at(9, 20)),
            exit("S1", at(9, 25)),
        ];
        assert_eq!(accumulate_seconds(&events, window()), 900.0);
    }

    #[test]
    fn open_interval_runs_to_window_end() {
        let events = vec![entry("S1", at(9, 20))];
        assert_eq!(accumulate_seconds(&events, window()), 2400.0);
    }

    #[test]
    fn out_of_order_rows_are_sorted_and_bad_timestamps_skipped() {
        let mut broken = entry("S1", at(9, 0));
        broken.recorded_at = "yesterday-ish".to_string();
        let events = vec![exit("S1", at(9, 45)), broken, entry("S1", at(9, 5))];
        assert_eq!(accumulate_seconds(&events, window()), 2400.0);
    }

    #[test]
    fn annotations_never_pair() {
        let events = vec![
            EventRecord::new(
                at(9, 5),
                "S1",
                "S1",
                EventKind::Late {
                    entered_at: NaiveTime::from_hms_opt(9, 5, 0).expect("time"),
                },
            ),
            EventRecord::new(at(9, 6), "S1", "S1", EventKind::CorrectionNote),
        ];
        assert_eq!(accumulate_seconds(&events, window()), 0.0);
    }

    #[test]
    fn reconstruct_day_filters_roster_by_batch() {
        let roster = InMemoryRoster::new(vec![
            Student::new("S1", "Asha", "B1"),
            Student::new("S2", "Bea", "B2"),
        ]);
        let events = vec![
            entry("S1", at(9, 0)),
            exit("S1", at(9, 45)),
            entry("S2", at(9, 0)),
            entry("S9", at(9, 0)),
        ];

        let all = reconstruct_day(&events, window(), &roster, &BatchFilter::All, 2400.0);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].cumulative_seconds, 2700.0);
        assert_eq!(all[0].status, AttendanceStatus::Present);
        assert_eq!(all[1].cumulative_seconds, 3600.0);

        let b1 = reconstruct_day(
            &events,
            window(),
            &roster,
            &BatchFilter::parse("b1"),
            2400.0,
        );
        assert_eq!(b1.len(), 1);
        assert_eq!(b1[0].student_id, "S1");
        assert_eq!(b1[0].name, "Asha");
    }

    #[test]
    fn logged_day_uses_recorded_manual_session() {
        let roster = InMemoryRoster::new(vec![Student::new("S1", "Asha", "B1")]);
        let schedule = SessionSchedule::new(
            NaiveTime::from_hms_opt(9, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
        );
        let events = vec![
            EventRecord::system(at(14, 0), EventKind::SessionStart),
            entry("S1", at(14, 0)),
            exit("S1", at(14, 30)),
            EventRecord::system(at(15, 0), EventKind::SessionEnd),
            entry("S1", at(9, 0)),
        ];

        let verdicts = reconstruct_logged_day(
            schedule,
            at(0, 0).date(),
            &events,
            &roster,
            &BatchFilter::All,
            2400.0,
        );
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].cumulative_seconds, 1800.0);
    }
}
