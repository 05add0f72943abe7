//! Interval arithmetic shared by the live engine, the classifier and the
//! reconstructor. Every "how much of this interval counted" question goes
//! through [`overlap_seconds`].

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Seconds shared by `[a_start, a_end)` and `[b_start, b_end)`.
///
/// Disjoint, inverted and zero-length intervals all yield `0.0`.
pub fn overlap_seconds(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> f64 {
    let latest_start = a_start.max(b_start);
    let earliest_end = a_end.min(b_end);
    if earliest_end <= latest_start {
        return 0.0;
    }
    duration_seconds(earliest_end - latest_start)
}

pub fn duration_seconds(duration: Duration) -> f64 {
    match duration.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => duration.num_milliseconds() as f64 / 1_000.0,
    }
}

pub fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

/// The interval against which presence is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn overlap(&self, enter: NaiveDateTime, exit: NaiveDateTime) -> f64 {
        overlap_seconds(enter, exit, self.start, self.end)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.overlap(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .expect("valid time")
    }

    #[test]
    fn overlap_is_symmetric() {
        let pairs = [
            ((at(9, 0), at(10, 0)), (at(9, 30), at(11, 0))),
            ((at(8, 0), at(8, 30)), (at(9, 0), at(10, 0))),
            ((at(9, 5), at(9, 50)), (at(9, 0), at(10, 0))),
        ];
        for ((a0, a1), (b0, b1)) in pairs {
            assert_eq!(overlap_seconds(a0, a1, b0, b1), overlap_seconds(b0, b1, a0, a1));
        }
    }

    #[test]
    fn disjoint_intervals_do_not_overlap() {
        assert_eq!(overlap_seconds(at(8, 0), at(8, 59), at(9, 0), at(10, 0)), 0.0);
        assert_eq!(overlap_seconds(at(10, 0), at(11, 0), at(9, 0), at(10, 0)), 0.0);
    }

    #[test]
    fn containment_yields_inner_duration() {
        assert_eq!(
            overlap_seconds(at(8, 0), at(11, 0), at(9, 5), at(9, 50)),
            2700.0
        );
    }

    #[test]
    fn partial_overlap_is_clipped_to_window() {
        let window = SessionWindow::new(at(9, 0), at(10, 0));
        assert_eq!(window.overlap(at(8, 50), at(9, 10)), 600.0);
    }

    #[test]
    fn inverted_window_is_zero_not_negative() {
        let window = SessionWindow::new(at(10, 0), at(9, 0));
        assert_eq!(window.overlap(at(8, 0), at(11, 0)), 0.0);
        assert_eq!(window.duration_seconds(), 0.0);
        assert_eq!(overlap_seconds(at(9, 0), at(9, 0), at(8, 0), at(10, 0)), 0.0);
    }

    #[test]
    fn sub_second_precision_is_kept() {
        let start = at(9, 0);
        let end = start + Duration::milliseconds(1500);
        assert_eq!(overlap_seconds(start, end, at(8, 0), at(10, 0)), 1.5);
        assert_eq!(seconds_to_duration(1.5), Duration::milliseconds(1500));
    }
}
