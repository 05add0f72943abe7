//! Per-day attendance report assembled from verdicts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::classify::AttendanceVerdict;
use crate::error::{AttendanceError, Result};
use crate::roster::BatchFilter;

/// Where a report's verdicts came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    /// A summary persisted when the day was evaluated.
    Summary,
    /// Rebuilt from the event log.
    Events,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub date: NaiveDate,
    pub batch: String,
    pub source: ReportSource,
    pub present: Vec<AttendanceVerdict>,
    pub absent: Vec<AttendanceVerdict>,
}

impl AttendanceReport {
    /// Splits verdicts by status, each side sorted by name then id.
    pub fn from_verdicts(
        date: NaiveDate,
        batch: &BatchFilter,
        source: ReportSource,
        verdicts: Vec<AttendanceVerdict>,
    ) -> Self {
        let (mut present, mut absent): (Vec<_>, Vec<_>) =
            verdicts.into_iter().partition(AttendanceVerdict::is_present);
        for side in [&mut present, &mut absent] {
            side.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then_with(|| a.student_id.cmp(&b.student_id))
            });
        }

        Self {
            date,
            batch: batch.to_string(),
            source,
            present,
            absent,
        }
    }

    pub fn total(&self) -> usize {
        self.present.len() + self.absent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Writes the report as pretty JSON, creating parent directories.
pub fn export_report(report: &AttendanceReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(|err| AttendanceError::Json {
        context: format!("Failed to serialize report for {}", report.date),
        source: err,
    })?;
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent).map_err(|err| AttendanceError::Io {
            context: format!("Failed to create {}", parent.display()),
            source: err,
        })?;
    }
    fs_err::write(path, json).map_err(|err| AttendanceError::Io {
        context: format!("Failed to write report {}", path.display()),
        source: err,
    })
}

/// `"{h}h {m}m {s}s"` for whole seconds; negatives clamp to zero.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{}h {}m {}s",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
