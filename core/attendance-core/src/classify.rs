//! Threshold classification shared by the live and offline paths.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    /// Present iff `seconds >= threshold`.
    pub fn from_seconds(seconds: f64, threshold: f64) -> Self {
        if seconds >= threshold {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Absent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Present" => Some(AttendanceStatus::Present),
            "Absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceVerdict {
    pub date: NaiveDate,
    pub student_id: String,
    pub name: String,
    pub cumulative_seconds: f64,
    pub status: AttendanceStatus,
}

impl AttendanceVerdict {
    pub fn new(
        date: NaiveDate,
        student_id: impl Into<String>,
        name: impl Into<String>,
        cumulative_seconds: f64,
        threshold: f64,
    ) -> Self {
        Self {
            date,
            student_id: student_id.into(),
            name: name.into(),
            cumulative_seconds,
            status: AttendanceStatus::from_seconds(cumulative_seconds, threshold),
        }
    }

    pub fn whole_seconds(&self) -> i64 {
        self.cumulative_seconds.floor() as i64
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }
}
