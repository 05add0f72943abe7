//! Plain-text rendering for command output.

use attendance_core::{format_duration, AttendanceReport, AttendanceVerdict, ReportSource};
use classeye_daemon_protocol::{EventRecord, Student};
use std::fmt::Write;

pub fn render_report(report: &AttendanceReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Attendance {} (batch {}, from {})",
        report.date,
        report.batch,
        match report.source {
            ReportSource::Summary => "saved summary",
            ReportSource::Events => "event log",
        }
    );
    if report.is_empty() {
        out.push_str("No students on the roster for this batch.\n");
        return out;
    }
    render_section(&mut out, "Present", &report.present);
    render_section(&mut out, "Absent", &report.absent);
    out
}

fn render_section(out: &mut String, title: &str, verdicts: &[AttendanceVerdict]) {
    let _ = writeln!(out, "\n{} ({})", title, verdicts.len());
    for verdict in verdicts {
        let _ = writeln!(out, "  {}", verdict_line(verdict));
    }
}

pub fn render_verdicts(verdicts: &[AttendanceVerdict]) -> String {
    if verdicts.is_empty() {
        return "No students tracked.\n".to_string();
    }
    let mut out = String::new();
    for verdict in verdicts {
        let _ = writeln!(
            out,
            "{}  {}",
            verdict_line(verdict),
            verdict.status.as_str()
        );
    }
    out
}

fn verdict_line(verdict: &AttendanceVerdict) -> String {
    format!(
        "{:<12} {:<24} {}",
        verdict.student_id,
        verdict.name,
        format_duration(verdict.whole_seconds())
    )
}

pub fn render_events(events: &[EventRecord]) -> String {
    if events.is_empty() {
        return "No events.\n".to_string();
    }
    let mut out = String::new();
    for event in events {
        let details = event.details();
        let _ = write!(
            out,
            "{}  {:<12} {:<16}",
            event.recorded_at,
            event.student_id,
            event.kind.as_str()
        );
        if !details.is_empty() {
            let _ = write!(out, " {}", details);
        }
        out.push('\n');
    }
    out
}

pub fn render_students(students: &[Student]) -> String {
    if students.is_empty() {
        return "No students registered.\n".to_string();
    }
    let mut out = String::new();
    for student in students {
        let _ = writeln!(
            out,
            "{:<12} {:<24} {}",
            student.student_id,
            student.name,
            student.batches.join(",")
        );
    }
    out
}
