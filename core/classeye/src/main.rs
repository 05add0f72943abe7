//! classeye: command-line client for the ClassEye attendance daemon.
//!
//! Every subcommand is a single request to `classeye-daemon` over its Unix
//! socket. Results print as text, or as the raw JSON payload with `--json`.
//!
//! ## Subcommands
//!
//! - `session start|end`: Manual session control
//! - `preview`: Live verdicts for everyone tracked today
//! - `report`: Per-day report from the saved summary or the event log
//! - `events`: Filtered event log listing
//! - `correct`: Append a manual correction event
//! - `student`, `batches`: Roster management
//! - `frame`: Feed one frame of recognizer output (for cameras and testing)
//! - `shutdown`: Final evaluation and summary save, then stop the daemon

mod daemon_client;
mod display;
mod error;
mod logging;

use attendance_core::{export_report, load_config, AttendanceReport, AttendanceVerdict};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use classeye_daemon_protocol::{
    CorrectionKind, EventRecord, FaceObservation, FrameParams, Method, Student,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;

use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "classeye")]
#[command(about = "Classroom presence and attendance accounting")]
#[command(version)]
struct Cli {
    /// Print the daemon's JSON payload instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon health and live attendance counters
    Health,

    /// Start or end a manual session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Live verdicts computed from current presence state
    Preview {
        /// Persist the verdicts as today's summary
        #[arg(long)]
        save: bool,
    },

    /// Attendance report for one day
    Report {
        /// Day to report (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Restrict the report to one batch
        #[arg(long)]
        batch: Option<String>,

        /// Ignore any saved summary and rebuild from the event log
        #[arg(long)]
        rebuild: bool,

        /// Write the report as JSON to this path
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// List logged events
    Events {
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Only events for this student
        #[arg(long = "student")]
        student_id: Option<String>,
    },

    /// Record a manual correction in the event log
    Correct {
        #[arg(value_name = "STUDENT_ID")]
        student_id: String,

        #[arg(value_enum)]
        kind: CorrectionArg,

        /// Why the correction was made
        #[arg(long, default_value = "")]
        reason: String,

        /// Timestamp for the correction (YYYY-MM-DDTHH:MM:SS), defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Manage registered students
    Student {
        #[command(subcommand)]
        action: StudentAction,
    },

    /// List batches across the roster
    Batches,

    /// Submit one frame of recognizer output
    ///
    /// Without --observation, reads `{"observations": [...]}` from stdin.
    Frame {
        /// Recognized face as LABEL=CONFIDENCE (repeatable)
        #[arg(long = "observation", short = 'o', value_name = "LABEL=CONF")]
        observations: Vec<String>,
    },

    /// Print the effective attendance configuration
    Config,

    /// Run the final evaluation, save today's summary and stop the daemon
    Shutdown,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Begin a manual session now
    Start,
    /// End the manual session and save the day's summary
    End,
}

#[derive(Subcommand)]
enum StudentAction {
    /// Register a student
    Add {
        #[arg(value_name = "STUDENT_ID")]
        student_id: String,

        #[arg(value_name = "NAME")]
        name: String,

        /// Comma-separated batch list, e.g. "B1,B2"
        #[arg(long, default_value = "")]
        batches: String,
    },
    /// Remove a student from the roster
    Remove {
        #[arg(value_name = "STUDENT_ID")]
        student_id: String,
    },
    /// List registered students
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum CorrectionArg {
    Entry,
    Exit,
    Note,
}

impl From<CorrectionArg> for CorrectionKind {
    fn from(arg: CorrectionArg) -> Self {
        match arg {
            CorrectionArg::Entry => CorrectionKind::Entry,
            CorrectionArg::Exit => CorrectionKind::Exit,
            CorrectionArg::Note => CorrectionKind::CorrectionNote,
        }
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => print!("{}", output),
        Err(err) => {
            tracing::error!(error = %err, "classeye command failed");
            eprintln!("classeye: {}", err);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let json_output = cli.json;
    match cli.command {
        Commands::Health => {
            let data = daemon_client::call(Method::GetHealth, None)?;
            Ok(render_json(&data))
        }
        Commands::Session { action } => {
            let method = match action {
                SessionAction::Start => Method::StartSession,
                SessionAction::End => Method::EndSession,
            };
            let data = daemon_client::call(method, None)?;
            if json_output {
                return Ok(render_json(&data));
            }
            render_session(&data)
        }
        Commands::Preview { save } => {
            let data = daemon_client::call(Method::GetVerdicts, Some(json!({ "save": save })))?;
            if json_output {
                return Ok(render_json(&data));
            }
            let verdicts: Vec<AttendanceVerdict> = decode(data)?;
            Ok(display::render_verdicts(&verdicts))
        }
        Commands::Report {
            date,
            batch,
            rebuild,
            output,
        } => {
            let params = json!({ "date": date, "batch": batch, "rebuild": rebuild });
            let data = daemon_client::call(Method::GetReport, Some(params))?;
            let report: AttendanceReport = decode(data.clone())?;
            if let Some(path) = output {
                export_report(&report, &path)?;
                tracing::info!(path = %path.display(), date = %report.date, "Report exported");
            }
            if json_output {
                return Ok(render_json(&data));
            }
            Ok(display::render_report(&report))
        }
        Commands::Events {
            from,
            to,
            student_id,
        } => {
            let params = json!({ "from": from, "to": to, "student_id": student_id });
            let data = daemon_client::call(Method::ListEvents, Some(params))?;
            if json_output {
                return Ok(render_json(&data));
            }
            let events: Vec<EventRecord> = decode(data)?;
            Ok(display::render_events(&events))
        }
        Commands::Correct {
            student_id,
            kind,
            reason,
            at,
        } => {
            let params = json!({
                "student_id": student_id,
                "kind": CorrectionKind::from(kind),
                "reason": reason,
                "recorded_at": at,
            });
            let data = daemon_client::call(Method::RecordCorrection, Some(params))?;
            if json_output {
                return Ok(render_json(&data));
            }
            let event: EventRecord = decode(data)?;
            Ok(display::render_events(std::slice::from_ref(&event)))
        }
        Commands::Student { action } => run_student(action, json_output),
        Commands::Batches => {
            let data = daemon_client::call(Method::ListBatches, None)?;
            if json_output {
                return Ok(render_json(&data));
            }
            let batches: Vec<String> = decode(data)?;
            Ok(batches.iter().map(|batch| format!("{}\n", batch)).collect())
        }
        Commands::Frame { observations } => {
            let params = if observations.is_empty() {
                read_frame_from_stdin()?
            } else {
                FrameParams {
                    observations: observations
                        .iter()
                        .map(|raw| parse_observation(raw))
                        .collect::<Result<Vec<_>>>()?,
                }
            };
            let params = serde_json::to_value(&params)
                .map_err(|err| CliError::InvalidInput(format!("frame: {}", err)))?;
            let data = daemon_client::call(Method::Frame, Some(params))?;
            if json_output {
                return Ok(render_json(&data));
            }
            let events = data
                .get("events")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let events: Vec<EventRecord> = decode(events)?;
            Ok(display::render_events(&events))
        }
        Commands::Shutdown => {
            let data = daemon_client::call(Method::Shutdown, None)?;
            if json_output {
                return Ok(render_json(&data));
            }
            let verdicts: Vec<AttendanceVerdict> =
                decode(data.get("verdicts").cloned().unwrap_or_else(|| Value::Array(Vec::new())))?;
            Ok(format!(
                "Daemon stopped; final verdicts saved.\n{}",
                display::render_verdicts(&verdicts)
            ))
        }
        Commands::Config => {
            let config = load_config(None)?;
            if json_output {
                return serde_json::to_value(&config)
                    .map(|value| render_json(&value))
                    .map_err(|err| CliError::InvalidInput(format!("config: {}", err)));
            }
            toml::to_string_pretty(&config)
                .map_err(|err| CliError::InvalidInput(format!("config: {}", err)))
        }
    }
}

fn run_student(action: StudentAction, json_output: bool) -> Result<String> {
    let (method, params) = match action {
        StudentAction::Add {
            student_id,
            name,
            batches,
        } => {
            let student = Student::new(student_id, name, &batches);
            let params = serde_json::to_value(&student)
                .map_err(|err| CliError::InvalidInput(format!("student: {}", err)))?;
            (Method::RegisterStudent, Some(params))
        }
        StudentAction::Remove { student_id } => (
            Method::RemoveStudent,
            Some(json!({ "student_id": student_id })),
        ),
        StudentAction::List => (Method::ListStudents, None),
    };

    let data = daemon_client::call(method, params)?;
    if json_output {
        return Ok(render_json(&data));
    }
    let students: Vec<Student> = match data {
        Value::Array(_) => decode(data)?,
        other => vec![decode(other)?],
    };
    Ok(display::render_students(&students))
}

fn render_session(data: &Value) -> Result<String> {
    if data.get("ended").and_then(Value::as_bool) == Some(false) {
        return Ok("No manual session was started.\n".to_string());
    }
    if let Some(verdicts) = data.get("verdicts") {
        let verdicts: Vec<AttendanceVerdict> = decode(verdicts.clone())?;
        return Ok(format!(
            "Session ended.\n{}",
            display::render_verdicts(&verdicts)
        ));
    }
    let event: EventRecord = decode(data.clone())?;
    Ok(format!("Session started at {}\n", event.recorded_at))
}

fn render_json(data: &Value) -> String {
    match serde_json::to_string_pretty(data) {
        Ok(text) => format!("{}\n", text),
        Err(_) => format!("{}\n", data),
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|err| CliError::BadResponse(err.to_string()))
}

fn read_frame_from_stdin() -> Result<FrameParams> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    serde_json::from_str(&input)
        .map_err(|err| CliError::InvalidInput(format!("frame JSON on stdin: {}", err)))
}

/// Parses `LABEL=CONFIDENCE`.
fn parse_observation(raw: &str) -> Result<FaceObservation> {
    let (label, confidence) = raw
        .rsplit_once('=')
        .ok_or_else(|| CliError::InvalidInput(format!("expected LABEL=CONF, got {:?}", raw)))?;
    let confidence: f64 = confidence
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidInput(format!("invalid confidence in {:?}", raw)))?;
    if label.trim().is_empty() {
        return Err(CliError::InvalidInput(format!("missing label in {:?}", raw)));
    }
    Ok(FaceObservation {
        label: label.trim().to_string(),
        confidence,
    })
}
