//! ClassEye daemon entrypoint.
//!
//! A small single-writer service that owns live attendance state: a socket
//! listener with strict request validation, the presence engine, a periodic
//! exit-timeout sweeper, and a SQLite-backed event log.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use attendance_core::{load_config, AttendanceConfig, EventFilter};
use classeye_daemon_protocol::{
    parse_params, CorrectionParams, ErrorInfo, EventQueryParams, FrameParams, Method,
    RemoveStudentParams, ReportParams, Request, Response, Student, VerdictParams,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;

mod db;
mod recognizer;
mod state;

use db::Db;
use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const SWEEP_INTERVAL_MS: u64 = 1000;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "ClassEye daemon started");

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load attendance config; using defaults");
            AttendanceConfig::default()
        }
    };
    info!(
        recognition_threshold = config.recognition_threshold,
        debounce_seconds = config.debounce_seconds,
        exit_timeout_seconds = config.exit_timeout_seconds,
        min_in_class_seconds = config.min_in_class_seconds,
        active_batch = %config.active_batch,
        "Attendance config loaded"
    );

    let shared_state = Arc::new(SharedState::new(db, config));
    spawn_exit_sweeper(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                let socket_path = socket_path.clone();
                thread::spawn(move || handle_connection(stream, state, &socket_path));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

/// Presence must time out even when no frames arrive.
fn spawn_exit_sweeper(state: Arc<SharedState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(SWEEP_INTERVAL_MS));
        if let Err(err) = state.sweep() {
            warn!(error = %err, "Periodic exit sweep failed");
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("CLASSEYE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".classeye").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".classeye").join("daemon").join("attendance.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>, socket_path: &Path) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let shutdown = matches!(request.method, Method::Shutdown);
    let response = handle_request(request, &state);
    let finished = shutdown && response.ok;
    let _ = write_response(&mut stream, response);

    if finished {
        info!("Final evaluation saved; ClassEye daemon exiting");
        if let Err(err) = remove_existing_socket(socket_path) {
            warn!(error = %err, "Failed to remove daemon socket on shutdown");
        }
        std::process::exit(0);
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "sweep_interval_ms": SWEEP_INTERVAL_MS,
            });
            match state.health_snapshot() {
                Ok(snapshot) => {
                    if let Ok(value) = serde_json::to_value(snapshot) {
                        data["attendance"] = value;
                    }
                }
                Err(err) => warn!(error = %err, "Health snapshot unavailable"),
            }
            Response::ok(id, data)
        }
        Method::Frame => {
            let params: FrameParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let outcome = state.ingest_frame(&params.observations);
            if let Ok(outcome) = &outcome {
                if !outcome.events.is_empty() {
                    tracing::debug!(
                        sightings = outcome.sightings,
                        events = outcome.events.len(),
                        present = outcome.present,
                        "Frame applied"
                    );
                }
            }
            respond(id, outcome, "frame")
        }
        Method::StartSession => respond(id, state.start_session(), "session start"),
        Method::EndSession => match state.end_session() {
            Ok(Some(close)) => respond(id, Ok(close), "session close"),
            Ok(None) => Response::ok(
                id,
                serde_json::json!({ "ended": false, "reason": "no manual session started" }),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::GetVerdicts => {
            let params: VerdictParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, state.verdicts(params.save), "verdicts")
        }
        Method::GetReport => {
            let params: ReportParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, state.report(&params), "report")
        }
        Method::ListEvents => {
            let params: EventQueryParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            if let Err(err) = params.validate() {
                return Response::error_with_info(id, err);
            }
            let filter = EventFilter::from(params);
            respond(id, state.list_events(&filter), "events")
        }
        Method::RecordCorrection => {
            let params: CorrectionParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, state.record_correction(&params), "correction")
        }
        Method::RegisterStudent => {
            let student: Student = match parse_params(params) {
                Ok(student) => student,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, state.register_student(student), "student")
        }
        Method::RemoveStudent => {
            let params: RemoveStudentParams = match parse_params(params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, state.remove_student(&params.student_id), "student")
        }
        Method::ListStudents => respond(id, state.list_students(), "students"),
        Method::ListBatches => respond(id, state.list_batches(), "batches"),
        Method::Shutdown => respond(id, state.finish(), "final evaluation"),
    }
}

fn respond<T: Serialize>(id: Option<String>, result: Result<T, ErrorInfo>, what: &str) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize {}: {}", what, err),
            ),
        },
        Err(err) => Response::error_with_info(id, err),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
