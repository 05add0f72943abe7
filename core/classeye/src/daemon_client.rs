//! Client helper for talking to the classeye daemon.
//!
//! The daemon owns all attendance state. The CLI never opens the database
//! itself, so every command is one request/response round trip.

use classeye_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};

const SOCKET_ENV: &str = "CLASSEYE_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 5000;
const WRITE_TIMEOUT_MS: u64 = 1000;
const RETRY_DELAY_MS: u64 = 50;

/// Sends `method` and returns the `data` payload of a successful response.
pub fn call(method: Method, params: Option<Value>) -> Result<Value> {
    let socket = socket_path()?;
    call_at(&socket, method, params)
}

pub fn call_at(socket: &Path, method: Method, params: Option<Value>) -> Result<Value> {
    let label = format!("{:?}", method);
    let mut request = Request::new(method, params);
    request.id = Some(make_request_id());
    let payload = serde_json::to_vec(&request)
        .map_err(|err| CliError::InvalidInput(format!("Failed to serialize request: {}", err)))?;

    let response = send_with_retry(socket, &payload, &label)?;
    unwrap_response(response)
}

fn unwrap_response(response: Response) -> Result<Value> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    match response.error {
        Some(err) => Err(CliError::Rejected {
            code: err.code,
            message: err.message,
        }),
        None => Err(CliError::BadResponse(
            "error response without details".to_string(),
        )),
    }
}

pub fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::DaemonUnavailable("Home directory not found".to_string()))?;
    Ok(home.join(".classeye").join(SOCKET_NAME))
}

/// Connection failures get one retry; a daemon that answered is never re-asked.
fn send_with_retry(socket: &Path, payload: &[u8], label: &str) -> Result<Response> {
    match send_request(socket, payload) {
        Ok(response) => Ok(response),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} request to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(socket, payload).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} request to daemon",
                    label
                );
                CliError::DaemonUnavailable(retry_err)
            })
        }
    }
}

fn send_request(socket: &Path, payload: &[u8]) -> std::result::Result<Response, String> {
    let mut stream = UnixStream::connect(socket).map_err(|err| {
        format!(
            "Failed to connect to daemon socket {}: {}",
            socket.display(),
            err
        )
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    stream
        .write_all(payload)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> std::result::Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 16 {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id() -> String {
    format!("cli-{}", ulid::Ulid::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn read_request(stream: &mut UnixStream) -> Option<Request> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.contains(&b'\n') {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }
        let end = buffer.iter().position(|b| *b == b'\n')?;
        serde_json::from_slice(&buffer[..end]).ok()
    }

    fn serve_once(listener: UnixListener, response: Response) -> thread::JoinHandle<Option<Request>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().ok()?;
            let request = read_request(&mut stream);
            serde_json::to_writer(&mut stream, &response).ok()?;
            stream.write_all(b"\n").ok()?;
            request
        })
    }

    #[test]
    fn call_returns_data_and_sends_method() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket).expect("bind socket");
        let server = serve_once(listener, Response::ok(None, json!(["B1", "B2"])));

        let data = call_at(&socket, Method::ListBatches, None).expect("call succeeds");
        assert_eq!(data, json!(["B1", "B2"]));

        let request = server.join().expect("server thread").expect("request read");
        assert!(matches!(request.method, Method::ListBatches));
        assert!(request
            .id
            .as_deref()
            .is_some_and(|id| id.starts_with("cli-")));
    }

    #[test]
    fn call_surfaces_daemon_rejection() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket).expect("bind socket");
        let server = serve_once(
            listener,
            Response::error(None, "student_not_found", "no student S9"),
        );

        let err = call_at(
            &socket,
            Method::RemoveStudent,
            Some(json!({ "student_id": "S9" })),
        )
        .expect_err("daemon rejected");
        match err {
            CliError::Rejected { code, .. } => assert_eq!(code, "student_not_found"),
            other => panic!("unexpected error: {other}"),
        }
        server.join().expect("server thread");
    }

    #[test]
    fn call_reports_missing_daemon() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("missing.sock");

        let err = call_at(&socket, Method::GetHealth, None).expect_err("no daemon");
        assert!(matches!(err, CliError::DaemonUnavailable(_)));
    }
}
