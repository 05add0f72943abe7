use attendance_core::AttendanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Daemon rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Unexpected daemon response: {0}")]
    BadResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Attendance(#[from] AttendanceError),
}

pub type Result<T> = std::result::Result<T, CliError>;
