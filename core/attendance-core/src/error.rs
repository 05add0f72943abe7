//! Error types for attendance-core operations.
//!
//! The accounting paths themselves never fail; everything here comes from a
//! collaborator (config file, event store, roster admin).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid clock time {0:?}; expected HH:MM")]
    InvalidClockTime(String),

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Roster Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Student already registered: {0}")]
    StudentAlreadyRegistered(String),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Collaborator Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Event store error: {0}")]
    Store(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results using AttendanceError.
pub type Result<T> = std::result::Result<T, AttendanceError>;

impl From<AttendanceError> for String {
    fn from(err: AttendanceError) -> String {
        err.to_string()
    }
}
