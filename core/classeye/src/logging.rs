//! File logging for the CLI.
//!
//! Output goes to `~/.classeye/logs/classeye.log.<date>` so stdout stays clean
//! for command results. `CLASSEYE_DEBUG_LOG=1` raises the level to debug;
//! otherwise `RUST_LOG` applies, defaulting to `warn`.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "classeye.log";

/// The returned guard must live until exit or buffered lines are lost.
/// Returns `None` when the log directory is unavailable.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if let Err(err) = fs_err::create_dir_all(&dir) {
        eprintln!("classeye: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(guard)
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var("CLASSEYE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".classeye").join("logs"))
}
