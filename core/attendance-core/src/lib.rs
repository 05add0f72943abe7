//! # attendance-core
//!
//! Presence and session accounting for ClassEye. Turns per-frame sightings of
//! recognized students into entry/exit intervals, credits the seconds that
//! fall inside the authoritative session window, and classifies each student
//! against a minimum in-class threshold.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime. The daemon wraps the engine in a `Mutex`.
//! - **Clock-injected**: every operation takes `now`; nothing reads the wall
//!   clock behind the caller's back.
//! - **Events are the record**: the live engine and [`reconstruct`] must agree
//!   for any log the engine produced.
//! - **Collaborators behind traits**: [`Roster`], [`Recognizer`],
//!   [`EventStore`] and [`Clock`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use attendance_core::{AttendanceConfig, InMemoryRoster, PresenceEngine};
//!
//! let mut engine = PresenceEngine::new(AttendanceConfig::default(), roster);
//! let events = engine.tick(now, &sightings);
//! let verdicts = engine.evaluate(now);
//! ```

pub mod classify;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod presence;
pub mod recognizer;
pub mod reconstruct;
pub mod report;
pub mod roster;
pub mod session;
pub mod store;
pub mod window;

pub use classify::{AttendanceStatus, AttendanceVerdict};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{default_config_path, load_config, AttendanceConfig, ClockTime, SessionConfig};
pub use engine::{PresenceEngine, SessionClose};
pub use error::{AttendanceError, Result};
pub use presence::{PresenceRecord, PresenceState, PresenceStore};
pub use recognizer::{sightings_from_frame, Recognition, Recognizer, Sighting};
pub use reconstruct::{accumulate_seconds, reconstruct_day, reconstruct_logged_day};
pub use report::{export_report, format_duration, AttendanceReport, ReportSource};
pub use roster::{BatchFilter, InMemoryRoster, Roster};
pub use session::{ManualSession, SessionSchedule, SessionWindowResolver};
pub use store::{sort_events, EventFilter, EventStore, MemoryEventStore};
pub use window::{overlap_seconds, SessionWindow};
