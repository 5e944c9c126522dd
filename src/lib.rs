//! UltiClock: calendar-driven alarms.
//!
//! Fetches iCalendar feeds, keeps the events whose titles start with a
//! keyword, and schedules an in-process alarm that runs a notification
//! command at each event's start time.
//!
//! # Architecture
//!
//! - **Scheduler**: min-heap trigger queue polled by a background tokio task;
//!   due alarms run as shell scripts on independent tasks
//! - **Control**: create/modify/cancel/snooze/status over a cloneable handle,
//!   exposed as an HTTP API via `axum` with a `reqwest` client
//! - **Calendar**: iCalendar fetch and parse, a SQLite event store, and a
//!   periodic sync that reconciles the feed with the scheduler

pub mod calendar;
pub mod config;
pub mod control;
pub mod error;
pub mod paths;
pub mod scheduler;

pub use config::UlticlockConfig;
pub use control::{AlarmClient, AlarmControl, AlarmStatus, ControlServer};
pub use error::{AlarmError, Result};
pub use scheduler::{AlarmTask, Scheduler, ShutdownMode};
