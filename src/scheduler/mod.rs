//! In-process alarm scheduler.
//!
//! Alarms live in a [`TriggerQueue`] ordered by trigger time. The
//! [`Scheduler`] polls it once per interval and hands every due alarm to a
//! [`TaskExecutor`] on its own task, so a slow command never delays the next
//! poll. Alarms are memory-only and do not survive a restart.

pub mod clock;
pub mod executor;
pub mod queue;
pub mod runner;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{ShellExecutor, TaskExecutor};
pub use queue::TriggerQueue;
pub use runner::{RunOutcome, Scheduler, ShutdownMode, TaskRunRecord};
pub use tasks::{AlarmTask, parse_time_spec};
