//! Alarm task definition and time-spec parsing.
//!
//! An [`AlarmTask`] is an immutable value: once built, its trigger time is
//! only ever changed by removing it from the queue and inserting a fresh
//! task (see [`AlarmTask::rescheduled`]).

use crate::error::{AlarmError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted format for absolute time specifications.
pub const TIME_SPEC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum alarm ID length in bytes.
pub const MAX_ALARM_ID_LEN: usize = 255;

/// A one-shot alarm: run `command` once `trigger_time` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTask {
    /// Caller-assigned unique identifier.
    pub alarm_id: String,
    /// Instant at which the task becomes due.
    pub trigger_time: DateTime<Utc>,
    /// Shell command executed when due.
    pub command: String,
}

impl AlarmTask {
    /// Build a validated task.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::InvalidRequest`] if the ID cannot be used as a
    /// file name component or the command is empty.
    pub fn new(
        alarm_id: impl Into<String>,
        trigger_time: DateTime<Utc>,
        command: impl Into<String>,
    ) -> Result<Self> {
        let alarm_id = alarm_id.into();
        let command = command.into();
        validate_alarm_id(&alarm_id)?;
        if command.trim().is_empty() {
            return Err(AlarmError::InvalidRequest(format!(
                "alarm {alarm_id} has an empty command"
            )));
        }
        Ok(Self {
            alarm_id,
            trigger_time,
            command,
        })
    }

    /// Returns a copy of this task with a new trigger time.
    pub fn rescheduled(&self, trigger_time: DateTime<Utc>) -> Self {
        Self {
            alarm_id: self.alarm_id.clone(),
            trigger_time,
            command: self.command.clone(),
        }
    }

    /// Returns `true` if the task is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_time <= now
    }
}

/// Check that an alarm ID is usable as part of a script file name.
pub fn validate_alarm_id(alarm_id: &str) -> Result<()> {
    if alarm_id.is_empty() {
        return Err(AlarmError::InvalidRequest("alarm_id is empty".to_owned()));
    }
    if alarm_id.len() > MAX_ALARM_ID_LEN {
        return Err(AlarmError::InvalidRequest(format!(
            "alarm_id longer than {MAX_ALARM_ID_LEN} bytes"
        )));
    }
    if alarm_id == "." || alarm_id == ".." || alarm_id.contains(['/', '\\', '\0']) {
        return Err(AlarmError::InvalidRequest(format!(
            "alarm_id {alarm_id:?} contains path characters"
        )));
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD HH:MM:SS` time spec into a UTC timestamp.
///
/// The spec carries no offset and is taken as UTC.
///
/// # Errors
///
/// Returns [`AlarmError::Parse`] for anything that does not match the format.
pub fn parse_time_spec(spec: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(spec.trim(), TIME_SPEC_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| AlarmError::Parse(spec.to_owned()))
}

/// Format a timestamp as a time spec accepted by [`parse_time_spec`].
pub fn format_time_spec(time: DateTime<Utc>) -> String {
    time.format(TIME_SPEC_FORMAT).to_string()
}
