//! Calendar event records.

use crate::error::Result;
use crate::scheduler::tasks::{MAX_ALARM_ID_LEN, parse_time_spec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One keyword-matching calendar event.
///
/// Dates and times are kept as text (`YYYY-MM-DD`, `HH:MM:SS`) because that
/// is how the event store persists them and compares them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// iCalendar `UID` with `:MM-DD` of the start date appended.
    pub event_id: String,
    /// Start date, `YYYY-MM-DD`.
    pub date: String,
    /// Start time, `HH:MM:SS`.
    pub start_time: String,
    /// End time, `HH:MM:SS`.
    pub end_time: String,
    /// Event summary.
    pub title: String,
}

impl Event {
    /// Instant at which the event's alarm should fire.
    ///
    /// # Errors
    ///
    /// [`crate::AlarmError::Parse`] if `date`/`start_time` are malformed.
    pub fn trigger_time(&self) -> Result<DateTime<Utc>> {
        parse_time_spec(&format!("{} {}", self.date, self.start_time))
    }

    /// Alarm ID for this event: the event ID with path separators and NUL
    /// replaced by `_`, cut to the maximum alarm ID length.
    pub fn alarm_id(&self) -> String {
        let mut id: String = self
            .event_id
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        if id.len() > MAX_ALARM_ID_LEN {
            let mut end = MAX_ALARM_ID_LEN;
            while !id.is_char_boundary(end) {
                end -= 1;
            }
            id.truncate(end);
        }
        if id.is_empty() || id == "." || id == ".." {
            id = format!("event-{id}");
        }
        id
    }

    /// Render `template`, replacing `{title}`, `{event_id}`, `{date}` and
    /// `{start_time}` with shell-quoted values.
    pub fn notification_command(&self, template: &str) -> String {
        template
            .replace("{title}", &shell_quote(&self.title))
            .replace("{event_id}", &shell_quote(&self.event_id))
            .replace("{date}", &shell_quote(&self.date))
            .replace("{start_time}", &shell_quote(&self.start_time))
    }
}

/// Quote `value` for POSIX `sh` as a single word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
