//! Control operations over a running scheduler.

use crate::error::{AlarmError, Result};
use crate::scheduler::clock::Clock;
use crate::scheduler::executor::TaskExecutor;
use crate::scheduler::queue::TriggerQueue;
use crate::scheduler::runner::DEFAULT_SNOOZE_SECS;
use crate::scheduler::tasks::{AlarmTask, parse_time_spec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Point-in-time view of one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStatus {
    /// Alarm that was looked up.
    pub alarm_id: String,
    /// Waiting in the queue.
    pub pending: bool,
    /// Popped and currently executing.
    #[serde(default)]
    pub running: bool,
    /// Trigger time while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_time: Option<DateTime<Utc>>,
    /// Command while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Cloneable handle for creating, moving, cancelling and inspecting alarms.
///
/// Every mutation is a single [`TriggerQueue`] operation, so concurrent
/// callers see the same linearizable behavior as the queue itself. Input is
/// validated before the queue is touched.
#[derive(Clone)]
pub struct AlarmControl {
    queue: Arc<TriggerQueue>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    default_snooze_secs: u64,
}

impl AlarmControl {
    /// Build a handle over an existing queue.
    pub fn new(
        queue: Arc<TriggerQueue>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            executor,
            clock,
            default_snooze_secs: DEFAULT_SNOOZE_SECS,
        }
    }

    /// Override the snooze length used when callers do not give one.
    pub fn with_default_snooze(mut self, secs: u64) -> Self {
        self.default_snooze_secs = secs;
        self
    }

    /// Snooze length used when callers do not give one.
    pub fn default_snooze_secs(&self) -> u64 {
        self.default_snooze_secs
    }

    /// Current time according to the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Schedule a new alarm at a `YYYY-MM-DD HH:MM:SS` time spec.
    ///
    /// # Errors
    ///
    /// [`AlarmError::Parse`] for a malformed spec, [`AlarmError::InvalidRequest`]
    /// for an unusable ID or empty command, [`AlarmError::DuplicateId`] if the
    /// ID is pending or executing. The queue is untouched on error.
    pub fn create(&self, alarm_id: &str, time_spec: &str, command: &str) -> Result<AlarmTask> {
        let trigger_time = parse_time_spec(time_spec)?;
        self.create_at(alarm_id, trigger_time, command)
    }

    /// Schedule a new alarm at an already-resolved instant.
    pub fn create_at(
        &self,
        alarm_id: &str,
        trigger_time: DateTime<Utc>,
        command: &str,
    ) -> Result<AlarmTask> {
        let task = AlarmTask::new(alarm_id, trigger_time, command)?;
        self.queue.insert(task.clone())?;
        info!(alarm_id, %trigger_time, "alarm created");
        Ok(task)
    }

    /// Move a pending alarm to a new time spec, keeping its command.
    ///
    /// # Errors
    ///
    /// [`AlarmError::Parse`] for a malformed spec (checked first),
    /// [`AlarmError::NotFound`] if the alarm is not pending.
    pub fn modify(&self, alarm_id: &str, new_time_spec: &str) -> Result<AlarmTask> {
        let trigger_time = parse_time_spec(new_time_spec)?;
        self.reschedule_at(alarm_id, trigger_time)
    }

    /// Move a pending alarm to an already-resolved instant.
    pub fn reschedule_at(&self, alarm_id: &str, trigger_time: DateTime<Utc>) -> Result<AlarmTask> {
        let task = self.queue.reschedule(alarm_id, trigger_time)?;
        info!(alarm_id, %trigger_time, "alarm rescheduled");
        Ok(task)
    }

    /// Push a pending alarm to `now + snooze_secs` (default 540 s).
    ///
    /// # Errors
    ///
    /// [`AlarmError::NotFound`] if the alarm is not pending.
    pub fn snooze(&self, alarm_id: &str, snooze_secs: Option<u64>) -> Result<AlarmTask> {
        let secs = snooze_secs.unwrap_or(self.default_snooze_secs);
        let secs = i64::try_from(secs).map_err(|_| {
            AlarmError::InvalidRequest(format!("snooze of {secs}s is out of range"))
        })?;
        let delta = chrono::TimeDelta::try_seconds(secs).ok_or_else(|| {
            AlarmError::InvalidRequest(format!("snooze of {secs}s is out of range"))
        })?;
        let trigger_time = self
            .clock
            .now()
            .checked_add_signed(delta)
            .ok_or_else(|| AlarmError::InvalidRequest(format!("snooze of {secs}s overflows")))?;
        let task = self.queue.reschedule(alarm_id, trigger_time)?;
        info!(alarm_id, snooze_secs = secs, %trigger_time, "alarm snoozed");
        Ok(task)
    }

    /// Cancel a pending alarm and remove any leftover helper artifacts.
    ///
    /// An alarm that is already executing cannot be cancelled.
    ///
    /// # Errors
    ///
    /// [`AlarmError::NotFound`] if the alarm is not pending.
    pub async fn cancel(&self, alarm_id: &str) -> Result<AlarmTask> {
        let task = self.queue.remove(alarm_id)?;
        info!(alarm_id, "alarm cancelled");
        if let Err(e) = self.executor.cleanup(alarm_id).await {
            warn!(alarm_id, error = %e, "cleanup after cancel failed");
        }
        Ok(task)
    }

    /// Look up an alarm. Unknown and already-fired alarms are reported as
    /// not pending.
    pub fn status(&self, alarm_id: &str) -> AlarmStatus {
        match self.queue.get(alarm_id) {
            Some(task) => AlarmStatus {
                alarm_id: task.alarm_id,
                pending: true,
                running: false,
                trigger_time: Some(task.trigger_time),
                command: Some(task.command),
            },
            None => AlarmStatus {
                alarm_id: alarm_id.to_owned(),
                pending: false,
                running: self.queue.is_executing(alarm_id),
                trigger_time: None,
                command: None,
            },
        }
    }

    /// All pending alarms, earliest first.
    pub fn list(&self) -> Vec<AlarmTask> {
        self.queue.pending()
    }
}
