//! Scheduler background loop.
//!
//! Spawns a tokio task that polls the [`TriggerQueue`] once per interval,
//! pops every due alarm and hands each to the [`TaskExecutor`] on its own
//! tracked task. Run history is kept in memory only.

use crate::config::SchedulerConfig;
use crate::control::AlarmControl;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::executor::{ShellExecutor, TaskExecutor};
use crate::scheduler::queue::TriggerQueue;
use crate::scheduler::tasks::AlarmTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Interval between scheduler ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Snooze length used when a request does not name one (9 minutes).
pub const DEFAULT_SNOOZE_SECS: u64 = 540;

/// How [`Scheduler::shutdown`] treats executions that are still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Let running commands finish.
    Wait,
    /// Kill running commands, then clean up after them.
    #[default]
    Abandon,
}

/// Final state of one alarm execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Command exited successfully.
    Success,
    /// Command failed; the alarm is not retried.
    Failed {
        /// Failure description.
        reason: String,
    },
    /// Execution was cut short by shutdown.
    Abandoned,
}

/// One finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunRecord {
    /// Alarm that ran.
    pub alarm_id: String,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution and cleanup ended.
    pub finished_at: DateTime<Utc>,
    /// How it ended.
    pub outcome: RunOutcome,
}

#[derive(Debug)]
struct RunHistory {
    records: VecDeque<TaskRunRecord>,
    limit: usize,
}

impl RunHistory {
    fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn push(&mut self, record: TaskRunRecord) {
        self.records.push_back(record);
        while self.records.len() > self.limit {
            self.records.pop_front();
        }
    }
}

/// Releases an executing alarm ID when the execution task ends.
struct FinishGuard {
    queue: Arc<TriggerQueue>,
    alarm_id: String,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.queue.finish(&self.alarm_id);
    }
}

/// Everything a scheduler tick and its executions share.
#[derive(Clone)]
struct Dispatcher {
    queue: Arc<TriggerQueue>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    history: Arc<Mutex<RunHistory>>,
    tracker: TaskTracker,
    abandon: CancellationToken,
}

impl Dispatcher {
    fn history(&self) -> MutexGuard<'_, RunHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop every due task and spawn its execution. Returns the number spawned.
    fn tick(&self) -> usize {
        let now = self.clock.now();
        let due = self.queue.pop_all_due(now);
        let count = due.len();
        for task in due {
            debug!(alarm_id = %task.alarm_id, trigger_time = %task.trigger_time, "dispatching alarm");
            let dispatcher = self.clone();
            self.tracker.spawn(dispatcher.run(task));
        }
        count
    }

    async fn run(self, task: AlarmTask) {
        let finish = FinishGuard {
            queue: Arc::clone(&self.queue),
            alarm_id: task.alarm_id.clone(),
        };
        let started_at = self.clock.now();

        let executor = Arc::clone(&self.executor);
        let job = task.clone();
        let mut execution = tokio::spawn(async move { executor.execute(&job).await });

        let joined = tokio::select! {
            biased;
            _ = self.abandon.cancelled() => None,
            joined = &mut execution => Some(joined),
        };

        let outcome = match joined {
            None => {
                execution.abort();
                let _ = execution.await;
                warn!(alarm_id = %task.alarm_id, "alarm execution abandoned at shutdown");
                RunOutcome::Abandoned
            }
            Some(Ok(Ok(()))) => {
                info!(alarm_id = %task.alarm_id, "alarm fired");
                RunOutcome::Success
            }
            Some(Ok(Err(e))) => {
                warn!(alarm_id = %task.alarm_id, error = %e, "alarm command failed");
                RunOutcome::Failed { reason: e.to_string() }
            }
            Some(Err(e)) => {
                warn!(alarm_id = %task.alarm_id, error = %e, "alarm executor did not finish");
                RunOutcome::Failed {
                    reason: format!("executor panicked or was cancelled: {e}"),
                }
            }
        };

        if let Err(e) = self.executor.cleanup(&task.alarm_id).await {
            warn!(alarm_id = %task.alarm_id, error = %e, "alarm cleanup failed");
        }

        let record = TaskRunRecord {
            alarm_id: task.alarm_id,
            started_at,
            finished_at: self.clock.now(),
            outcome,
        };
        drop(finish);
        self.history().push(record);
    }
}

/// In-process alarm scheduler.
///
/// Owns the trigger queue and the execution set. Create one per process,
/// call [`start`](Self::start) to spawn the polling loop and hand
/// [`handle`](Self::handle) to the control API.
pub struct Scheduler {
    dispatcher: Dispatcher,
    poll_interval: Duration,
    default_snooze_secs: u64,
    stop: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler that runs due tasks with `executor`.
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            dispatcher: Dispatcher {
                queue: Arc::new(TriggerQueue::new()),
                executor,
                clock: Arc::new(SystemClock),
                history: Arc::new(Mutex::new(RunHistory::new(DEFAULT_HISTORY_LIMIT))),
                tracker: TaskTracker::new(),
                abandon: CancellationToken::new(),
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_snooze_secs: DEFAULT_SNOOZE_SECS,
            stop: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Build a shell-executing scheduler from configuration.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let mut executor = ShellExecutor::new(config.script_dir());
        if config.command_timeout_secs > 0 {
            executor = executor.with_timeout(Duration::from_secs(config.command_timeout_secs));
        }
        Self::new(Arc::new(executor))
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_default_snooze(config.default_snooze_secs)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.dispatcher.clock = clock;
        self
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Override the snooze length used when callers do not give one.
    pub fn with_default_snooze(mut self, secs: u64) -> Self {
        self.default_snooze_secs = secs;
        self
    }

    /// Override the in-memory run-history limit.
    pub fn with_history_limit(self, max_entries: usize) -> Self {
        *self.dispatcher.history() = RunHistory::new(max_entries);
        self
    }

    /// Control handle sharing this scheduler's queue.
    pub fn handle(&self) -> AlarmControl {
        AlarmControl::new(
            Arc::clone(&self.dispatcher.queue),
            Arc::clone(&self.dispatcher.executor),
            Arc::clone(&self.dispatcher.clock),
        )
        .with_default_snooze(self.default_snooze_secs)
    }

    /// The trigger queue.
    pub fn queue(&self) -> &Arc<TriggerQueue> {
        &self.dispatcher.queue
    }

    /// Run one cycle now: dispatch every due task. Returns how many were
    /// dispatched.
    pub fn tick(&self) -> usize {
        self.dispatcher.tick()
    }

    /// Finished executions, oldest first.
    pub fn history(&self) -> Vec<TaskRunRecord> {
        self.dispatcher.history().records.iter().cloned().collect()
    }

    /// Number of executions still running.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.tracker.len()
    }

    /// Returns `true` while the polling loop is active.
    pub fn is_running(&self) -> bool {
        self.loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the polling loop. Calling it again while running is a no-op.
    ///
    /// A scheduler cannot be restarted: after [`shutdown`](Self::shutdown)
    /// this only logs a warning.
    pub fn start(&self) {
        if self.stop.is_cancelled() {
            warn!("scheduler was shut down and cannot be restarted");
            return;
        }
        let mut slot = self.loop_handle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("scheduler already started");
            return;
        }

        let dispatcher = self.dispatcher.clone();
        let stop = self.stop.clone();
        let poll_interval = self.poll_interval;

        *slot = Some(tokio::spawn(async move {
            info!(
                poll_ms = poll_interval.as_millis() as u64,
                pending = dispatcher.queue.len(),
                "scheduler started"
            );
            loop {
                dispatcher.tick();
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            info!("scheduler loop stopped");
        }));
    }

    /// Stop the loop after its current cycle, then settle running executions
    /// according to `mode`. Returns once no execution is left.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.stop.cancel();

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("scheduler loop ended abnormally: {e}");
            }
        }

        let running = self.in_flight();
        if mode == ShutdownMode::Abandon {
            self.dispatcher.abandon.cancel();
        }
        if running > 0 {
            info!(running, ?mode, "waiting for alarm executions to settle");
        }
        self.dispatcher.tracker.close();
        self.dispatcher.tracker.wait().await;
        info!("scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
