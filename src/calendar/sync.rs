//! Calendar-to-scheduler reconciliation.
//!
//! Each sync fetches every configured calendar, replaces the event store's
//! contents and then brings the scheduler in line with the feed: new events
//! become alarms, moved events are rescheduled, and alarms this service
//! created for events that disappeared are cancelled.
//!
//! Alarms live in memory only, so the first pass after startup also fires
//! events that started during downtime, within `missed_grace_secs`.

use crate::calendar::event::Event;
use crate::calendar::fetcher::{EventSource, IcalFetcher};
use crate::calendar::store::EventStore;
use crate::config::{SyncConfig, UlticlockConfig};
use crate::control::AlarmControl;
use crate::error::{AlarmError, Result};
use chrono::{DateTime, Days, TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counts from one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Calendars fetched successfully.
    pub calendars_ok: usize,
    /// Calendars that failed to fetch.
    pub calendars_failed: usize,
    /// Keyword-matching events in the window.
    pub events: usize,
    /// Alarms created.
    pub created: usize,
    /// Alarms moved to a new time.
    pub rescheduled: usize,
    /// Alarms already at the right time.
    pub unchanged: usize,
    /// Missed events fired immediately.
    pub recovered: usize,
    /// Alarms cancelled because their event vanished or moved into the past.
    pub cancelled: usize,
    /// Events skipped (already started, executing, or unusable).
    pub skipped: usize,
}

/// Periodic calendar sync.
pub struct CalendarSync {
    sources: Vec<Arc<dyn EventSource>>,
    store: Arc<EventStore>,
    control: AlarmControl,
    keyword: String,
    settings: SyncConfig,
    scheduled: Mutex<HashSet<String>>,
    first_pass: AtomicBool,
}

impl CalendarSync {
    /// Sync `sources` into `store` and the scheduler behind `control`.
    pub fn new(
        sources: Vec<Arc<dyn EventSource>>,
        store: Arc<EventStore>,
        control: AlarmControl,
        keyword: impl Into<String>,
        settings: SyncConfig,
    ) -> Self {
        Self {
            sources,
            store,
            control,
            keyword: keyword.into(),
            settings,
            scheduled: Mutex::new(HashSet::new()),
            first_pass: AtomicBool::new(true),
        }
    }

    /// Build a sync over every calendar in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Calendar`] if a fetcher cannot be built.
    pub fn from_config(
        config: &UlticlockConfig,
        store: Arc<EventStore>,
        control: AlarmControl,
    ) -> Result<Self> {
        let mut sources: Vec<Arc<dyn EventSource>> = Vec::with_capacity(config.calendars.len());
        for calendar in &config.calendars {
            sources.push(Arc::new(IcalFetcher::new(calendar.clone())?));
        }
        Ok(Self::new(
            sources,
            store,
            control,
            config.alarm_keyword.clone(),
            config.sync.clone(),
        ))
    }

    /// Alarm IDs this service currently owns.
    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scheduled().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one sync pass.
    ///
    /// Fetch failures are counted in the report, not returned. While any
    /// calendar fails, vanished events are not cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Store`] if the events cannot be written.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let now = self.control.now();
        let from = now.date_naive();
        let to = from
            .checked_add_days(Days::new(u64::from(self.settings.lookahead_days)))
            .unwrap_or(from);

        let mut report = SyncReport::default();
        let mut events: Vec<Event> = Vec::new();
        for source in &self.sources {
            match source.fetch(&self.keyword, from, to).await {
                Ok(mut fetched) => {
                    report.calendars_ok += 1;
                    events.append(&mut fetched);
                }
                Err(e) => {
                    report.calendars_failed += 1;
                    warn!(calendar = source.name(), error = %e, "calendar fetch failed");
                }
            }
        }
        events.sort_by(|a, b| (&a.date, &a.start_time).cmp(&(&b.date, &b.start_time)));
        let mut unique = HashSet::new();
        events.retain(|e| unique.insert(e.event_id.clone()));
        report.events = events.len();

        let store = Arc::clone(&self.store);
        let to_store = events.clone();
        tokio::task::spawn_blocking(move || store.store(&to_store))
            .await
            .map_err(|e| AlarmError::Calendar(format!("event store task failed: {e}")))??;

        // Recovery runs on the first pass that reaches any calendar.
        let recovering = report.calendars_ok > 0 && self.first_pass.swap(false, Ordering::SeqCst);

        let mut seen = HashSet::new();
        for event in &events {
            let alarm_id = event.alarm_id();
            seen.insert(alarm_id.clone());
            self.reconcile(event, &alarm_id, now, recovering, &mut report)
                .await;
        }

        if report.calendars_failed == 0 {
            self.cancel_vanished(&seen, &mut report).await;
        }

        // Forget IDs that fired or were cancelled elsewhere.
        self.scheduled().retain(|id| {
            let status = self.control.status(id);
            status.pending || status.running
        });

        info!(
            events = report.events,
            created = report.created,
            rescheduled = report.rescheduled,
            recovered = report.recovered,
            cancelled = report.cancelled,
            failed = report.calendars_failed,
            "calendar sync finished"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        event: &Event,
        alarm_id: &str,
        now: DateTime<Utc>,
        recovering: bool,
        report: &mut SyncReport,
    ) {
        let trigger_time = match event.trigger_time() {
            Ok(t) => t,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "skipping event with bad start");
                report.skipped += 1;
                return;
            }
        };

        let status = self.control.status(alarm_id);
        if status.running {
            debug!(alarm_id, "event alarm is executing, leaving it");
            report.skipped += 1;
            return;
        }

        if trigger_time <= now {
            self.reconcile_past(event, alarm_id, trigger_time, now, status.pending, recovering, report)
                .await;
            return;
        }

        let result = if status.pending {
            if status.trigger_time == Some(trigger_time) {
                report.unchanged += 1;
                Ok(())
            } else {
                self.control
                    .reschedule_at(alarm_id, trigger_time)
                    .map(|_| report.rescheduled += 1)
            }
        } else {
            let command = event.notification_command(&self.settings.notify_command);
            self.control
                .create_at(alarm_id, trigger_time, &command)
                .map(|_| report.created += 1)
        };
        self.adopt(alarm_id, result, report);
    }

    /// Handle an event whose start is at or before `now`.
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_past(
        &self,
        event: &Event,
        alarm_id: &str,
        trigger_time: DateTime<Utc>,
        now: DateTime<Utc>,
        pending: bool,
        recovering: bool,
        report: &mut SyncReport,
    ) {
        let in_grace = self.settings.missed_grace_secs > 0 && now - trigger_time <= self.grace();

        if pending {
            if !self.scheduled().contains(alarm_id) {
                debug!(alarm_id, "pending alarm not owned by sync, leaving it");
                report.skipped += 1;
            } else if in_grace {
                info!(alarm_id, start = %trigger_time, "event moved into the past, firing now");
                let result = self
                    .control
                    .reschedule_at(alarm_id, now)
                    .map(|_| report.rescheduled += 1);
                self.adopt(alarm_id, result, report);
            } else {
                match self.control.cancel(alarm_id).await {
                    Ok(_) => {
                        info!(alarm_id, start = %trigger_time, "event moved into the past, alarm cancelled");
                        report.cancelled += 1;
                    }
                    Err(e) => {
                        warn!(alarm_id, error = %e, "cancel of past event alarm failed");
                        report.skipped += 1;
                    }
                }
                self.scheduled().remove(alarm_id);
            }
            return;
        }

        if !recovering {
            report.skipped += 1;
            return;
        }
        if in_grace {
            warn!(alarm_id, start = %trigger_time, "missed alarm during downtime, firing now");
            let command = event.notification_command(&self.settings.notify_command);
            let result = self
                .control
                .create_at(alarm_id, now, &command)
                .map(|_| report.recovered += 1);
            self.adopt(alarm_id, result, report);
        } else {
            warn!(alarm_id, start = %trigger_time, "missed alarm outside grace window, skipped");
            report.skipped += 1;
        }
    }

    /// Record the outcome of scheduling an event alarm.
    fn adopt(&self, alarm_id: &str, result: Result<()>, report: &mut SyncReport) {
        match result {
            Ok(()) => {
                self.scheduled().insert(alarm_id.to_owned());
            }
            Err(e) => {
                warn!(alarm_id, error = %e, "could not schedule event alarm");
                report.skipped += 1;
            }
        }
    }

    fn grace(&self) -> TimeDelta {
        i64::try_from(self.settings.missed_grace_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    async fn cancel_vanished(&self, seen: &HashSet<String>, report: &mut SyncReport) {
        let vanished: Vec<String> = self
            .scheduled()
            .iter()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();

        for alarm_id in vanished {
            match self.control.cancel(&alarm_id).await {
                Ok(_) => {
                    info!(alarm_id, "event removed from calendar, alarm cancelled");
                    report.cancelled += 1;
                }
                Err(AlarmError::NotFound(_)) => {}
                Err(e) => warn!(alarm_id, error = %e, "cancel of vanished event failed"),
            }
            self.scheduled().remove(&alarm_id);
        }
    }

    /// Sync every `interval_secs` until `cancel` fires. The first pass runs
    /// immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.settings.interval_secs.max(1));
        info!(
            calendars = self.sources.len(),
            interval_secs = interval.as_secs(),
            "calendar sync started"
        );
        loop {
            if let Err(e) = self.sync_once().await {
                warn!(error = %e, "calendar sync failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("calendar sync stopped");
    }

    fn scheduled(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
