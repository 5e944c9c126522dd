//! Time-ordered trigger queue.
//!
//! A binary min-heap keyed by `(trigger_time, seq)` with lazy deletion:
//! removing or rescheduling a task only drops it from the `live` index, and
//! the orphaned heap entry is discarded once it surfaces at the top. The
//! sequence number makes ordering of equal trigger times follow insertion
//! order.
//!
//! Every operation takes the single internal lock, does its bookkeeping and
//! releases it. No caller code runs under the lock, so a poisoned mutex can
//! only come from a panic between two consistent states and is recovered.

use crate::error::{AlarmError, Result};
use crate::scheduler::tasks::AlarmTask;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Heap entry. Ordered by trigger time, then insertion sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    trigger_time: DateTime<Utc>,
    seq: u64,
    alarm_id: String,
}

/// A pending task together with the sequence number of its current heap entry.
#[derive(Debug)]
struct LiveTask {
    seq: u64,
    task: AlarmTask,
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    live: HashMap<String, LiveTask>,
    executing: HashSet<String>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, task: AlarmTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(HeapEntry {
            trigger_time: task.trigger_time,
            seq,
            alarm_id: task.alarm_id.clone(),
        }));
        self.live.insert(task.alarm_id.clone(), LiveTask { seq, task });
    }

    fn is_current(&self, entry: &HeapEntry) -> bool {
        self.live
            .get(&entry.alarm_id)
            .is_some_and(|live| live.seq == entry.seq)
    }

    /// Drop stale entries until the top of the heap is a live task.
    fn discard_stale(&mut self) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if self.is_current(top) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Thread-safe priority queue of pending alarm tasks.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    state: Mutex<QueueState>,
}

impl TriggerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::DuplicateId`] if a task with the same ID is
    /// pending or currently executing.
    pub fn insert(&self, task: AlarmTask) -> Result<()> {
        let mut state = self.lock();
        if state.live.contains_key(&task.alarm_id) || state.executing.contains(&task.alarm_id) {
            return Err(AlarmError::DuplicateId(task.alarm_id));
        }
        state.push(task);
        Ok(())
    }

    /// Remove a pending task and return it.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::NotFound`] if no task with this ID is pending.
    /// Executing tasks are not pending and cannot be removed.
    pub fn remove(&self, alarm_id: &str) -> Result<AlarmTask> {
        let mut state = self.lock();
        let removed = state
            .live
            .remove(alarm_id)
            .ok_or_else(|| AlarmError::NotFound(alarm_id.to_owned()))?;
        state.discard_stale();
        Ok(removed.task)
    }

    /// Move a pending task to a new trigger time, keeping ID and command.
    ///
    /// Remove and re-insert happen under one lock, so concurrent reschedules
    /// of the same ID serialize without losing either update.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::NotFound`] if no task with this ID is pending.
    pub fn reschedule(&self, alarm_id: &str, trigger_time: DateTime<Utc>) -> Result<AlarmTask> {
        let mut state = self.lock();
        let old = state
            .live
            .remove(alarm_id)
            .ok_or_else(|| AlarmError::NotFound(alarm_id.to_owned()))?;
        let task = old.task.rescheduled(trigger_time);
        state.push(task.clone());
        state.discard_stale();
        Ok(task)
    }

    /// Remove and return every task due at `now`, earliest first.
    ///
    /// Returned IDs are marked executing until [`finish`](Self::finish) is
    /// called for them.
    pub fn pop_all_due(&self, now: DateTime<Utc>) -> Vec<AlarmTask> {
        let mut state = self.lock();
        let mut due = Vec::new();
        while let Some(Reverse(top)) = state.heap.peek() {
            if !state.is_current(top) {
                state.heap.pop();
                continue;
            }
            if top.trigger_time > now {
                break;
            }
            let Some(Reverse(entry)) = state.heap.pop() else {
                break;
            };
            if let Some(live) = state.live.remove(&entry.alarm_id) {
                state.executing.insert(entry.alarm_id);
                due.push(live.task);
            }
        }
        due
    }

    /// Release an executing ID so it can be scheduled again.
    ///
    /// Returns `true` if the ID was executing.
    pub fn finish(&self, alarm_id: &str) -> bool {
        self.lock().executing.remove(alarm_id)
    }

    /// Earliest pending task without removing it.
    pub fn peek_next(&self) -> Option<AlarmTask> {
        let mut state = self.lock();
        state.discard_stale();
        let Reverse(top) = state.heap.peek()?;
        state.live.get(&top.alarm_id).map(|live| live.task.clone())
    }

    /// Pending task with this ID, if any.
    pub fn get(&self, alarm_id: &str) -> Option<AlarmTask> {
        self.lock().live.get(alarm_id).map(|live| live.task.clone())
    }

    /// Returns `true` if this ID has been popped and has not finished yet.
    pub fn is_executing(&self, alarm_id: &str) -> bool {
        self.lock().executing.contains(alarm_id)
    }

    /// Snapshot of all pending tasks, earliest first.
    pub fn pending(&self) -> Vec<AlarmTask> {
        let state = self.lock();
        let mut entries: Vec<(DateTime<Utc>, u64, AlarmTask)> = state
            .live
            .values()
            .map(|live| (live.task.trigger_time, live.seq, live.task.clone()))
            .collect();
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        entries.into_iter().map(|(_, _, task)| task).collect()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    /// Returns `true` if no task is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().live.is_empty()
    }

    /// Number of tasks popped but not yet finished.
    pub fn executing_count(&self) -> usize {
        self.lock().executing.len()
    }
}
