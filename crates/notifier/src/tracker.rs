//! Outcome tracker: in-memory bookkeeping of processing, sent and failed tasks.
//!
//! The completed and failed collections are bounded: once `history_limit` is
//! reached the oldest entry is evicted. Moving a task out of the processing set
//! and into a terminal collection happens under one lock.
//!
//! Hand-overs to the priority queues or the deferred scheduler run while the
//! tracker lock is held, so a task is always visible in some collection. Lock
//! order is tracker → deferred set → priority queues.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use uuid::Uuid;

use courier_common::types::{NotificationTask, TaskStatus};

#[derive(Default)]
struct TrackerState {
    processing: HashMap<Uuid, NotificationTask>,
    completed: VecDeque<NotificationTask>,
    failed: VecDeque<NotificationTask>,
}

/// Collection sizes at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct OutcomeTracker {
    state: Mutex<TrackerState>,
    history_limit: usize,
}

impl OutcomeTracker {
    /// `history_limit` must be at least 1; `NotifierConfig::validate` enforces it.
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            history_limit,
        }
    }

    /// Take the next task from `source` and mark it as processing in one step.
    ///
    /// `source` runs under the tracker lock, so a dequeued task never drops out
    /// of sight between leaving the queues and entering the processing set.
    pub fn claim(
        &self,
        source: impl FnOnce() -> Option<NotificationTask>,
    ) -> Option<NotificationTask> {
        let mut state = self.state.lock();
        let mut task = source()?;
        task.status = TaskStatus::Processing;
        state.processing.insert(task.id, task.clone());
        Some(task)
    }

    /// Record that a worker claimed `task`.
    ///
    /// Returns `false` if the task was already marked as processing, which
    /// would mean two workers hold the same task.
    pub fn begin(&self, task: &NotificationTask) -> bool {
        self.state
            .lock()
            .processing
            .insert(task.id, task.clone())
            .is_none()
    }

    /// Drop `task` from the processing set and pass it to `next` under the same lock.
    pub fn hand_off(&self, task: NotificationTask, next: impl FnOnce(NotificationTask)) {
        let mut state = self.state.lock();
        state.processing.remove(&task.id);
        next(task);
    }

    /// Move a delivered task into the completed history.
    pub fn record_sent(&self, task: NotificationTask) {
        let mut state = self.state.lock();
        state.processing.remove(&task.id);
        push_bounded(&mut state.completed, task, self.history_limit);
    }

    /// Move a permanently failed task into the failed history.
    pub fn record_failed(&self, task: NotificationTask) {
        let mut state = self.state.lock();
        state.processing.remove(&task.id);
        push_bounded(&mut state.failed, task, self.history_limit);
    }

    /// Remove a task from the failed collection and pass it to `requeue`.
    ///
    /// Returns `false` if `task_id` is not a failed task.
    pub fn retry_failed(&self, task_id: Uuid, requeue: impl FnOnce(NotificationTask)) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.failed.iter().position(|task| task.id == task_id) else {
            return false;
        };
        match state.failed.remove(pos) {
            Some(task) => {
                requeue(task);
                true
            }
            None => false,
        }
    }

    pub fn counts(&self) -> OutcomeCounts {
        let state = self.state.lock();
        OutcomeCounts {
            processing: state.processing.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
        }
    }

    /// Processing, completed and failed tasks merged, newest first, capped at `limit`.
    pub fn history(&self, limit: usize) -> Vec<NotificationTask> {
        let state = self.state.lock();
        let recent = |tasks: &VecDeque<NotificationTask>| {
            tasks
                .iter()
                .skip(tasks.len().saturating_sub(limit))
                .cloned()
                .collect::<Vec<_>>()
        };

        let mut all: Vec<NotificationTask> = state.processing.values().cloned().collect();
        all.extend(recent(&state.completed));
        all.extend(recent(&state.failed));
        drop(state);

        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        all
    }

    /// Snapshot of a tracked task, if present.
    pub fn find(&self, task_id: Uuid) -> Option<NotificationTask> {
        self.find_or_else(task_id, || None)
    }

    /// Like `find`, but consults `fallback` before releasing the tracker lock.
    pub fn find_or_else(
        &self,
        task_id: Uuid,
        fallback: impl FnOnce() -> Option<NotificationTask>,
    ) -> Option<NotificationTask> {
        let state = self.state.lock();
        state
            .processing
            .get(&task_id)
            .or_else(|| state.completed.iter().find(|task| task.id == task_id))
            .or_else(|| state.failed.iter().find(|task| task.id == task_id))
            .cloned()
            .or_else(fallback)
    }
}

fn push_bounded(tasks: &mut VecDeque<NotificationTask>, task: NotificationTask, limit: usize) {
    if tasks.len() >= limit {
        tasks.pop_front();
    }
    tasks.push_back(task);
}
