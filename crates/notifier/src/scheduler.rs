//! Deferred/retry scheduler.
//!
//! Holds tasks whose `scheduled_at` lies in the future, either because they were
//! submitted with a delivery time or because they are waiting out a retry
//! backoff. Each tick moves every due task into the priority queues.
//!
//! Lock order is always deferred set → priority queues (with the outcome
//! tracker, when involved, taken first), and a tick keeps the deferred lock
//! for its whole scan. Ticks therefore never overlap, and a
//! promoted task is never visible in both places at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_common::clock::{Clock, add_duration};
use courier_common::types::{NotificationTask, TaskStatus};

use crate::queue::PriorityQueueSet;

/// Deadline for the next attempt after `attempt` failures: `now + base * attempt`.
pub fn backoff_deadline(now: DateTime<Utc>, base: Duration, attempt: u32) -> DateTime<Utc> {
    add_duration(now, base.saturating_mul(attempt))
}

/// Set of tasks not yet eligible for dispatch.
pub struct DeferredScheduler {
    tasks: Mutex<Vec<NotificationTask>>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Hold a task until its `scheduled_at` is reached.
    pub fn defer(&self, task: NotificationTask) {
        self.tasks.lock().push(task);
    }

    /// Promote every task due at `now` into `queues`. Returns the number promoted.
    pub fn tick(&self, now: DateTime<Utc>, queues: &PriorityQueueSet) -> usize {
        let mut tasks = self.tasks.lock();
        let (due, waiting): (Vec<_>, Vec<_>) =
            tasks.drain(..).partition(|task| task.is_due(now));
        *tasks = waiting;

        let promoted = due.len();
        for mut task in due {
            task.status = TaskStatus::Pending;
            tracing::info!(
                task_id = %task.id,
                priority = %task.priority,
                retry_count = task.retry_count,
                "Scheduled notification moved to queue"
            );
            queues.enqueue(task);
        }
        promoted
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Snapshot of a deferred task, if present.
    pub fn find(&self, task_id: Uuid) -> Option<NotificationTask> {
        self.find_or_else(task_id, || None)
    }

    /// Like `find`, but consults `fallback` before releasing the deferred lock.
    pub fn find_or_else(
        &self,
        task_id: Uuid,
        fallback: impl FnOnce() -> Option<NotificationTask>,
    ) -> Option<NotificationTask> {
        let tasks = self.tasks.lock();
        tasks
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
            .or_else(fallback)
    }
}

impl Default for DeferredScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler loop. Ticks every `interval` until `shutdown` is cancelled.
///
/// A zero `interval` is rejected by `NotifierConfig::validate`; here it is
/// raised to one millisecond rather than panicking the loop.
pub async fn run_scheduler(
    scheduler: Arc<DeferredScheduler>,
    queues: Arc<PriorityQueueSet>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "Scheduler started");

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let promoted = scheduler.tick(clock.now(), &queues);
                if promoted > 0 {
                    tracing::debug!(promoted, remaining = scheduler.len(), "Scheduler tick");
                }
            }
        }
    }

    tracing::info!("Scheduler stopped");
}
