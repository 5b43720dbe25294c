//! Worker pool: delivery workers and the per-task dispatch logic.
//!
//! Each worker repeatedly pulls the highest-priority ready task and runs it
//! through its handler. A task is popped and entered into the processing set
//! under the tracker lock, and then belongs to exactly one worker until it
//! reaches a terminal collection or is handed back to the deferred scheduler.
//!
//! Handlers run in their own spawned task so that a panicking handler is
//! reported as a failed attempt instead of taking the worker down with it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use courier_common::clock::Clock;
use courier_common::error::NotifierError;
use courier_common::types::{NotificationTask, TaskStatus};

use crate::queue::PriorityQueueSet;
use crate::registry::HandlerRegistry;
use crate::scheduler::{DeferredScheduler, backoff_deadline};
use crate::tracker::OutcomeTracker;

/// State shared by the workers, the scheduler and the manager facade.
pub struct DispatchContext {
    pub queues: Arc<PriorityQueueSet>,
    pub scheduler: Arc<DeferredScheduler>,
    pub registry: HandlerRegistry,
    pub tracker: OutcomeTracker,
    pub clock: Arc<dyn Clock>,
    /// Linear backoff base between attempts
    pub retry_delay: Duration,
    /// Upper bound on a single handler call; `None` means unbounded
    pub handler_timeout: Option<Duration>,
}

/// What happened to a task after one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Retry,
    Failed,
}

impl DispatchContext {
    /// Run one delivery attempt for a task just taken off the priority queues.
    pub async fn process_task(&self, mut task: NotificationTask) -> DispatchOutcome {
        task.status = TaskStatus::Processing;
        if !self.tracker.begin(&task) {
            tracing::error!(task_id = %task.id, "Task claimed while already processing");
        }
        self.dispatch(task).await
    }

    /// Deliver a task that is already in the processing set.
    async fn dispatch(&self, mut task: NotificationTask) -> DispatchOutcome {
        tracing::info!(
            task_id = %task.id,
            notification_type = %task.notification_type,
            priority = %task.priority,
            attempt = task.retry_count + 1,
            "Processing notification"
        );

        match self.attempt(&task).await {
            Ok(()) => {
                task.status = TaskStatus::Sent;
                tracing::info!(task_id = %task.id, "Notification sent successfully");
                self.tracker.record_sent(task);
                DispatchOutcome::Sent
            }
            Err(err) => self.handle_failure(task, err),
        }
    }

    /// Resolve and invoke the handler for `task`.
    async fn attempt(&self, task: &NotificationTask) -> Result<(), NotifierError> {
        let Some(handler) = self.registry.get(&task.notification_type) else {
            return Err(NotifierError::HandlerNotRegistered(
                task.notification_type.clone(),
            ));
        };

        let snapshot = task.clone();
        let mut call = tokio::spawn(async move { handler.deliver(&snapshot).await });

        let joined = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    call.abort();
                    return Err(NotifierError::HandlerTimeout(limit));
                }
            },
            None => call.await,
        };

        match joined {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(NotifierError::HandlerRejected),
            Ok(Err(e)) => Err(NotifierError::HandlerFailed(format!("{e:#}"))),
            Err(e) => Err(NotifierError::HandlerPanicked(e.to_string())),
        }
    }

    /// Record a failed attempt and route the task to retry or to the failed collection.
    fn handle_failure(&self, mut task: NotificationTask, err: NotifierError) -> DispatchOutcome {
        task.last_error = Some(err.to_string());
        tracing::error!(task_id = %task.id, error = %err, "Error processing notification");

        if !err.is_retryable() {
            task.status = TaskStatus::Failed;
            tracing::error!(
                task_id = %task.id,
                retry_count = task.retry_count,
                "Notification failed without retry"
            );
            self.tracker.record_failed(task);
            return DispatchOutcome::Failed;
        }

        task.retry_count = (task.retry_count + 1).min(task.max_retries);

        if task.retries_exhausted() {
            task.status = TaskStatus::Failed;
            tracing::error!(
                task_id = %task.id,
                max_retries = task.max_retries,
                "Notification failed after exhausting retries"
            );
            self.tracker.record_failed(task);
            return DispatchOutcome::Failed;
        }

        let retry_at = backoff_deadline(self.clock.now(), self.retry_delay, task.retry_count);
        task.status = TaskStatus::Retry;
        task.scheduled_at = Some(retry_at);
        tracing::info!(
            task_id = %task.id,
            retry_count = task.retry_count,
            retry_at = %retry_at,
            "Notification scheduled for retry"
        );
        self.tracker.hand_off(task, |task| self.scheduler.defer(task));
        DispatchOutcome::Retry
    }

    /// One worker iteration: claim the next ready task, if any, and dispatch it.
    pub async fn run_once(&self) -> Option<DispatchOutcome> {
        let task = self.tracker.claim(|| self.queues.dequeue_ready())?;
        Some(self.dispatch(task).await)
    }
}

/// Worker loop. Exits after its current task once `shutdown` is cancelled.
pub async fn run_worker(
    worker_id: usize,
    ctx: Arc<DispatchContext>,
    idle_poll: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(worker_id, "Worker started");

    while !shutdown.is_cancelled() {
        if ctx.run_once().await.is_some() {
            continue;
        }

        // Nothing ready: sleep until an enqueue wakes us, the poll interval
        // elapses, or shutdown is requested.
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ctx.queues.notified() => {}
            _ = tokio::time::sleep(idle_poll) => {}
        }
    }

    tracing::info!(worker_id, "Worker stopped");
}
