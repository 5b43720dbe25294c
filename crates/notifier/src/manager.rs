//! Notification queue manager: the public entry point of the dispatch core.
//!
//! Owns the priority queues, the deferred scheduler, the handler registry and
//! the outcome tracker, and runs the worker pool plus the scheduler loop
//! between `start` and `stop`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier_common::clock::{Clock, SystemClock};
use courier_common::config::NotifierConfig;
use courier_common::error::NotifierError;
use courier_common::types::{NewNotification, NotificationTask, TaskStatus};

use crate::pool::{DispatchContext, run_worker};
use crate::queue::{PriorityQueueSet, QueueDepths};
use crate::registry::{HandlerRegistry, NotificationHandler, handler_fn};
use crate::scheduler::{DeferredScheduler, run_scheduler};
use crate::tracker::OutcomeTracker;

/// Aggregate queue statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Ready tasks per priority level
    pub queues: QueueDepths,
    /// Tasks waiting for a delivery time or a retry backoff
    pub scheduled_tasks: usize,
    pub processing_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub is_running: bool,
    /// Live worker count (0 while stopped)
    pub workers: usize,
}

/// Handles of a running pool.
struct RunningPool {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    scheduler: JoinHandle<()>,
}

/// Priority-aware notification queue with scheduled delivery and bounded retry.
pub struct NotificationQueueManager {
    ctx: Arc<DispatchContext>,
    config: NotifierConfig,
    running: AtomicBool,
    pool: Mutex<Option<RunningPool>>,
}

impl NotificationQueueManager {
    /// Create a manager driven by the system clock.
    pub fn new(config: NotifierConfig) -> Result<Self, NotifierError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager driven by `clock`.
    pub fn with_clock(
        config: NotifierConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, NotifierError> {
        config.validate()?;

        let ctx = DispatchContext {
            queues: Arc::new(PriorityQueueSet::new()),
            scheduler: Arc::new(DeferredScheduler::new()),
            registry: HandlerRegistry::new(),
            tracker: OutcomeTracker::new(config.history_limit),
            clock,
            retry_delay: config.retry_delay,
            handler_timeout: config.handler_timeout,
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            config,
            running: AtomicBool::new(false),
            pool: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Register the delivery handler for a notification type, replacing any previous one.
    pub fn register_handler(
        &self,
        notification_type: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) {
        self.ctx.registry.register(notification_type, Arc::new(handler));
    }

    /// Register an async closure as the handler for a notification type.
    pub fn register_fn<F, Fut>(&self, notification_type: impl Into<String>, f: F)
    where
        F: Fn(NotificationTask) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.register_handler(notification_type, handler_fn(f));
    }

    pub fn has_handler(&self, notification_type: &str) -> bool {
        self.ctx.registry.contains(notification_type)
    }

    pub fn handler_types(&self) -> Vec<String> {
        self.ctx.registry.types()
    }

    /// Accept a notification and return its id.
    ///
    /// Tasks with a future `scheduled_at` go to the scheduler; everything else
    /// is queued for immediate dispatch.
    pub fn add_notification(&self, notification: NewNotification) -> Uuid {
        let now = self.ctx.clock.now();
        let task = notification.into_task(self.config.default_max_retries, now);
        let id = task.id;

        if task.is_due(now) {
            tracing::info!(task_id = %id, priority = %task.priority, "Notification queued");
            self.ctx.queues.enqueue(task);
        } else {
            tracing::info!(
                task_id = %id,
                scheduled_at = ?task.scheduled_at,
                "Notification scheduled"
            );
            self.ctx.scheduler.defer(task);
        }

        id
    }

    /// Spawn the worker pool and the scheduler loop.
    ///
    /// Must be called from within a Tokio runtime. Does nothing if already running.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            tracing::warn!("Queue manager is already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let workers = (0..self.config.max_workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    self.ctx.clone(),
                    self.config.idle_poll,
                    shutdown.clone(),
                ))
            })
            .collect();
        let scheduler = tokio::spawn(run_scheduler(
            self.ctx.scheduler.clone(),
            self.ctx.queues.clone(),
            self.ctx.clock.clone(),
            self.config.scheduler_interval,
            shutdown.clone(),
        ));

        *pool = Some(RunningPool {
            shutdown,
            workers,
            scheduler,
        });
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(workers = self.config.max_workers, "Queue manager started");
    }

    /// Signal the workers and the scheduler to exit and wait until they have.
    ///
    /// In-flight handler calls are allowed to finish.
    pub async fn stop(&self) {
        let pool = self.pool.lock().take();
        let Some(pool) = pool else {
            tracing::warn!("Queue manager is not running");
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        pool.shutdown.cancel();

        for (worker_id, handle) in pool.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!(worker_id, error = %e, "Worker exited abnormally");
            }
        }
        if let Err(e) = pool.scheduler.await {
            tracing::error!(error = %e, "Scheduler exited abnormally");
        }

        tracing::info!("Queue manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let counts = self.ctx.tracker.counts();
        let workers = self
            .pool
            .lock()
            .as_ref()
            .map_or(0, |pool| pool.workers.len());

        QueueStats {
            queues: self.ctx.queues.depths(),
            scheduled_tasks: self.ctx.scheduler.len(),
            processing_tasks: counts.processing,
            completed_tasks: counts.completed,
            failed_tasks: counts.failed,
            is_running: self.is_running(),
            workers,
        }
    }

    /// Processing, sent and failed tasks, newest first, at most `limit`.
    pub fn get_task_history(&self, limit: usize) -> Vec<NotificationTask> {
        self.ctx.tracker.history(limit)
    }

    /// Find a task wherever it currently lives.
    ///
    /// Each collection is searched while the ones before it stay locked, in
    /// tracker → deferred → queues order, so a task moving between them is
    /// never missed.
    pub fn get_task(&self, task_id: Uuid) -> Option<NotificationTask> {
        let ctx = &self.ctx;
        ctx.tracker.find_or_else(task_id, || {
            ctx.scheduler.find_or_else(task_id, || ctx.queues.find(task_id))
        })
    }

    /// Put a failed task back into its priority queue with a fresh retry budget.
    ///
    /// Returns `false` if `task_id` is not in the failed collection.
    pub fn retry_failed_task(&self, task_id: Uuid) -> bool {
        let requeued = self.ctx.tracker.retry_failed(task_id, |mut task| {
            task.status = TaskStatus::Pending;
            task.retry_count = 0;
            task.last_error = None;
            task.scheduled_at = None;
            self.ctx.queues.enqueue(task);
        });

        if requeued {
            tracing::info!(task_id = %task_id, "Failed task added back to queue");
        } else {
            tracing::warn!(task_id = %task_id, "Failed task not found");
        }
        requeued
    }

    /// Run a single scheduler tick now. Returns the number of tasks promoted.
    pub fn run_scheduler_tick(&self) -> usize {
        self.ctx.scheduler.tick(self.ctx.clock.now(), &self.ctx.queues)
    }

    /// Run a single worker iteration on the caller's task.
    ///
    /// Returns `false` if no task was ready.
    pub async fn run_worker_pass(&self) -> bool {
        self.ctx.run_once().await.is_some()
    }
}

impl Drop for NotificationQueueManager {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.get_mut().take() {
            pool.shutdown.cancel();
        }
    }
}
