//! Priority queue set: four FIFO queues, one per priority level.
//!
//! `dequeue_ready` always scans from `Urgent` down to `Low` and never blocks,
//! so a worker polling an empty set can't stall the other priorities. Each
//! enqueue also wakes one idle worker through a `Notify`, which cuts dispatch
//! latency without changing the priority scan.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use uuid::Uuid;

use courier_common::types::{NotificationTask, Priority};

/// Number of tasks waiting at each priority level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }
}

/// Four unbounded FIFO queues behind a single lock.
pub struct PriorityQueueSet {
    queues: Mutex<[VecDeque<NotificationTask>; 4]>,
    notify: Notify,
}

impl PriorityQueueSet {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Default::default()),
            notify: Notify::new(),
        }
    }

    /// Append a task to the queue matching its priority. Never blocks.
    pub fn enqueue(&self, task: NotificationTask) {
        let slot = task.priority.index();
        self.queues.lock()[slot].push_back(task);
        self.notify.notify_one();
    }

    /// Pop the head of the highest-priority non-empty queue.
    ///
    /// The pop happens under the lock, so exactly one caller ever receives a
    /// given task.
    pub fn dequeue_ready(&self) -> Option<NotificationTask> {
        let mut queues = self.queues.lock();
        Priority::DESCENDING
            .iter()
            .find_map(|priority| queues[priority.index()].pop_front())
    }

    /// Resolves once a task has been enqueued since the last wakeup.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub fn depths(&self) -> QueueDepths {
        let queues = self.queues.lock();
        QueueDepths {
            urgent: queues[Priority::Urgent.index()].len(),
            high: queues[Priority::High.index()].len(),
            normal: queues[Priority::Normal.index()].len(),
            low: queues[Priority::Low.index()].len(),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a queued task, if present.
    pub fn find(&self, task_id: Uuid) -> Option<NotificationTask> {
        self.queues
            .lock()
            .iter()
            .flat_map(|queue| queue.iter())
            .find(|task| task.id == task_id)
            .cloned()
    }
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self::new()
    }
}
