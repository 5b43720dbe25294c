use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch priority. Declaration order is the total order: `Urgent` is highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// All levels in dequeue order, highest first.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Stable slot index (`Low` = 0 .. `Urgent` = 3).
    pub fn index(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Delivery state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in a priority queue or in the deferred set.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Delivered. Terminal.
    Sent,
    /// Retries exhausted or no handler. Terminal until manually retried.
    Failed,
    /// Waiting out a backoff in the deferred set.
    Retry,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Sent => write!(f, "sent"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Retry => write!(f, "retry"),
        }
    }
}

/// One notification request and its delivery state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTask {
    pub id: Uuid,
    /// Opaque identifier of the target user or entity
    pub recipient_id: String,
    /// Key used to resolve the delivery handler (e.g., "websocket", "email")
    pub notification_type: String,
    pub title: String,
    pub message: String,
    /// Arbitrary payload handed to the handler untouched
    pub data: serde_json::Value,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Not eligible for dispatch before this instant. Moved forward on each retry.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl NotificationTask {
    /// Whether the task may be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Whether the retry ceiling has been reached.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Parameters for a new notification.
///
/// Only the recipient, type, title and message are required; everything else
/// has a default.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub priority: Priority,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Overrides the configured default retry ceiling
    pub max_retries: Option<u32>,
}

impl NewNotification {
    pub fn new(
        recipient_id: impl Into<String>,
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            data: serde_json::json!({}),
            priority: Priority::Normal,
            scheduled_at: None,
            max_retries: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Build a fresh `Pending` task with a new unique id.
    pub fn into_task(self, default_max_retries: u32, now: DateTime<Utc>) -> NotificationTask {
        NotificationTask {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            data: self.data,
            priority: self.priority,
            status: TaskStatus::Pending,
            created_at: now,
            scheduled_at: self.scheduled_at,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::DESCENDING[0], Priority::Urgent);
        assert_eq!(Priority::DESCENDING[3], Priority::Low);
    }

    #[test]
    fn test_new_notification_defaults() {
        let now = Utc::now();
        let task = NewNotification::new("42", "email", "Hello", "World").into_task(3, now);
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.created_at, now);
        assert_eq!(task.data, serde_json::json!({}));
        assert!(task.last_error.is_none());
        assert!(task.is_due(now));
    }

    #[test]
    fn test_ids_are_unique() {
        let now = Utc::now();
        let a = NewNotification::new("1", "email", "a", "a").into_task(3, now);
        let b = NewNotification::new("1", "email", "a", "a").into_task(3, now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_is_due_respects_schedule() {
        let now = Utc::now();
        let task = NewNotification::new("1", "email", "t", "m")
            .scheduled_at(now + TimeDelta::seconds(5))
            .into_task(3, now);
        assert!(!task.is_due(now));
        assert!(task.is_due(now + TimeDelta::seconds(5)));
    }

    #[test]
    fn test_task_serializes_lowercase_enums() {
        let task = NewNotification::new("7", "websocket", "t", "m")
            .with_priority(Priority::Urgent)
            .with_max_retries(1)
            .into_task(3, Utc::now());
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["priority"], "urgent");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["max_retries"], 1);
    }
}
