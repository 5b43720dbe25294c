//! Handler registry: maps a notification type to its delivery handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use courier_common::types::NotificationTask;

/// Trait that every delivery backend must implement.
///
/// Returning `Ok(true)` means the notification was delivered. `Ok(false)` and
/// `Err(_)` are both treated as a failed attempt.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn deliver(&self, task: &NotificationTask) -> anyhow::Result<bool>;
}

/// Adapter turning an async closure into a [`NotificationHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure taking an owned task snapshot.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(NotificationTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> NotificationHandler for FnHandler<F>
where
    F: Fn(NotificationTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn deliver(&self, task: &NotificationTask) -> anyhow::Result<bool> {
        (self.f)(task.clone()).await
    }
}

/// Read-mostly registry of delivery handlers, keyed by notification type.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn NotificationHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler, replacing any previous handler for the same type.
    pub fn register(
        &self,
        notification_type: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        let notification_type = notification_type.into();
        let replaced = self
            .handlers
            .write()
            .insert(notification_type.clone(), handler)
            .is_some();

        tracing::info!(
            notification_type = %notification_type,
            replaced,
            "Registered handler for notification type"
        );
    }

    /// Resolve the handler for a notification type.
    pub fn get(&self, notification_type: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.read().get(notification_type).cloned()
    }

    pub fn contains(&self, notification_type: &str) -> bool {
        self.handlers.read().contains_key(notification_type)
    }

    /// Registered notification types, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::types::NewNotification;

    fn make_task() -> NotificationTask {
        NewNotification::new("1", "email", "t", "m").into_task(3, Utc::now())
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        registry.register("email", Arc::new(handler_fn(|_| async { Ok(true) })));

        assert!(registry.contains("email"));
        assert!(!registry.contains("sms"));
        assert!(registry.get("sms").is_none());

        let handler = registry.get("email").unwrap();
        assert!(handler.deliver(&make_task()).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let registry = HandlerRegistry::new();
        registry.register("email", Arc::new(handler_fn(|_| async { Ok(true) })));
        registry.register("email", Arc::new(handler_fn(|_| async { Ok(false) })));

        assert_eq!(registry.types(), vec!["email".to_string()]);
        let handler = registry.get("email").unwrap();
        assert!(!handler.deliver(&make_task()).await.unwrap());
    }

    #[tokio::test]
    async fn test_closure_sees_task() {
        let registry = HandlerRegistry::new();
        registry.register(
            "email",
            Arc::new(handler_fn(|task: NotificationTask| async move {
                Ok(task.recipient_id == "1")
            })),
        );
        let handler = registry.get("email").unwrap();
        assert!(handler.deliver(&make_task()).await.unwrap());
    }
}
