//! Integration tests for the notification queue manager.
//!
//! Deterministic scenarios drive the manager by hand (`run_worker_pass`,
//! `run_scheduler_tick`) against a `ManualClock`; the pool scenarios start real
//! workers with short intervals. No external services are needed:
//!
//! ```bash
//! cargo test -p courier-notifier --test integration
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use courier_common::clock::{Clock, ManualClock};
use courier_common::config::NotifierConfig;
use courier_common::types::{NewNotification, Priority, TaskStatus};
use courier_notifier::NotificationQueueManager;

// ============================================================
// Shared helpers
// ============================================================

/// Manager on a manual clock with the default 60s retry delay.
fn manual_manager() -> (NotificationQueueManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager =
        NotificationQueueManager::with_clock(NotifierConfig::default(), clock.clone()).unwrap();
    (manager, clock)
}

/// Config for a live pool with fast polling.
fn fast_config(max_workers: usize) -> NotifierConfig {
    NotifierConfig {
        max_workers,
        retry_delay: Duration::ZERO,
        scheduler_interval: Duration::from_millis(10),
        idle_poll: Duration::from_millis(5),
        ..Default::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

fn notification(notification_type: &str, title: &str) -> NewNotification {
    NewNotification::new("user-1", notification_type, title, "body")
}

/// Register an `email` handler that records titles in delivery order.
fn record_deliveries(manager: &NotificationQueueManager) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.register_fn("email", move |task| {
        let sink = sink.clone();
        async move {
            sink.lock().push(task.title);
            Ok(true)
        }
    });
    seen
}

// ============================================================
// Ordering
// ============================================================

#[tokio::test]
async fn test_priority_dominates_arrival_order() {
    let (manager, _clock) = manual_manager();
    let seen = record_deliveries(&manager);

    manager.add_notification(notification("email", "low").with_priority(Priority::Low));
    manager.add_notification(notification("email", "urgent").with_priority(Priority::Urgent));
    manager.add_notification(notification("email", "normal").with_priority(Priority::Normal));

    while manager.run_worker_pass().await {}

    assert_eq!(*seen.lock(), vec!["urgent", "normal", "low"]);
    assert_eq!(manager.get_queue_stats().completed_tasks, 3);
}

#[tokio::test]
async fn test_fifo_within_priority() {
    let (manager, _clock) = manual_manager();
    let seen = record_deliveries(&manager);

    manager.add_notification(notification("email", "first").with_priority(Priority::High));
    manager.add_notification(notification("email", "second").with_priority(Priority::High));

    while manager.run_worker_pass().await {}

    assert_eq!(*seen.lock(), vec!["first", "second"]);
}

// ============================================================
// Retry and backoff
// ============================================================

#[tokio::test]
async fn test_retry_ceiling() {
    let (manager, clock) = manual_manager();
    manager.register_fn("email", |_| async { Ok(false) });

    let id = manager.add_notification(notification("email", "doomed").with_max_retries(2));

    // Attempt 1 fails → retry in 60s
    assert!(manager.run_worker_pass().await);
    let task = manager.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Retry);
    assert_eq!(task.retry_count, 1);

    clock.advance(Duration::from_secs(60));
    assert_eq!(manager.run_scheduler_tick(), 1);

    // Attempt 2 fails → ceiling reached
    assert!(manager.run_worker_pass().await);
    let task = manager.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.last_error.as_deref(), Some("Handler returned false"));

    let stats = manager.get_queue_stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.scheduled_tasks, 0);
    assert_eq!(stats.queues.total(), 0);
}

#[tokio::test]
async fn test_backoff_scales_with_attempt() {
    let (manager, clock) = manual_manager();
    manager.register_fn("email", |_| async { Err(anyhow::anyhow!("smtp unavailable")) });

    let t0 = clock.now();
    let id = manager.add_notification(notification("email", "flaky"));

    manager.run_worker_pass().await;
    let task = manager.get_task(id).unwrap();
    assert_eq!(task.scheduled_at, Some(t0 + TimeDelta::seconds(60)));
    assert_eq!(task.last_error.as_deref(), Some("Handler error: smtp unavailable"));

    // Not due yet
    clock.advance(Duration::from_secs(59));
    assert_eq!(manager.run_scheduler_tick(), 0);
    assert!(!manager.run_worker_pass().await);

    clock.advance(Duration::from_secs(1));
    assert_eq!(manager.run_scheduler_tick(), 1);
    let t1 = clock.now();

    manager.run_worker_pass().await;
    let task = manager.get_task(id).unwrap();
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.scheduled_at, Some(t1 + TimeDelta::seconds(120)));
}

// ============================================================
// Deferred delivery
// ============================================================

#[tokio::test]
async fn test_deferred_task_invisible_until_tick() {
    let (manager, clock) = manual_manager();
    let deadline = clock.now() + TimeDelta::seconds(5);
    let id = manager.add_notification(notification("email", "later").scheduled_at(deadline));

    let stats = manager.get_queue_stats();
    assert_eq!(stats.queues.total(), 0);
    assert_eq!(stats.scheduled_tasks, 1);

    assert_eq!(manager.run_scheduler_tick(), 0);
    clock.advance(Duration::from_secs(4));
    assert_eq!(manager.run_scheduler_tick(), 0);
    assert_eq!(manager.get_queue_stats().queues.total(), 0);

    // Deadline reached but no tick yet
    clock.advance(Duration::from_secs(1));
    assert_eq!(manager.get_queue_stats().queues.total(), 0);

    assert_eq!(manager.run_scheduler_tick(), 1);
    let stats = manager.get_queue_stats();
    assert_eq!(stats.queues.normal, 1);
    assert_eq!(stats.scheduled_tasks, 0);
    assert_eq!(
        manager.get_task(id).map(|t| t.status),
        Some(TaskStatus::Pending)
    );
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn test_unregistered_type_fails_immediately() {
    let (manager, _clock) = manual_manager();
    let id = manager.add_notification(notification("sms", "nobody listens"));

    assert!(manager.run_worker_pass().await);

    let stats = manager.get_queue_stats();
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.scheduled_tasks, 0);

    let task = manager.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert_eq!(
        task.last_error.as_deref(),
        Some("No handler registered for notification type: sms")
    );
}

#[tokio::test]
async fn test_manual_retry_of_failed_task() {
    let (manager, _clock) = manual_manager();
    manager.register_fn("email", |_| async { Ok(false) });

    let id = manager.add_notification(notification("email", "retry me").with_max_retries(1));
    manager.run_worker_pass().await;
    assert_eq!(manager.get_task(id).map(|t| t.retry_count), Some(1));

    assert!(manager.retry_failed_task(id));

    let stats = manager.get_queue_stats();
    assert_eq!(stats.queues.normal, 1);
    assert_eq!(stats.failed_tasks, 0);

    let task = manager.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert!(task.last_error.is_none());

    // Not in the failed collection any more
    assert!(!manager.retry_failed_task(id));
}

#[tokio::test]
async fn test_manual_retry_unknown_id_has_no_effect() {
    let (manager, _clock) = manual_manager();
    manager.add_notification(notification("sms", "fails"));
    manager.run_worker_pass().await;

    let before = manager.get_queue_stats();
    assert!(!manager.retry_failed_task(Uuid::new_v4()));
    assert_eq!(manager.get_queue_stats(), before);
}

#[tokio::test]
async fn test_history_newest_first() {
    let (manager, clock) = manual_manager();
    manager.register_fn("email", |_| async { Ok(true) });

    for title in ["one", "two", "three"] {
        manager.add_notification(notification("email", title));
        clock.advance(Duration::from_secs(1));
    }
    manager.add_notification(notification("sms", "four"));
    while manager.run_worker_pass().await {}

    let titles: Vec<String> = manager
        .get_task_history(10)
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["four", "three", "two", "one"]);

    assert_eq!(manager.get_task_history(2).len(), 2);
}

// ============================================================
// Live worker pool
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_ownership_under_concurrency() {
    let manager = NotificationQueueManager::new(fast_config(4)).unwrap();

    let in_flight = Arc::new(Mutex::new(HashSet::<Uuid>::new()));
    let deliveries = Arc::new(Mutex::new(HashMap::<Uuid, usize>::new()));
    let violations = Arc::new(AtomicUsize::new(0));
    {
        let in_flight = in_flight.clone();
        let deliveries = deliveries.clone();
        let violations = violations.clone();
        manager.register_fn("email", move |task| {
            let in_flight = in_flight.clone();
            let deliveries = deliveries.clone();
            let violations = violations.clone();
            async move {
                if !in_flight.lock().insert(task.id) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                *deliveries.lock().entry(task.id).or_default() += 1;
                in_flight.lock().remove(&task.id);
                Ok(true)
            }
        });
    }

    manager.start();
    let priorities = Priority::DESCENDING;
    for i in 0..40 {
        manager.add_notification(
            notification("email", &format!("n{i}")).with_priority(priorities[i % 4]),
        );
    }

    wait_until(|| manager.get_queue_stats().completed_tasks == 40).await;
    manager.stop().await;

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 40);
    assert!(deliveries.values().all(|&count| count == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_always_findable_while_moving() {
    let config = NotifierConfig {
        default_max_retries: 15,
        scheduler_interval: Duration::from_millis(1),
        idle_poll: Duration::from_millis(1),
        ..fast_config(3)
    };
    let manager = NotificationQueueManager::new(config).unwrap();
    manager.register_fn("email", |_| async { Ok(false) });

    manager.start();
    let ids: Vec<Uuid> = (0..6)
        .map(|i| manager.add_notification(notification("email", &format!("n{i}"))))
        .collect();

    // Tasks cycle queue → processing → deferred until their retries run out;
    // every lookup along the way must find them.
    let mut lookups = 0usize;
    tokio::time::timeout(Duration::from_secs(10), async {
        while manager.get_queue_stats().failed_tasks < ids.len() {
            for id in &ids {
                assert!(manager.get_task(*id).is_some(), "task {id} not found");
                lookups += 1;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("tasks did not fail within 10s");
    manager.stop().await;

    assert!(lookups > 0);
    for id in &ids {
        assert_eq!(manager.get_task(*id).map(|t| t.retry_count), Some(15));
    }
}

#[tokio::test]
async fn test_pool_retries_until_failed() {
    let config = NotifierConfig {
        default_max_retries: 2,
        ..fast_config(2)
    };
    let manager = NotificationQueueManager::new(config).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        manager.register_fn("email", move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(false)
            }
        });
    }

    manager.start();
    let id = manager.add_notification(notification("email", "always fails"));
    wait_until(|| manager.get_queue_stats().failed_tasks == 1).await;
    manager.stop().await;

    let task = manager.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stop_lets_in_flight_handler_finish() {
    let manager = NotificationQueueManager::new(fast_config(1)).unwrap();
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = finished.clone();
        manager.register_fn("email", move |_| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.store(true, Ordering::SeqCst);
                Ok(true)
            }
        });
    }

    manager.start();
    manager.add_notification(notification("email", "slow"));
    wait_until(|| manager.get_queue_stats().processing_tasks == 1).await;

    manager.stop().await;

    assert!(finished.load(Ordering::SeqCst));
    let stats = manager.get_queue_stats();
    assert_eq!(stats.completed_tasks, 1);
    assert!(!stats.is_running);
    assert_eq!(stats.workers, 0);
}

#[tokio::test]
async fn test_scheduled_task_delivered_by_live_pool() {
    let manager = NotificationQueueManager::new(fast_config(2)).unwrap();
    let seen = record_deliveries(&manager);

    manager.start();
    manager.add_notification(
        notification("email", "soon").scheduled_at(Utc::now() + TimeDelta::milliseconds(200)),
    );
    assert_eq!(manager.get_queue_stats().scheduled_tasks, 1);

    wait_until(|| manager.get_queue_stats().completed_tasks == 1).await;
    manager.stop().await;

    assert_eq!(*seen.lock(), vec!["soon"]);
}
