//! Notification dispatch core.
//!
//! Accepts notification requests, holds them in four priority queues (or in the
//! deferred scheduler when they carry a future delivery time), and delivers them
//! through per-type handlers on a fixed pool of Tokio workers. Failed attempts
//! are retried with linear backoff up to the task's retry ceiling.
//!
//! Delivery status: pending → processing → sent | retry → pending | failed.
//! Everything is in memory; nothing survives a restart.

pub mod handlers;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod tracker;

pub use manager::{NotificationQueueManager, QueueStats};
pub use registry::{NotificationHandler, handler_fn};
