use std::time::Duration;

use serde::Deserialize;

use crate::error::NotifierError;

/// Default number of concurrent delivery workers.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Default linear backoff base between retries, in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Default interval between scheduler ticks, in seconds.
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 10;

/// Default idle wait of a worker that found no ready task, in milliseconds.
pub const DEFAULT_IDLE_POLL_MS: u64 = 1000;

/// Default retry ceiling for new notifications.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cap on each of the completed and failed history collections.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Notifier configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Number of concurrent delivery workers (default: 5)
    pub max_workers: usize,

    /// Backoff base; retry N is scheduled `retry_delay * N` after the failure (default: 60s)
    pub retry_delay: Duration,

    /// How often the scheduler promotes due tasks into the priority queues
    /// (default: 10s, must be non-zero)
    pub scheduler_interval: Duration,

    /// How long an idle worker waits before polling the queues again
    /// (default: 1s, must be non-zero)
    pub idle_poll: Duration,

    /// Retry ceiling applied to notifications that don't set their own (default: 3)
    pub default_max_retries: u32,

    /// Maximum number of tasks kept in each of the completed and failed collections
    /// (default: 1000, must be at least 1)
    pub history_limit: usize,

    /// Upper bound on a single handler invocation. `None` leaves handlers unbounded.
    pub handler_timeout: Option<Duration>,

    /// Optional webhook endpoint registered by the demo binary
    pub webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            scheduler_interval: Duration::from_secs(DEFAULT_SCHEDULER_INTERVAL_SECS),
            idle_poll: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
            default_max_retries: DEFAULT_MAX_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            handler_timeout: None,
            webhook_url: None,
        }
    }
}

impl NotifierConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let handler_timeout = match std::env::var("NOTIFIER_HANDLER_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(parse_var(
                "NOTIFIER_HANDLER_TIMEOUT_SECS",
                &raw,
            )?)),
            Err(_) => None,
        };

        let config = Self {
            max_workers: env_or("NOTIFIER_MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            retry_delay: Duration::from_secs(env_or(
                "NOTIFIER_RETRY_DELAY_SECS",
                DEFAULT_RETRY_DELAY_SECS,
            )?),
            scheduler_interval: Duration::from_secs(env_or(
                "NOTIFIER_SCHEDULER_INTERVAL_SECS",
                DEFAULT_SCHEDULER_INTERVAL_SECS,
            )?),
            idle_poll: Duration::from_millis(env_or(
                "NOTIFIER_IDLE_POLL_MS",
                DEFAULT_IDLE_POLL_MS,
            )?),
            default_max_retries: env_or("NOTIFIER_DEFAULT_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            history_limit: env_or("NOTIFIER_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            handler_timeout,
            webhook_url: std::env::var("NOTIFIER_WEBHOOK_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatch loops cannot run with.
    pub fn validate(&self) -> Result<(), NotifierError> {
        if self.max_workers == 0 {
            return Err(NotifierError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        // A zero period would panic the scheduler's interval timer.
        if self.scheduler_interval.is_zero() {
            return Err(NotifierError::Config(
                "scheduler_interval must be non-zero".to_string(),
            ));
        }
        // A zero idle poll turns an idle worker into a busy loop.
        if self.idle_poll.is_zero() {
            return Err(NotifierError::Config("idle_poll must be non-zero".to_string()));
        }
        if self.history_limit == 0 {
            return Err(NotifierError::Config(
                "history_limit must be at least 1".to_string(),
            ));
        }
        if self.handler_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(NotifierError::Config(
                "handler_timeout must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read `key`, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => parse_var(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{key} must be a valid {}, got {raw:?}",
            std::any::type_name::<T>()
        )
    })
}
