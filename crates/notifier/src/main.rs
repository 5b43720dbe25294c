use std::time::Duration;

use chrono::{TimeDelta, Utc};

use courier_common::config::NotifierConfig;
use courier_common::types::{NewNotification, Priority};
use courier_notifier::NotificationQueueManager;
use courier_notifier::handlers::{LoggingHandler, WebhookHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier notifier starting...");

    // Load configuration
    let config = NotifierConfig::from_env()?;
    let webhook_url = config.webhook_url.clone();
    let manager = NotificationQueueManager::new(config)?;

    manager.register_handler("websocket", LoggingHandler::new("websocket"));
    manager.register_handler("email", LoggingHandler::new("email"));
    if let Some(url) = webhook_url {
        manager.register_handler("webhook", WebhookHandler::new(url));
    }

    manager.start();

    manager.add_notification(
        NewNotification::new(
            "1",
            "websocket",
            "Test notification",
            "This is a test notification.",
        )
        .with_priority(Priority::High),
    );
    manager.add_notification(
        NewNotification::new(
            "2",
            "email",
            "Scheduled notification",
            "This is a scheduled notification.",
        )
        .scheduled_at(Utc::now() + TimeDelta::seconds(30)),
    );

    // Report stats until Ctrl+C
    let mut report = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = report.tick() => {
                let stats = serde_json::to_string(&manager.get_queue_stats())?;
                tracing::info!(stats = %stats, "Queue stats");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    manager.stop().await;

    tracing::info!("Courier notifier stopped.");
    Ok(())
}
