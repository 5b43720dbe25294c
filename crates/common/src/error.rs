use std::time::Duration;

use thiserror::Error;

/// Errors produced while dispatching a notification.
///
/// The `Display` text of the error that ended a delivery attempt is what gets
/// stored in the task's `last_error`.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("No handler registered for notification type: {0}")]
    HandlerNotRegistered(String),

    #[error("Handler returned false")]
    HandlerRejected,

    #[error("Handler error: {0}")]
    HandlerFailed(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifierError {
    /// Whether a failure of this kind consumes a retry attempt.
    ///
    /// A missing handler fails the task immediately; everything raised by or
    /// around the handler call is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            NotifierError::HandlerNotRegistered(_) | NotifierError::Config(_)
        )
    }
}
