// ABOUTME: Error types for event publication and correlation
// ABOUTME: Covers invalid events, closed streams and cancelled listeners

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Event stream closed before the listener was satisfied")]
    Closed,

    #[error("Listener cancelled")]
    Cancelled,

    #[error("Failed to publish event: {0}")]
    PublishFailed(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EventError>;
