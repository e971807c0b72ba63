//! Error types for the tracking pipeline.

use thiserror::Error;

/// Errors that can occur while multiplexing subscriptions.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Malformed address or command payload. Never fatal; reported to the
    /// immediate caller and otherwise swallowed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A collaborator could not be reached at construction time.
    #[error("Connection error ({target}): {reason}")]
    Connection { target: String, reason: String },

    /// Upstream tracking for one address could not be started or maintained.
    #[error("Subscription error for {address}: {reason}")]
    Subscription { address: String, reason: String },

    /// One event could not be delivered to the message bus.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Unexpected decode/logic failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Returns `true` if the error should abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Short tag for metric labels.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Connection { .. } => "connection",
            Self::Subscription { .. } => "subscription",
            Self::Publish(_) => "publish",
            Self::Internal(_) => "internal",
        }
    }
}
