//! `EventPublisher` trait — abstraction over the message bus.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::TrackerError;
use crate::event::EventNotification;

/// A lazy sequence of raw command payloads from the command channel.
pub type CommandStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Abstracts over the downstream pub/sub transport.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one enriched event to the message bus.
    async fn publish(&self, notification: &EventNotification) -> Result<(), TrackerError>;

    /// Start consuming raw command payloads from the command channel.
    async fn subscribe_commands(&self) -> Result<CommandStream, TrackerError>;

    /// Release bus resources. Safe to call once at shutdown.
    async fn close(&self) -> Result<(), TrackerError>;
}
