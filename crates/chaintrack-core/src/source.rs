//! `AccountEventSource` trait — abstraction over the upstream chain node.
//!
//! The concrete implementation (chaintrack-solana) multiplexes all
//! per-address subscriptions over one WebSocket connection; the tracker
//! only sees one lazy event stream per address.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::TrackerError;
use crate::event::AccountEvent;

/// A per-address stream of raw account events. Infinite until cancelled
/// (dropping the stream releases the upstream subscription) or the
/// source errors.
pub type AccountEventStream =
    Pin<Box<dyn Stream<Item = Result<AccountEvent, TrackerError>> + Send>>;

/// Abstracts over the upstream real-time event feed.
#[async_trait]
pub trait AccountEventSource: Send + Sync {
    /// Open an upstream subscription for one address and start streaming
    /// its account changes.
    async fn subscribe(&self, address: &str) -> Result<AccountEventStream, TrackerError>;

    /// Release all upstream resources. Safe to call once at shutdown.
    async fn close(&self) -> Result<(), TrackerError>;
}
