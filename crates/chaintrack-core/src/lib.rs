//! chaintrack-core — subscription multiplexer for ChainTrack.
//!
//! # Overview
//!
//! ChainTrack tracks a dynamic set of Solana account addresses on behalf of
//! many downstream subscribers, keeping exactly one upstream subscription
//! per address regardless of how many subscribers asked for it, and
//! republishes each observed event annotated with the subscriber list. The
//! core crate defines:
//!
//! - [`WalletTracker`] — the registry + tracking controller + command loop
//! - [`AccountEventSource`] / [`EventPublisher`] — collaborator seams
//! - [`AccountEvent`] / [`EventNotification`] / [`WalletCommand`] — wire types
//! - [`TrackerError`] — structured error type
//! - [`validate_address`] — Solana address validation
//!
//! Concrete collaborators live in `chaintrack-solana` (upstream WebSocket
//! feed) and `chaintrack-redis` (pub/sub bus).

pub mod address;
pub mod error;
pub mod event;
pub mod publisher;
pub mod registry;
pub mod source;
pub mod tracker;

pub use address::{validate_address, AddressError};
pub use error::TrackerError;
pub use event::{AccountEvent, EventNotification, WalletCommand};
pub use publisher::{CommandStream, EventPublisher};
pub use source::{AccountEventSource, AccountEventStream};
pub use tracker::{RetryConfig, WalletTracker};
