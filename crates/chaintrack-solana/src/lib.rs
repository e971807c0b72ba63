//! chaintrack-solana — Solana WebSocket account feed with auto-reconnect.
//!
//! # Features
//! - One WebSocket connection multiplexing every `accountSubscribe`
//! - Auto-reconnect on disconnect (exponential backoff)
//! - Auto-resubscribe of live account subscriptions after reconnect
//! - `accountUnsubscribe` issued when a per-address stream is dropped

pub mod client;
pub mod subscriptions;

pub use client::{Commitment, SolanaWsClient, SolanaWsConfig};
pub use subscriptions::SubscriptionManager;
