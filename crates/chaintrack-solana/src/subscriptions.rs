//! WebSocket subscription management.
//!
//! Tracks active `accountSubscribe` subscriptions by their server-assigned
//! ID, turns `accountNotification` messages into [`AccountEvent`]s for the
//! right per-address channel, and hands back the live set so the client can
//! re-subscribe after a reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::channel::mpsc;

use chaintrack_core::{AccountEvent, TrackerError};

/// Sender half of a per-address event channel.
pub type EventSender = mpsc::UnboundedSender<Result<AccountEvent, TrackerError>>;

struct SubscriptionEntry {
    address: String,
    sender: EventSender,
}

/// Manages active account subscriptions and supports re-subscription.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<u64, SubscriptionEntry>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription under its server-assigned ID.
    pub fn register(&self, id: u64, address: String, sender: EventSender) {
        self.entries
            .lock()
            .unwrap()
            .insert(id, SubscriptionEntry { address, sender });
    }

    /// Forward a slot notification to the matching per-address channel.
    ///
    /// Returns `false` for an unknown subscription ID (e.g. a notification
    /// racing an unsubscribe).
    pub fn dispatch_slot(&self, id: u64, slot: u64) -> bool {
        let entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get(&id) else {
            return false;
        };
        let event = AccountEvent {
            signature: None,
            timestamp: Utc::now(),
            from_addr: Some(entry.address.clone()),
            to_addr: None,
            amount: None,
            slot_number: slot,
        };
        let _ = entry.sender.unbounded_send(Ok(event));
        true
    }

    /// Remove a subscription (e.g. after `accountUnsubscribe`).
    pub fn remove(&self, id: &u64) {
        self.entries.lock().unwrap().remove(id);
    }

    /// Take every live (address, sender) pair, clearing the ID map.
    /// Used to re-subscribe after reconnect: the server will assign new IDs.
    pub fn drain_active(&self) -> Vec<(String, EventSender)> {
        self.entries
            .lock()
            .unwrap()
            .drain()
            .map(|(_, e)| (e.address, e.sender))
            .collect()
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
