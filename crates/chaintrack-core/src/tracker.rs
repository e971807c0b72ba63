//! The wallet tracker — subscription registry, per-address task lifecycle,
//! command processing, and graceful shutdown.
//!
//! # Architecture
//! ```text
//! command channel ──▶ run_command_loop ──▶ add / remove
//!                                             │
//!                                             ▼ (write lock)
//!                            HashMap<address, TrackedWallet>
//!                                             │
//!                              one RelayTask per tracked address
//!                                             │ (read lock per event)
//!                                             ▼
//!                             EventPublisher::publish(notification)
//! ```
//!
//! The map is the only state shared between tasks. `add`/`remove`/`shutdown`
//! take the write lock; relay tasks take the read lock once per event to
//! snapshot the subscriber set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use chaintrack_observability::TrackerMetrics;

use crate::address::validate_address;
use crate::error::TrackerError;
use crate::event::{EventNotification, WalletCommand};
use crate::publisher::{CommandStream, EventPublisher};
use crate::registry::{TrackedWallet, TrackingHandle};
use crate::source::{AccountEventSource, AccountEventStream};

/// Backoff policy for upstream re-subscribes after a stream loss.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First wait before a re-subscribe attempt.
    pub initial: Duration,
    /// Backoff ceiling.
    pub max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
        }
    }
}

type WalletMap = Arc<RwLock<HashMap<String, TrackedWallet>>>;

/// The subscription multiplexer.
///
/// Owns the address → subscribers mapping, keeps exactly one upstream
/// subscription per tracked address, and republishes observed events with
/// the subscriber list current at relay time.
pub struct WalletTracker {
    source: Arc<dyn AccountEventSource>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<TrackerMetrics>,
    wallets: WalletMap,
    retry: RetryConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl WalletTracker {
    pub fn new(
        source: Arc<dyn AccountEventSource>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<TrackerMetrics>,
        retry: RetryConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            source,
            publisher,
            metrics,
            wallets: Arc::new(RwLock::new(HashMap::new())),
            retry,
            shutdown_tx,
        }
    }

    /// Register `subscriber_id`'s interest in `address`.
    ///
    /// The first subscriber for an address starts its upstream tracking
    /// before this returns; if that fails, no trace of the address remains.
    /// Re-adding a present subscriber is a no-op success.
    pub async fn add(&self, address: &str, subscriber_id: i64) -> Result<(), TrackerError> {
        if address.is_empty() {
            return Err(TrackerError::Validation("empty address".into()));
        }

        let mut wallets = self.wallets.write().await;

        if let Some(wallet) = wallets.get_mut(address) {
            wallet.chat_ids.insert(subscriber_id);
            info!(
                address,
                subscriber_id,
                total_subscribers = wallet.chat_ids.len(),
                "added subscriber to tracked wallet"
            );
            return Ok(());
        }

        // New address. The write guard is held across the upstream
        // subscribe, so a concurrent add for the same address observes
        // either no entry or a fully started one.
        let handle = self.start_tracking(address).await?;

        let mut chat_ids = BTreeSet::new();
        chat_ids.insert(subscriber_id);
        wallets.insert(address.to_string(), TrackedWallet { chat_ids, handle });

        self.metrics.wallet_started();
        info!(address, subscriber_id, "started tracking wallet");
        Ok(())
    }

    /// Withdraw `subscriber_id`'s interest in `address`.
    ///
    /// Removing an unknown address or absent subscriber is a no-op success.
    /// The last removal cancels the relay task and deletes the entry in the
    /// same critical section.
    pub async fn remove(&self, address: &str, subscriber_id: i64) -> Result<(), TrackerError> {
        let mut wallets = self.wallets.write().await;

        let Some(wallet) = wallets.get_mut(address) else {
            return Ok(());
        };

        wallet.chat_ids.remove(&subscriber_id);
        let remaining = wallet.chat_ids.len();

        if remaining == 0 {
            if let Some(removed) = wallets.remove(address) {
                removed.handle.cancel();
                self.metrics.wallet_stopped();
                info!(address, "removed wallet tracking completely");
            }
        } else {
            info!(
                address,
                subscriber_id,
                remaining_subscribers = remaining,
                "removed subscriber from wallet"
            );
        }

        Ok(())
    }

    /// Decode one command payload and apply it.
    pub async fn process_command(&self, payload: &str) -> Result<(), TrackerError> {
        let cmd: WalletCommand = serde_json::from_str(payload).map_err(|e| {
            self.metrics.record_command_error("decode", "json");
            TrackerError::Validation(format!("bad command payload: {e}"))
        })?;

        let result = match cmd.action.as_str() {
            "add" => {
                if let Err(e) = validate_address(&cmd.address) {
                    self.metrics.record_command_error("add", "address");
                    return Err(TrackerError::Validation(format!(
                        "address {:?}: {e}",
                        cmd.address
                    )));
                }
                self.add(&cmd.address, cmd.subscriber_id).await
            }
            "remove" => self.remove(&cmd.address, cmd.subscriber_id).await,
            other => {
                self.metrics.record_command_error(other, "unknown_action");
                return Err(TrackerError::Validation(format!(
                    "unknown command action: {other:?}"
                )));
            }
        };

        match result {
            Ok(()) => {
                self.metrics.record_command(&cmd.action);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_command_error(&cmd.action, e.label());
                Err(e)
            }
        }
    }

    /// Consume the command channel until it closes or shutdown fires.
    ///
    /// Commands are processed one at a time; failures are logged and the
    /// loop continues.
    pub async fn run_command_loop(&self, mut commands: CommandStream) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("command loop stopping");
                    return;
                }
                payload = commands.next() => match payload {
                    None => {
                        warn!("command channel closed");
                        return;
                    }
                    Some(payload) => {
                        if let Err(e) = self.process_command(&payload).await {
                            error!(error = %e, "failed to process command");
                        }
                    }
                }
            }
        }
    }

    /// Stop everything: cancel all relay tasks, wait for them to exit,
    /// then close both collaborators.
    ///
    /// Both closes are attempted; the first error is returned.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        let _ = self.shutdown_tx.send(true);

        let drained: Vec<(String, TrackedWallet)> = {
            let mut wallets = self.wallets.write().await;
            wallets.drain().collect()
        };

        // Cancel all before waiting on any: teardown is parallel, not serial.
        for (_, wallet) in &drained {
            wallet.handle.cancel();
        }
        for (address, wallet) in drained {
            wallet.handle.wait().await;
            self.metrics.wallet_stopped();
            debug!(%address, "relay task stopped");
        }

        // Tasks are gone; nothing is mid-send when the collaborators close.
        let source_result = self.source.close().await;
        if let Err(e) = &source_result {
            error!(error = %e, "failed to close event source");
        }
        let publisher_result = self.publisher.close().await;
        if let Err(e) = &publisher_result {
            error!(error = %e, "failed to close publisher");
        }

        info!("tracker shut down");
        source_result.and(publisher_result)
    }

    /// Number of currently tracked addresses.
    pub async fn tracked_wallets(&self) -> usize {
        self.wallets.read().await.len()
    }

    async fn start_tracking(&self, address: &str) -> Result<TrackingHandle, TrackerError> {
        let stream = self.source.subscribe(address).await?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let relay = RelayTask {
            address: address.to_string(),
            wallets: Arc::clone(&self.wallets),
            source: Arc::clone(&self.source),
            publisher: Arc::clone(&self.publisher),
            metrics: Arc::clone(&self.metrics),
            retry: self.retry.clone(),
        };
        let task = tokio::spawn(relay.run(stream, cancel_rx));

        Ok(TrackingHandle::new(cancel_tx, task))
    }
}

/// Per-address relay: consumes the upstream stream, snapshots the
/// subscriber set, and forwards enriched events downstream.
struct RelayTask {
    address: String,
    wallets: WalletMap,
    source: Arc<dyn AccountEventSource>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<TrackerMetrics>,
    retry: RetryConfig,
}

impl RelayTask {
    async fn run(self, mut stream: AccountEventStream, mut cancel_rx: watch::Receiver<bool>) {
        let address = self.address.as_str();
        let mut backoff = self.retry.initial;

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    debug!(address, "relay cancelled");
                    return;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        backoff = self.retry.initial;
                        let start = Instant::now();

                        let chat_ids = {
                            let wallets = self.wallets.read().await;
                            match wallets.get(address) {
                                // Raced with removal; stop without sending.
                                None => return,
                                Some(w) => w.chat_ids.iter().copied().collect::<Vec<i64>>(),
                            }
                        };

                        let note = EventNotification::new(event, chat_ids);
                        match self.publisher.publish(&note).await {
                            Ok(()) => {
                                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                                self.metrics.record_relayed(address, latency_ms);
                                debug!(
                                    address,
                                    slot = note.event.slot_number,
                                    fanout = note.chat_ids.len(),
                                    "event relayed"
                                );
                            }
                            Err(e) => {
                                // One dropped event must not stop tracking.
                                self.metrics.record_publish_error(address);
                                error!(address, error = %e, "failed to publish event");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(address, error = %e, "upstream stream error");
                        match self.resubscribe(&mut cancel_rx, &mut backoff).await {
                            Some(next) => stream = next,
                            None => return,
                        }
                    }
                    None => {
                        warn!(address, "upstream stream ended");
                        match self.resubscribe(&mut cancel_rx, &mut backoff).await {
                            Some(next) => stream = next,
                            None => return,
                        }
                    }
                }
            }
        }
    }

    /// Re-open the upstream subscription with exponential backoff.
    ///
    /// Returns `None` once cancelled or the address is no longer tracked.
    async fn resubscribe(
        &self,
        cancel_rx: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> Option<AccountEventStream> {
        let address = self.address.as_str();

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => return None,
                () = tokio::time::sleep(*backoff) => {}
            }

            if !self.wallets.read().await.contains_key(address) {
                return None;
            }

            self.metrics.record_resubscribe(address);
            tokio::select! {
                _ = cancel_rx.changed() => return None,
                result = self.source.subscribe(address) => match result {
                    Ok(stream) => {
                        info!(address, "upstream subscription re-established");
                        return Some(stream);
                    }
                    Err(e) => {
                        warn!(
                            address,
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "re-subscribe failed, backing off"
                        );
                        *backoff = (*backoff * 2).min(self.retry.max);
                    }
                }
            }
        }
    }
}
