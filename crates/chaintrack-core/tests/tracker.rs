//! End-to-end tests for the subscription multiplexer, driven through mock
//! collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;

use chaintrack_core::{
    AccountEvent, AccountEventSource, AccountEventStream, CommandStream, EventNotification,
    EventPublisher, RetryConfig, TrackerError, WalletTracker,
};
use chaintrack_observability::TrackerMetrics;

const ADDR_A: &str = "So11111111111111111111111111111111111111112";
const ADDR_B: &str = "11111111111111111111111111111111";
const ADDR_C: &str = "SysvarC1ock11111111111111111111111111111111";

// ─── Mock collaborators ───────────────────────────────────────────────────────

type EventSender = mpsc::UnboundedSender<Result<AccountEvent, TrackerError>>;

/// Upstream double: hands out channel-backed streams and records
/// subscribe/close calls.
#[derive(Default)]
struct MockSource {
    senders: Mutex<HashMap<String, EventSender>>,
    subscribe_counts: Mutex<HashMap<String, usize>>,
    rejected: Mutex<HashSet<String>>,
    closed: AtomicUsize,
}

impl MockSource {
    fn reject(&self, address: &str) {
        self.rejected.lock().unwrap().insert(address.to_string());
    }

    fn accept(&self, address: &str) {
        self.rejected.lock().unwrap().remove(address);
    }

    fn subscribe_count(&self, address: &str) -> usize {
        self.subscribe_counts
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Push an event into `address`'s live stream. A send to a relay that
    /// has already exited is silently dropped, mirroring a real feed.
    fn emit(&self, address: &str, slot: u64) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.get(address).expect("no live subscription");
        let _ = sender.unbounded_send(Ok(AccountEvent {
            signature: None,
            timestamp: Utc::now(),
            from_addr: Some(address.to_string()),
            to_addr: None,
            amount: None,
            slot_number: slot,
        }));
    }

    /// Drop the live sender for `address`, ending its stream.
    fn end_stream(&self, address: &str) {
        self.senders.lock().unwrap().remove(address);
    }
}

#[async_trait]
impl AccountEventSource for MockSource {
    async fn subscribe(&self, address: &str) -> Result<AccountEventStream, TrackerError> {
        *self
            .subscribe_counts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert(0) += 1;

        if self.rejected.lock().unwrap().contains(address) {
            return Err(TrackerError::Subscription {
                address: address.to_string(),
                reason: "rejected by mock".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().insert(address.to_string(), tx);
        Ok(Box::pin(rx))
    }

    async fn close(&self) -> Result<(), TrackerError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Downstream double: records notifications, can be told to fail.
#[derive(Default)]
struct MockPublisher {
    published: Mutex<Vec<EventNotification>>,
    failing: Mutex<bool>,
    closed: AtomicUsize,
}

impl MockPublisher {
    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    fn chat_ids_of(&self, index: usize) -> Vec<i64> {
        self.published.lock().unwrap()[index].chat_ids.clone()
    }
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(&self, notification: &EventNotification) -> Result<(), TrackerError> {
        if *self.failing.lock().unwrap() {
            return Err(TrackerError::Publish("mock bus down".into()));
        }
        self.published.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn subscribe_commands(&self) -> Result<CommandStream, TrackerError> {
        let (_tx, rx) = mpsc::unbounded::<String>();
        Ok(Box::pin(rx))
    }

    async fn close(&self) -> Result<(), TrackerError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    source: Arc<MockSource>,
    publisher: Arc<MockPublisher>,
    tracker: WalletTracker,
}

fn harness_with_retry(retry: RetryConfig) -> Harness {
    let source = Arc::new(MockSource::default());
    let publisher = Arc::new(MockPublisher::default());
    let metrics = Arc::new(TrackerMetrics::new(&opentelemetry::global::meter(
        "chaintrack-test",
    )));
    let source_dyn: Arc<dyn AccountEventSource> = source.clone();
    let publisher_dyn: Arc<dyn EventPublisher> = publisher.clone();
    let tracker = WalletTracker::new(source_dyn, publisher_dyn, metrics, retry);
    Harness {
        source,
        publisher,
        tracker,
    }
}

fn harness() -> Harness {
    harness_with_retry(RetryConfig {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(50),
    })
}

/// Poll `cond` until it holds or two seconds pass.
async fn eventually(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_starts_exactly_one_upstream_subscription() {
    let h = harness();

    h.tracker.add(ADDR_A, 1).await.unwrap();
    h.tracker.add(ADDR_A, 2).await.unwrap();
    h.tracker.add(ADDR_A, 1).await.unwrap(); // idempotent re-add

    assert_eq!(h.source.subscribe_count(ADDR_A), 1);
    assert_eq!(h.tracker.tracked_wallets().await, 1);

    h.source.emit(ADDR_A, 100);
    eventually(|| h.publisher.published_count() == 1, "first relay").await;
    assert_eq!(h.publisher.chat_ids_of(0), vec![1, 2]);
}

#[tokio::test]
async fn concurrent_adds_race_to_one_subscription() {
    let h = harness();

    let (r1, r2) = tokio::join!(h.tracker.add(ADDR_A, 1), h.tracker.add(ADDR_A, 2));
    r1.unwrap();
    r2.unwrap();

    assert_eq!(h.source.subscribe_count(ADDR_A), 1);

    h.source.emit(ADDR_A, 7);
    eventually(|| h.publisher.published_count() == 1, "relay").await;
    assert_eq!(h.publisher.chat_ids_of(0), vec![1, 2]);
}

#[tokio::test]
async fn remove_is_idempotent_and_refcounted() {
    let h = harness();

    // Unknown address: no-op success.
    h.tracker.remove(ADDR_A, 1).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 0);

    h.tracker.add(ADDR_A, 1).await.unwrap();
    h.tracker.add(ADDR_A, 2).await.unwrap();

    // Absent subscriber: no-op, wallet stays.
    h.tracker.remove(ADDR_A, 99).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 1);

    h.tracker.remove(ADDR_A, 1).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 1);

    h.tracker.remove(ADDR_A, 2).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 0);

    // A fresh add starts a second upstream subscription.
    h.tracker.add(ADDR_A, 3).await.unwrap();
    assert_eq!(h.source.subscribe_count(ADDR_A), 2);
}

#[tokio::test]
async fn failed_upstream_subscribe_leaves_no_state() {
    let h = harness();
    h.source.reject(ADDR_A);

    let err = h.tracker.add(ADDR_A, 1).await.unwrap_err();
    assert!(matches!(err, TrackerError::Subscription { .. }));
    assert_eq!(h.tracker.tracked_wallets().await, 0);

    // The failure was transient to that call; a later add succeeds.
    h.source.accept(ADDR_A);
    h.tracker.add(ADDR_A, 1).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 1);
}

#[tokio::test]
async fn last_remove_stops_relay_before_next_event() {
    let h = harness();

    h.tracker.add(ADDR_A, 100).await.unwrap();
    h.source.emit(ADDR_A, 1);
    eventually(|| h.publisher.published_count() == 1, "first relay").await;

    h.tracker.remove(ADDR_A, 100).await.unwrap();

    // The relay is cancelled; a late event must not be forwarded.
    h.source.emit(ADDR_A, 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.publisher.published_count(), 1);
}

// ─── Relay behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_failure_drops_event_but_keeps_tracking() {
    let h = harness();

    h.tracker.add(ADDR_A, 1).await.unwrap();

    h.publisher.set_failing(true);
    h.source.emit(ADDR_A, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.publisher.published_count(), 0);

    h.publisher.set_failing(false);
    h.source.emit(ADDR_A, 2);
    eventually(|| h.publisher.published_count() == 1, "recovery relay").await;
    assert_eq!(h.publisher.published.lock().unwrap()[0].event.slot_number, 2);
}

#[tokio::test]
async fn ended_stream_resubscribes_while_subscribers_remain() {
    let h = harness();

    h.tracker.add(ADDR_A, 1).await.unwrap();
    assert_eq!(h.source.subscribe_count(ADDR_A), 1);

    h.source.end_stream(ADDR_A);
    eventually(
        || h.source.subscribe_count(ADDR_A) >= 2,
        "upstream re-subscribe",
    )
    .await;

    // Events flow again on the replacement stream.
    eventually(
        || h.source.senders.lock().unwrap().contains_key(ADDR_A),
        "replacement stream",
    )
    .await;
    h.source.emit(ADDR_A, 9);
    eventually(|| h.publisher.published_count() == 1, "relay after resubscribe").await;
}

#[tokio::test]
async fn cancellation_during_backoff_stops_retrying() {
    let h = harness_with_retry(RetryConfig {
        initial: Duration::from_secs(30),
        max: Duration::from_secs(30),
    });

    h.tracker.add(ADDR_A, 1).await.unwrap();
    h.source.end_stream(ADDR_A);

    // The relay is now sleeping out its backoff; removal cancels it.
    h.tracker.remove(ADDR_A, 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.source.subscribe_count(ADDR_A), 1);
    assert_eq!(h.tracker.tracked_wallets().await, 0);
}

// ─── Command processing ───────────────────────────────────────────────────────

#[tokio::test]
async fn command_scenario_add_relay_remove() {
    let h = harness();

    let add = format!(r#"{{"action":"add","address":"{ADDR_A}","subscriber_id":100}}"#);
    h.tracker.process_command(&add).await.unwrap();

    h.source.emit(ADDR_A, 1);
    h.source.emit(ADDR_A, 2);
    eventually(|| h.publisher.published_count() == 2, "two relays").await;
    assert_eq!(h.publisher.chat_ids_of(0), vec![100]);
    assert_eq!(h.publisher.chat_ids_of(1), vec![100]);

    let remove = format!(r#"{{"action":"remove","address":"{ADDR_A}","subscriber_id":100}}"#);
    h.tracker.process_command(&remove).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 0);

    h.source.emit(ADDR_A, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.publisher.published_count(), 2);
}

#[tokio::test]
async fn unknown_action_is_reported_without_mutation() {
    let h = harness();

    let err = h
        .tracker
        .process_command(r#"{"action":"frobnicate","address":"x","subscriber_id":1}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));
    assert_eq!(h.tracker.tracked_wallets().await, 0);

    // Subsequent commands are unaffected.
    let add = format!(r#"{{"action":"add","address":"{ADDR_B}","subscriber_id":1}}"#);
    h.tracker.process_command(&add).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 1);
}

#[tokio::test]
async fn malformed_payload_is_a_validation_error() {
    let h = harness();

    let err = h.tracker.process_command("{not json").await.unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));

    let err = h
        .tracker
        .process_command(r#"{"action":"add","address":"abc"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));
}

#[tokio::test]
async fn add_command_validates_the_address() {
    let h = harness();

    let err = h
        .tracker
        .process_command(r#"{"action":"add","address":"not-base58!","subscriber_id":1}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::Validation(_)));
    assert_eq!(h.tracker.tracked_wallets().await, 0);
    assert_eq!(h.source.subscribe_count("not-base58!"), 0);
}

#[tokio::test]
async fn command_loop_stops_on_shutdown() {
    let h = harness();
    let (tx, rx) = mpsc::unbounded::<String>();
    let commands: CommandStream = Box::pin(rx);

    let tracker = Arc::new(h.tracker);
    let loop_task = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move { tracker.run_command_loop(commands).await })
    };

    tx.unbounded_send(format!(
        r#"{{"action":"add","address":"{ADDR_A}","subscriber_id":5}}"#
    ))
    .unwrap();
    eventually(|| h.source.subscribe_count(ADDR_A) == 1, "command applied").await;

    tracker.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), loop_task)
        .await
        .expect("command loop did not stop")
        .unwrap();
}

// ─── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_cancels_all_and_closes_collaborators_once() {
    let h = harness();

    h.tracker.add(ADDR_A, 1).await.unwrap();
    h.tracker.add(ADDR_B, 2).await.unwrap();
    h.tracker.add(ADDR_C, 3).await.unwrap();
    assert_eq!(h.tracker.tracked_wallets().await, 3);

    h.tracker.shutdown().await.unwrap();

    assert_eq!(h.tracker.tracked_wallets().await, 0);
    assert_eq!(h.source.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.publisher.closed.load(Ordering::SeqCst), 1);

    // All relays have observably stopped: late events go nowhere.
    h.source.emit(ADDR_A, 1);
    h.source.emit(ADDR_B, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.publisher.published_count(), 0);
}
