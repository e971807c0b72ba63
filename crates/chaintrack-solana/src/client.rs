//! Solana WebSocket client with auto-reconnect and subscription management.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chaintrack_core::{
    validate_address, AccountEvent, AccountEventSource, AccountEventStream, TrackerError,
};

use crate::subscriptions::{EventSender, SubscriptionManager};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Solana commitment level for account notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Commitment {
    #[default]
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    /// Parse a config string; unknown values fall back to `Processed`.
    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => Self::Confirmed,
            "finalized" => Self::Finalized,
            _ => Self::Processed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct SolanaWsConfig {
    pub commitment: Commitment,
    /// Reconnect backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_max: Duration,
}

impl Default for SolanaWsConfig {
    fn default() -> Self {
        Self {
            commitment: Commitment::Processed,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Subscribe {
        address: String,
        sender: EventSender,
        ack: oneshot::Sender<Result<u64, TrackerError>>,
    },
    Unsubscribe {
        id: u64,
    },
    Close,
}

/// Solana WebSocket account-event source.
///
/// One connection carries every `accountSubscribe`; a background task owns
/// the socket and handles reconnect + re-subscribe logic transparently.
pub struct SolanaWsClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    subscriptions: SubscriptionManager,
}

impl SolanaWsClient {
    /// Connect to `url` and start the background task.
    ///
    /// The initial connection is established eagerly so an unreachable
    /// node fails process startup rather than the first subscription.
    pub async fn connect(
        url: impl Into<String>,
        config: SolanaWsConfig,
    ) -> Result<Self, TrackerError> {
        let url = url.into();
        let (socket, _) = connect_async(&url)
            .await
            .map_err(|e| TrackerError::Connection {
                target: url.clone(),
                reason: e.to_string(),
            })?;
        info!(url = %url, commitment = %config.commitment, "connected to Solana WebSocket RPC");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new();
        let task = WsTask {
            url: url.clone(),
            config,
            subscriptions: subscriptions.clone(),
            pending: HashMap::new(),
            next_id: 0,
        };
        tokio::spawn(task.run(socket, cmd_rx));

        Ok(Self {
            url,
            cmd_tx,
            subscriptions,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of account subscriptions currently live on the socket.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for SolanaWsClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl AccountEventSource for SolanaWsClient {
    async fn subscribe(&self, address: &str) -> Result<AccountEventStream, TrackerError> {
        validate_address(address)
            .map_err(|e| TrackerError::Validation(format!("address {address:?}: {e}")))?;

        let (tx, rx) = futures::channel::mpsc::unbounded();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Subscribe {
                address: address.to_string(),
                sender: tx,
                ack: ack_tx,
            })
            .map_err(|_| TrackerError::Subscription {
                address: address.to_string(),
                reason: "WebSocket task closed".into(),
            })?;

        let id = ack_rx.await.map_err(|_| TrackerError::Subscription {
            address: address.to_string(),
            reason: "subscribe acknowledgement dropped".into(),
        })??;

        Ok(Box::pin(AccountStream {
            rx,
            _guard: UnsubscribeGuard {
                id,
                cmd_tx: self.cmd_tx.clone(),
            },
        }))
    }

    async fn close(&self) -> Result<(), TrackerError> {
        let _ = self.cmd_tx.send(WsCommand::Close);
        Ok(())
    }
}

/// Issues `accountUnsubscribe` when the per-address stream is dropped, so
/// cancelling a tracking handle releases the upstream resource.
struct UnsubscribeGuard {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Unsubscribe { id: self.id });
    }
}

struct AccountStream {
    rx: futures::channel::mpsc::UnboundedReceiver<Result<AccountEvent, TrackerError>>,
    _guard: UnsubscribeGuard,
}

impl Stream for AccountStream {
    type Item = Result<AccountEvent, TrackerError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().rx).poll_next(cx)
    }
}

// ─── Background task ──────────────────────────────────────────────────────────

struct PendingSubscribe {
    address: String,
    sender: EventSender,
    /// `None` for internal re-subscribes after a reconnect.
    ack: Option<oneshot::Sender<Result<u64, TrackerError>>>,
}

enum Drive {
    Closed,
    Reconnect,
}

struct WsTask {
    url: String,
    config: SolanaWsConfig,
    subscriptions: SubscriptionManager,
    pending: HashMap<u64, PendingSubscribe>,
    next_id: u64,
}

impl WsTask {
    async fn run(mut self, socket: WsStream, mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>) {
        let mut socket = Some(socket);
        let mut backoff = self.config.reconnect_initial;

        loop {
            let ws = match socket.take() {
                Some(ws) => ws,
                None => match connect_async(&self.url).await {
                    Ok((ws, _)) => {
                        info!(url = %self.url, "Solana WebSocket reconnected");
                        backoff = self.config.reconnect_initial;
                        ws
                    }
                    Err(e) => {
                        warn!(url = %self.url, error = %e, "WS reconnect failed, retrying in {backoff:?}");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(self.config.reconnect_max);
                        continue;
                    }
                },
            };

            match self.drive(ws, &mut cmd_rx).await {
                Drive::Closed => return,
                Drive::Reconnect => {
                    warn!(url = %self.url, "Solana WebSocket disconnected, reconnecting in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.reconnect_max);
                }
            }
        }
    }

    /// Run one connection to completion. Returns whether to reconnect.
    async fn drive(&mut self, ws: WsStream, cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>) -> Drive {
        let (mut sink, mut stream) = ws.split();

        // Re-issue accountSubscribe for every subscription that was live
        // (or still in flight) on the previous connection. Server IDs are
        // connection-scoped, so the old map is drained and rebuilt from
        // the confirmations.
        let mut resubscribe: Vec<(String, EventSender)> = self.subscriptions.drain_active();
        for (_, p) in self.pending.drain().collect::<Vec<_>>() {
            match p.ack {
                // A caller was mid-subscribe: fail that call, the caller
                // owns the retry.
                Some(ack) => {
                    let _ = ack.send(Err(TrackerError::Subscription {
                        address: p.address,
                        reason: "connection lost during subscribe".into(),
                    }));
                }
                None => resubscribe.push((p.address, p.sender)),
            }
        }
        for (address, sender) in resubscribe {
            let id = self.next_request_id();
            let msg = subscribe_request(id, &address, self.config.commitment);
            self.pending.insert(
                id,
                PendingSubscribe {
                    address,
                    sender,
                    ack: None,
                },
            );
            if sink.send(Message::Text(msg)).await.is_err() {
                return Drive::Reconnect;
            }
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(WsCommand::Close) => {
                        debug!("WebSocket task closing");
                        return Drive::Closed;
                    }
                    Some(WsCommand::Subscribe { address, sender, ack }) => {
                        let id = self.next_request_id();
                        let msg = subscribe_request(id, &address, self.config.commitment);
                        self.pending.insert(id, PendingSubscribe { address, sender, ack: Some(ack) });
                        if sink.send(Message::Text(msg)).await.is_err() {
                            return Drive::Reconnect;
                        }
                    }
                    Some(WsCommand::Unsubscribe { id }) => {
                        self.subscriptions.remove(&id);
                        let req = unsubscribe_request(self.next_request_id(), id);
                        // A failed send means the connection is going away
                        // together with its server-side subscriptions.
                        if sink.send(Message::Text(req)).await.is_err() {
                            return Drive::Reconnect;
                        }
                    }
                },
                msg = stream.next() => match msg {
                    None => return Drive::Reconnect,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        return Drive::Reconnect;
                    }
                    Some(Ok(Message::Text(text))) => self.handle_message(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return Drive::Reconnect;
                        }
                    }
                    Some(Ok(Message::Close(_))) => return Drive::Reconnect,
                    Some(Ok(_)) => {} // binary / pong — ignore
                },
            }
        }
    }

    fn handle_message(&mut self, text: &str) {
        if let Some((sub_id, slot)) = parse_account_notification(text) {
            if !self.subscriptions.dispatch_slot(sub_id, slot) {
                debug!(sub_id, "notification for unknown subscription");
            }
            return;
        }

        // Not a notification: a subscribe confirmation, an unsubscribe
        // acknowledgement (ignored), or an error response.
        let Some((req_id, result)) = parse_rpc_response(text) else {
            return;
        };
        let Some(pending) = self.pending.remove(&req_id) else {
            return;
        };
        match result {
            Ok(sub_id) => {
                debug!(address = %pending.address, sub_id, "account subscription confirmed");
                self.subscriptions
                    .register(sub_id, pending.address, pending.sender);
                if let Some(ack) = pending.ack {
                    let _ = ack.send(Ok(sub_id));
                }
            }
            Err(reason) => {
                warn!(address = %pending.address, %reason, "account subscription rejected");
                if let Some(ack) = pending.ack {
                    let _ = ack.send(Err(TrackerError::Subscription {
                        address: pending.address,
                        reason,
                    }));
                }
                // ack == None: the dropped sender ends the relay's stream,
                // and the relay re-subscribes with its own backoff.
            }
        }
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

// ─── Message building / parsing ───────────────────────────────────────────────

fn subscribe_request(id: u64, address: &str, commitment: Commitment) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "accountSubscribe",
        "params": [address, { "encoding": "base64", "commitment": commitment.as_str() }],
    })
    .to_string()
}

fn unsubscribe_request(id: u64, subscription: u64) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "accountUnsubscribe",
        "params": [subscription],
    })
    .to_string()
}

/// Parse an `accountNotification` into (subscription ID, slot).
/// Returns `None` for any other message.
fn parse_account_notification(text: &str) -> Option<(u64, u64)> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method")?.as_str()? != "accountNotification" {
        return None;
    }
    let params = v.get("params")?;
    let sub_id = params.get("subscription")?.as_u64()?;
    let slot = params.get("result")?.get("context")?.get("slot")?.as_u64()?;
    Some((sub_id, slot))
}

/// Parse a JSON-RPC response carrying a numeric result (a subscription ID)
/// or an error. Unsubscribe acknowledgements (boolean result) map to `None`.
fn parse_rpc_response(text: &str) -> Option<(u64, Result<u64, String>)> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("method").is_some() {
        return None;
    }
    let id = v.get("id")?.as_u64()?;
    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown RPC error")
            .to_string();
        return Some((id, Err(message)));
    }
    let sub_id = v.get("result")?.as_u64()?;
    Some((id, Ok(sub_id)))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
