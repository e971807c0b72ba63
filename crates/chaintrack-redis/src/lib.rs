//! chaintrack-redis — Redis pub/sub transport for ChainTrack.
//!
//! Enriched events go out as JSON on the transactions channel; add/remove
//! commands come in on the commands channel. One multiplexed connection
//! serves publishing; command consumption gets a dedicated pub/sub
//! connection.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use chaintrack_core::{CommandStream, EventNotification, EventPublisher, TrackerError};

/// Redis-backed [`EventPublisher`].
pub struct RedisBus {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
    tx_channel: String,
    cmd_channel: String,
}

impl RedisBus {
    /// Open and ping the connection.
    ///
    /// `url` is a `redis://` URL; `tx_channel`/`cmd_channel` name the
    /// outbound event channel and the inbound command channel.
    pub async fn connect(
        url: &str,
        tx_channel: impl Into<String>,
        cmd_channel: impl Into<String>,
    ) -> Result<Self, TrackerError> {
        let client = redis::Client::open(url).map_err(|e| TrackerError::Connection {
            target: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TrackerError::Connection {
                target: url.to_string(),
                reason: e.to_string(),
            })?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TrackerError::Connection {
                target: url.to_string(),
                reason: e.to_string(),
            })?;

        let tx_channel = tx_channel.into();
        let cmd_channel = cmd_channel.into();
        info!(%tx_channel, %cmd_channel, "connected to Redis");

        Ok(Self {
            client,
            conn,
            tx_channel,
            cmd_channel,
        })
    }
}

#[async_trait]
impl EventPublisher for RedisBus {
    async fn publish(&self, notification: &EventNotification) -> Result<(), TrackerError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| TrackerError::Internal(format!("event serialization: {e}")))?;

        // MultiplexedConnection clones share one underlying connection.
        let mut conn = self.conn.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.tx_channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| TrackerError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn subscribe_commands(&self) -> Result<CommandStream, TrackerError> {
        let mut pubsub =
            self.client
                .get_async_pubsub()
                .await
                .map_err(|e| TrackerError::Connection {
                    target: "redis pubsub".into(),
                    reason: e.to_string(),
                })?;

        pubsub
            .subscribe(&self.cmd_channel)
            .await
            .map_err(|e| TrackerError::Connection {
                target: format!("redis channel {}", self.cmd_channel),
                reason: e.to_string(),
            })?;

        info!(channel = %self.cmd_channel, "subscribed to command channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "skipping non-UTF-8 command payload");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), TrackerError> {
        // Connections close on drop; nothing to flush.
        debug!("redis bus closed");
        Ok(())
    }
}
