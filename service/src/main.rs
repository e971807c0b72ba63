//! chaintrack — Solana wallet-tracking fan-out daemon.
//!
//! Consumes add/remove commands from a Redis channel, keeps one upstream
//! `accountSubscribe` per tracked wallet, and republishes each observed
//! account event to Redis annotated with the current subscriber list.
//!
//! # Environment Variables
//! - `SOLANA_WS_URL`        — upstream WebSocket RPC (default: mainnet-beta)
//! - `SOLANA_COMMITMENT`    — processed | confirmed | finalized
//! - `REDIS_URL`            — e.g. `redis://:pass@host:6379/1`
//! - `REDIS_TX_CHANNEL`     — outbound event channel (default: solana_transactions)
//! - `REDIS_CMD_CHANNEL`    — inbound command channel (default: wallet_commands)
//! - `LOG_LEVEL` / `LOG_JSON` — logging level and format
//!
//! Metrics are recorded through the global OpenTelemetry meter; install an
//! OTLP provider at deployment to export them.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use opentelemetry::global;
use tokio::signal;
use tracing::{error, info, warn};

use chaintrack_core::{AccountEventSource, EventPublisher, RetryConfig, WalletTracker};
use chaintrack_observability::{init_tracing, LogConfig, TrackerMetrics};
use chaintrack_redis::RedisBus;
use chaintrack_solana::{Commitment, SolanaWsClient, SolanaWsConfig};

use crate::config::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LogConfig::from_env());

    let cfg = ServiceConfig::from_env();
    info!(
        solana = %cfg.solana_ws_url,
        redis = %cfg.redis_url,
        "starting chaintrack"
    );

    let metrics = Arc::new(TrackerMetrics::new(&global::meter("chaintrack")));

    let solana = SolanaWsClient::connect(
        &cfg.solana_ws_url,
        SolanaWsConfig {
            commitment: Commitment::parse(&cfg.solana_commitment),
            ..SolanaWsConfig::default()
        },
    )
    .await
    .context("failed to connect to Solana WebSocket RPC")?;

    let redis = RedisBus::connect(&cfg.redis_url, &cfg.redis_tx_channel, &cfg.redis_cmd_channel)
        .await
        .context("failed to connect to Redis")?;

    let source: Arc<dyn AccountEventSource> = Arc::new(solana);
    let publisher: Arc<dyn EventPublisher> = Arc::new(redis);

    let commands = publisher
        .subscribe_commands()
        .await
        .context("failed to subscribe to command channel")?;

    let tracker = Arc::new(WalletTracker::new(
        source,
        publisher,
        metrics,
        RetryConfig {
            initial: cfg.resubscribe_initial,
            max: cfg.resubscribe_max,
        },
    ));

    let command_loop = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move { tracker.run_command_loop(commands).await })
    };

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    match tokio::time::timeout(cfg.shutdown_timeout, tracker.shutdown()).await {
        Ok(Ok(())) => info!("shutdown complete"),
        Ok(Err(e)) => error!(error = %e, "error during shutdown"),
        Err(_) => warn!(timeout = ?cfg.shutdown_timeout, "shutdown timed out"),
    }

    // shutdown() raises the stop signal before anything else, so the
    // command loop is already on its way out.
    let _ = command_loop.await;
    Ok(())
}
