//! Environment-driven service configuration.

use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, one env var per field.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `SOLANA_WS_URL` — upstream WebSocket RPC endpoint.
    pub solana_ws_url: String,
    /// `SOLANA_COMMITMENT` — "processed" | "confirmed" | "finalized".
    pub solana_commitment: String,
    /// `REDIS_URL` — bus connection URL.
    pub redis_url: String,
    /// `REDIS_TX_CHANNEL` — outbound enriched-event channel.
    pub redis_tx_channel: String,
    /// `REDIS_CMD_CHANNEL` — inbound command channel.
    pub redis_cmd_channel: String,
    /// `RESUBSCRIBE_INITIAL_MS` — first upstream re-subscribe backoff.
    pub resubscribe_initial: Duration,
    /// `RESUBSCRIBE_MAX_MS` — re-subscribe backoff ceiling.
    pub resubscribe_max: Duration,
    /// `SHUTDOWN_TIMEOUT_SECS` — grace period for teardown.
    pub shutdown_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            solana_ws_url: env_or("SOLANA_WS_URL", "wss://api.mainnet-beta.solana.com"),
            solana_commitment: env_or("SOLANA_COMMITMENT", "processed"),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379/1"),
            redis_tx_channel: env_or("REDIS_TX_CHANNEL", "solana_transactions"),
            redis_cmd_channel: env_or("REDIS_CMD_CHANNEL", "wallet_commands"),
            resubscribe_initial: Duration::from_millis(env_parse("RESUBSCRIBE_INITIAL_MS", 500)),
            resubscribe_max: Duration::from_millis(env_parse("RESUBSCRIBE_MAX_MS", 60_000)),
            shutdown_timeout: Duration::from_secs(env_parse("SHUTDOWN_TIMEOUT_SECS", 30)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_vars_use_defaults() {
        assert_eq!(env_or("CHAINTRACK_TEST_UNSET_VAR", "fallback"), "fallback");
        assert_eq!(env_parse::<u64>("CHAINTRACK_TEST_UNSET_VAR", 42), 42);
    }

    #[test]
    fn unparsable_value_uses_default() {
        std::env::set_var("CHAINTRACK_TEST_BAD_NUMBER", "not-a-number");
        assert_eq!(env_parse::<u64>("CHAINTRACK_TEST_BAD_NUMBER", 7), 7);
        std::env::remove_var("CHAINTRACK_TEST_BAD_NUMBER");
    }
}
