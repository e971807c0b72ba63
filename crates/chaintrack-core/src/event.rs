//! Wire types: raw upstream events, enriched notifications, and commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw account change observed on the upstream chain node.
///
/// Optional fields are omitted from the JSON encoding when absent,
/// never null/zero-filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub slot_number: u64,
}

/// An [`AccountEvent`] annotated with the subscribers registered for its
/// address at relay time. Constructed fresh per event, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventNotification {
    #[serde(flatten)]
    pub event: AccountEvent,
    /// Subscriber IDs in ascending order.
    pub chat_ids: Vec<i64>,
}

impl EventNotification {
    pub fn new(event: AccountEvent, chat_ids: Vec<i64>) -> Self {
        Self { event, chat_ids }
    }
}

/// A decoded add/remove instruction from the command channel.
///
/// Unknown JSON fields are ignored; missing required fields or wrong
/// types are a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletCommand {
    /// "add" or "remove".
    pub action: String,
    pub address: String,
    pub subscriber_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(slot: u64) -> AccountEvent {
        AccountEvent {
            signature: None,
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            from_addr: Some("So11111111111111111111111111111111111111112".into()),
            to_addr: None,
            amount: None,
            slot_number: slot,
        }
    }

    #[test]
    fn notification_flattens_event_fields() {
        let note = EventNotification::new(event(42), vec![100, 200]);
        let json = serde_json::to_value(&note).unwrap();

        assert_eq!(json["slot_number"], 42);
        assert_eq!(json["chat_ids"], serde_json::json!([100, 200]));
        // Absent optionals must be absent, not null
        assert!(json.get("signature").is_none());
        assert!(json.get("to_addr").is_none());
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn command_ignores_unknown_fields() {
        let cmd: WalletCommand = serde_json::from_str(
            r#"{"action":"add","address":"abc","subscriber_id":7,"extra":true}"#,
        )
        .unwrap();
        assert_eq!(cmd.action, "add");
        assert_eq!(cmd.subscriber_id, 7);
    }

    #[test]
    fn command_requires_subscriber_id() {
        let result =
            serde_json::from_str::<WalletCommand>(r#"{"action":"add","address":"abc"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn command_rejects_wrong_types() {
        let result = serde_json::from_str::<WalletCommand>(
            r#"{"action":"add","address":"abc","subscriber_id":"7"}"#,
        );
        assert!(result.is_err());
    }
}
