use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Lifecycle of a queued write.
///
/// `Pending → Syncing → Synced` (then removed), or
/// `Syncing → Failed → Pending` for a retry on the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemState {
    Pending,
    Syncing,
    Synced,
    Failed,
}

/// A mutation that could not reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Also sent as the idempotency key on every attempt.
    pub id: Uuid,
    /// Write kind; doubles as the endpoint path the item is sent to.
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
            attempts: 0,
            state: ItemState::Pending,
            last_error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_as_plain_json() {
        let item = QueueItem::new("crew/check-in", json!({ "crew": "c-101" }));
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["type"], "crew/check-in");
        assert_eq!(value["state"], "PENDING");
        assert_eq!(value["attempts"], 0);
        assert!(value.get("last_error").is_none());

        let back: QueueItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
