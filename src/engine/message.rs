use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    eid::Eid,
    links::{CapturePayload, LinkRecord, SummaryRecord},
};

/// What gets posted to a dashboard tab. Serializes to the exact wire shape
/// the receiving script expects, e.g. `{"type":"UPSERT_LINK","link":..,"summaries":[]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPayload {
    UpsertLink {
        link: LinkRecord,
        #[serde(default)]
        summaries: Vec<SummaryRecord>,
    },
    AddSummary {
        payload: SummaryRecord,
    },
}

impl SyncPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncPayload::UpsertLink { .. } => "UPSERT_LINK",
            SyncPayload::AddSummary { .. } => "ADD_SUMMARY",
        }
    }

    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// A queued, not yet delivered payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub id: Eid,
    pub payload: SyncPayload,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub retries: u8,
}

impl SyncMessage {
    pub fn new(payload: SyncPayload) -> Self {
        Self {
            id: Eid::new(),
            payload,
            enqueued_at: Utc::now(),
            retries: 0,
        }
    }
}

/// Messages accepted by the background process.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    SaveLink {
        #[serde(default)]
        payload: CapturePayload,
    },
    ClearAllLinks,
    DataUpdated,
    SrtPing,
}

#[derive(Debug, Clone)]
pub enum Inbound {
    Message(InboundMessage),
    /// `{action: "ping"}` from older content scripts
    Ping,
    Unknown(String),
}

impl Inbound {
    pub fn parse(value: Value) -> Self {
        if value.get("action").and_then(Value::as_str) == Some("ping") {
            return Inbound::Ping;
        }

        match serde_json::from_value::<InboundMessage>(value) {
            Ok(InboundMessage::SrtPing) => Inbound::Ping,
            Ok(message) => Inbound::Message(message),
            Err(err) => Inbound::Unknown(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::SummaryKind;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let summary = SummaryRecord::new(Eid::from("L1"), SummaryKind::Tldr, "short".to_string());
        let wire = SyncPayload::AddSummary {
            payload: summary.clone(),
        }
        .to_wire()
        .unwrap();

        assert_eq!(wire["type"], "ADD_SUMMARY");
        assert_eq!(wire["payload"]["linkId"], "L1");
        assert_eq!(wire["payload"]["kind"], "tldr");
    }

    #[test]
    fn test_parse_inbound() {
        assert!(matches!(
            Inbound::parse(json!({"type": "SAVE_LINK", "payload": {"url": "https://x.com"}})),
            Inbound::Message(InboundMessage::SaveLink { payload }) if payload.url.as_deref() == Some("https://x.com")
        ));
        assert!(matches!(
            Inbound::parse(json!({"type": "CLEAR_ALL_LINKS"})),
            Inbound::Message(InboundMessage::ClearAllLinks)
        ));
        assert!(matches!(
            Inbound::parse(json!({"type": "DATA_UPDATED"})),
            Inbound::Message(InboundMessage::DataUpdated)
        ));
        assert!(matches!(Inbound::parse(json!({"action": "ping"})), Inbound::Ping));
        assert!(matches!(Inbound::parse(json!({"type": "SRT_PING"})), Inbound::Ping));
        assert!(matches!(Inbound::parse(json!({"type": "NOPE"})), Inbound::Unknown(_)));
    }

    #[test]
    fn test_queued_message_roundtrips_through_storage_shape() {
        let summary = SummaryRecord::new(Eid::from("L1"), SummaryKind::Raw, "text".to_string());
        let message = SyncMessage::new(SyncPayload::AddSummary { payload: summary });

        let stored = serde_json::to_value(&message).unwrap();
        assert_eq!(stored["retries"], 0);
        assert_eq!(stored["payload"]["type"], "ADD_SUMMARY");

        let back: SyncMessage = serde_json::from_value(stored).unwrap();
        assert_eq!(back, message);
    }
}
