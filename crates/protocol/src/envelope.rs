//! The broker's internal message representation.
//!
//! The fan-out frame delivered to subscribers is the envelope itself,
//! JSON-encoded. `content` is opaque: the broker never inspects it.

use serde::{Deserialize, Serialize};

use crate::iso_millis;

// ── Message type ─────────────────────────────────────────────────────────────

/// Delivery lane selector. Wire values match the ingress contract:
/// `fifo` for the ordered lane, `standard` for the fast lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "fifo")]
    Ordered,
    #[serde(rename = "standard")]
    Fast,
}

impl MessageType {
    /// Parse the wire value; `None` for anything else.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "fifo" => Some(Self::Ordered),
            "standard" => Some(Self::Fast),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Ordered)
    }

    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Ordered => "fifo",
            Self::Fast => "standard",
        }
    }
}

// ── Multi-part metadata ──────────────────────────────────────────────────────

/// Pass-through metadata for chunked payloads. The broker validates the
/// part bounds and otherwise forwards it untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPartMetadata {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "totalParts")]
    pub total_parts: u32,
    #[serde(rename = "partNumber")]
    pub part_number: u32,
}

impl MultiPartMetadata {
    /// `partNumber` must lie in `[1, totalParts]`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.total_parts >= 1 && (1..=self.total_parts).contains(&self.part_number)
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// One routed message. `message_id` is stable across redeliveries;
/// `sequence_number` is stamped by the processor for ordered-lane messages
/// after FIFO ordering, so it matches publish order per chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub content: serde_json::Value,
    #[serde(rename = "publishTimestamp", with = "iso_millis")]
    pub publish_ts: i64,
    #[serde(
        rename = "clientPublishTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_publish_ts: Option<String>,
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    /// Ordering scope on the ordered lane; defaults to the chat id.
    #[serde(rename = "messageGroupId", skip_serializing_if = "Option::is_none")]
    pub message_group_id: Option<String>,
    #[serde(rename = "sequenceNumber", skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    #[serde(rename = "multiPartMetadata", skip_serializing_if = "Option::is_none")]
    pub multi_part_metadata: Option<MultiPartMetadata>,
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
}

impl Envelope {
    /// Ordering scope for the ordered lane.
    #[must_use]
    pub fn group_id(&self) -> &str {
        self.message_group_id.as_deref().unwrap_or(&self.chat_id)
    }

    /// Key for content-based deduplication: same group + byte-identical
    /// payload collapse within the dedup window.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{}\u{1f}{}\u{1f}{}", self.group_id(), self.event_type, self.content)
    }
}
