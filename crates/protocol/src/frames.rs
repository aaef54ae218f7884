//! Ingress and egress frame shapes.

use serde::{Deserialize, Serialize};

use crate::envelope::MultiPartMetadata;

// ── Ingress ──────────────────────────────────────────────────────────────────

/// Client → broker WebSocket frame, discriminated by `action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientFrame {
    #[serde(rename = "sendMessage")]
    SendMessage(PublishRequest),
}

/// Publish request body. Shared by the WebSocket `sendMessage` frame and
/// `POST /publish` (which carries the same body minus the `action` field).
///
/// Validation happens in the publisher, not in serde, so a request with a
/// bad `messageType` yields a `bad-request` rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "targetChannel", skip_serializing_if = "Option::is_none")]
    pub target_channel: Option<String>,
    #[serde(rename = "messageType", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(rename = "messageGroupId", skip_serializing_if = "Option::is_none")]
    pub message_group_id: Option<String>,
    #[serde(rename = "requestAck", default)]
    pub request_ack: bool,
    #[serde(rename = "ackId", skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
    pub payload: Option<PublishPayload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishPayload {
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(rename = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(
        rename = "clientPublishTimestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_publish_timestamp: Option<String>,
    #[serde(rename = "multiPartMetadata", skip_serializing_if = "Option::is_none")]
    pub multi_part_metadata: Option<MultiPartMetadata>,
}

// ── Egress ───────────────────────────────────────────────────────────────────

/// Success envelope returned to the publisher on enqueue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "messageType")]
    pub message_type: String,
}

/// Acknowledgement frame delivered to the originating connection after the
/// lane confirms durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub r#type: String, // always "ack"
    #[serde(rename = "ackId")]
    pub ack_id: String,
    pub status: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "messageType")]
    pub message_type: String,
    pub timestamp: String,
}

impl AckFrame {
    #[must_use]
    pub fn success(ack_id: &str, message_id: &str, message_type: &str) -> Self {
        Self {
            r#type: "ack".into(),
            ack_id: ack_id.into(),
            status: "success".into(),
            message_id: message_id.into(),
            message_type: message_type.into(),
            timestamp: relay_common::time::to_iso8601(relay_common::time::now_ms()),
        }
    }
}

/// Error frame pushed to a WebSocket client for per-frame failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub r#type: String, // always "error"
    pub code: String,
    pub message: String,
}

impl ErrorFrame {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn send_message_frame_parses_by_action() {
        let raw = r#"{
            "action": "sendMessage",
            "targetChannel": "WebSocket",
            "messageType": "fifo",
            "requestAck": true,
            "ackId": "a-1",
            "payload": { "chatId": "c1", "eventType": "chat.message", "content": {"x": 1} }
        }"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        let ClientFrame::SendMessage(req) = frame;
        assert_eq!(req.message_type.as_deref(), Some("fifo"));
        assert!(req.request_ack);
        assert_eq!(req.payload.unwrap().chat_id.as_deref(), Some("c1"));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = r#"{ "action": "subscribe", "payload": {} }"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn http_body_is_the_same_shape_minus_action() {
        let raw = r#"{ "payload": { "chatId": "c1", "eventType": "e" } }"#;
        let req: PublishRequest = serde_json::from_str(raw).unwrap();
        assert!(!req.request_ack);
        assert!(req.message_type.is_none());
    }

    #[test]
    fn ack_frame_wire_shape() {
        let ack = AckFrame::success("a-1", "m-1", "fifo");
        let v = serde_json::to_value(&ack).unwrap();
        assert_eq!(v["type"], "ack");
        assert_eq!(v["ackId"], "a-1");
        assert_eq!(v["status"], "success");
        assert_eq!(v["messageType"], "fifo");
    }
}
