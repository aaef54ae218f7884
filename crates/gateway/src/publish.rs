//! The common publish path behind both ingress surfaces.
//!
//! Connection-originated frames and `POST /publish` bodies go through the
//! same validate → authorize → stamp → route steps; only principal
//! resolution and ACK emission differ per surface.

use {
    relay_protocol::{Envelope, MessageType, PublishReceipt, PublishRequest},
    relay_store::PermissionStore as _,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    state::BrokerState,
};

/// Validate, authorize, stamp, and enqueue one publish. Returns the success
/// receipt once the lane has confirmed the enqueue. Never retries; the
/// caller owns retry policy.
pub async fn publish_message(
    state: &BrokerState,
    user_id: &str,
    request: PublishRequest,
) -> Result<PublishReceipt> {
    // ── Validation ───────────────────────────────────────────────────────
    if request.target_channel.as_deref().unwrap_or("").is_empty() {
        return Err(Error::BadRequest("targetChannel is required".into()));
    }
    let payload = request
        .payload
        .ok_or_else(|| Error::BadRequest("payload is required".into()))?;
    let chat_id = payload
        .chat_id
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::BadRequest("payload.chatId is required".into()))?;
    let event_type = payload
        .event_type
        .filter(|e| !e.is_empty())
        .ok_or_else(|| Error::BadRequest("payload.eventType is required".into()))?;
    let message_type = match request.message_type.as_deref() {
        None => MessageType::Fast,
        Some(raw) => MessageType::parse(raw).ok_or_else(|| {
            Error::BadRequest(format!("unknown messageType '{raw}' (expected fifo or standard)"))
        })?,
    };
    if let Some(multi_part) = &payload.multi_part_metadata
        && !multi_part.is_valid()
    {
        return Err(Error::BadRequest(
            "multiPartMetadata.partNumber must be within [1, totalParts]".into(),
        ));
    }
    if request.request_ack && request.ack_id.as_deref().unwrap_or("").is_empty() {
        return Err(Error::BadRequest("ackId is required when requestAck is set".into()));
    }

    // ── Authorization ────────────────────────────────────────────────────
    if !state.permissions.may(user_id, &chat_id).await? {
        return Err(Error::Forbidden);
    }

    // ── Stamp and route ──────────────────────────────────────────────────
    let envelope = Envelope {
        message_id: relay_common::new_id(),
        chat_id: chat_id.clone(),
        event_type,
        content: payload.content,
        publish_ts: relay_common::time::now_ms(),
        client_publish_ts: payload.client_publish_timestamp,
        message_type,
        message_group_id: match message_type {
            MessageType::Ordered => {
                Some(request.message_group_id.unwrap_or_else(|| chat_id.clone()))
            },
            MessageType::Fast => None,
        },
        sequence_number: None,
        multi_part_metadata: payload.multi_part_metadata,
        retry_count: 0,
    };
    let message_id = envelope.message_id.clone();

    match message_type {
        MessageType::Ordered => state.ordered.enqueue(envelope)?,
        MessageType::Fast => state.fast.enqueue(envelope)?,
    };

    debug!(
        message_id = %message_id,
        chat_id = %chat_id,
        user_id = %user_id,
        lane = message_type.as_wire(),
        "publish enqueued"
    );
    Ok(PublishReceipt {
        message_id,
        message_type: message_type.as_wire().into(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use {
        relay_auth::Hs256Verifier,
        relay_config::RelayConfig,
        relay_protocol::{MultiPartMetadata, PublishPayload},
        relay_store::{PermissionStore as _, SqliteHistory, SqlitePermissions, SqliteSequences},
    };

    use super::*;

    async fn test_state() -> Arc<BrokerState> {
        let pool = relay_store::open("sqlite::memory:").await.unwrap();
        let config = RelayConfig::default();
        let history_store = Arc::new(SqliteHistory::new(pool.clone(), &config.history));
        BrokerState::new(
            config,
            Arc::new(SqlitePermissions::new(pool.clone())),
            Arc::new(SqliteSequences::new(pool)),
            history_store,
            Arc::new(Hs256Verifier::new("test", None, None)),
        )
    }

    fn request(chat_id: &str) -> PublishRequest {
        PublishRequest {
            target_channel: Some("WebSocket".into()),
            payload: Some(PublishPayload {
                chat_id: Some(chat_id.into()),
                event_type: Some("chat.message".into()),
                content: serde_json::json!({"body": "hello"}),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_chat_id_is_a_bad_request() {
        let state = test_state().await;
        let mut req = request("c1");
        req.payload.as_mut().unwrap().chat_id = None;
        let err = publish_message(&state, "user-1", req).await;
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn unknown_message_type_is_a_bad_request() {
        let state = test_state().await;
        let mut req = request("c1");
        req.message_type = Some("priority".into());
        let err = publish_message(&state, "user-1", req).await;
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn out_of_range_part_number_is_rejected() {
        let state = test_state().await;
        state.permissions.grant("user-1", "c1", "member").await.unwrap();
        let mut req = request("c1");
        req.payload.as_mut().unwrap().multi_part_metadata = Some(MultiPartMetadata {
            group_id: "g".into(),
            total_parts: 2,
            part_number: 3,
        });
        let err = publish_message(&state, "user-1", req).await;
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden_and_nothing_is_enqueued() {
        let state = test_state().await;
        let err = publish_message(&state, "user-1", request("c4")).await;
        assert!(matches!(err, Err(Error::Forbidden)));
        assert_eq!(state.fast.depth(), 0);
        assert_eq!(state.ordered.depth(), 0);
    }

    #[tokio::test]
    async fn fast_is_the_default_lane() {
        let state = test_state().await;
        state.permissions.grant("user-1", "c1", "member").await.unwrap();
        let receipt = publish_message(&state, "user-1", request("c1")).await.unwrap();
        assert_eq!(receipt.message_type, "standard");
        assert_eq!(state.fast.depth(), 1);
        assert_eq!(state.ordered.depth(), 0);
    }

    #[tokio::test]
    async fn ordered_defaults_its_group_to_the_chat() {
        let state = test_state().await;
        state.permissions.grant("user-1", "c1", "member").await.unwrap();
        let mut req = request("c1");
        req.message_type = Some("fifo".into());
        publish_message(&state, "user-1", req).await.unwrap();
        assert_eq!(state.ordered.depth(), 1);

        let delivery = state.ordered.receive().await;
        assert_eq!(delivery.envelope.message_group_id.as_deref(), Some("c1"));
        state.ordered.ack(delivery.handle);
    }

    #[tokio::test]
    async fn request_ack_without_ack_id_is_rejected() {
        let state = test_state().await;
        let mut req = request("c1");
        req.request_ack = true;
        let err = publish_message(&state, "user-1", req).await;
        assert!(matches!(err, Err(Error::BadRequest(_))));
    }
}
