//! WebSocket connection lifecycle: authenticate on upgrade, register,
//! pump frames both ways, clean up.

use std::sync::Arc;

use {
    axum::{
        extract::{
            Query, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use {
    relay_auth::TokenVerifier as _,
    relay_protocol::{ClientFrame, ErrorFrame, MAX_PAYLOAD_BYTES, error_codes},
};

use crate::{
    ack,
    error::{Error, with_deadline},
    publish::publish_message,
    state::BrokerState,
};

/// Subscribe parameters: `wss://…/ws?token=<JWT>&chatIds=<csv>`.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    #[serde(rename = "chatIds")]
    pub chat_ids: Option<String>,
}

/// Token and subscription list are checked before the upgrade completes, so
/// a bad connect attempt fails with a proper HTTP status instead of an
/// immediately-closed socket.
pub async fn ws_upgrade_handler(
    State(state): State<Arc<BrokerState>>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Error::Unauthenticated("missing token query parameter".into()).into_response();
    };
    let claims = match state.verifier.verify(&token).await {
        Ok(claims) => claims,
        Err(e) => return Error::from(e).into_response(),
    };
    let user_id = match claims.user_id() {
        Ok(user_id) => user_id.to_string(),
        Err(e) => return Error::from(e).into_response(),
    };
    let chat_ids: Vec<String> = query
        .chat_ids
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    if chat_ids.is_empty() {
        return Error::BadRequest("chatIds query parameter is required".into()).into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state, user_id, chat_ids))
}

/// Drive one registered connection: spawn the write loop, consume inbound
/// frames, unregister on exit.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<BrokerState>,
    user_id: String,
    chat_ids: Vec<String>,
) {
    let conn_id = relay_common::new_id();
    let mut frames = match state
        .registry
        .register(&conn_id, &user_id, chat_ids)
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "ws: registration failed");
            return;
        },
    };
    // Writer for error/ACK frames toward this same connection.
    let writer = state.registry.writer(&conn_id).await;
    info!(conn_id = %conn_id, user_id = %user_id, "ws: connection open");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Write loop: forwards frames from the registry's writer channel to the
    // socket.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    // ── Message loop ─────────────────────────────────────────────────────

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(conn_id = %conn_id, size = text.len(), "ws: payload too large");
            send_error(
                writer.as_ref(),
                error_codes::BAD_REQUEST,
                format!("payload exceeds {MAX_PAYLOAD_BYTES} bytes"),
            );
            continue;
        }

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: invalid frame");
                send_error(writer.as_ref(), error_codes::BAD_REQUEST, "invalid frame");
                continue;
            },
        };

        let ClientFrame::SendMessage(request) = frame;
        handle_send_message(&state, &conn_id, &user_id, request).await;
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    state.acks.discard_for_conn(&conn_id).await;
    state.registry.unregister(&conn_id).await;
    write_handle.abort();
    info!(conn_id = %conn_id, "ws: connection closed");
}

/// Publish one connection-originated frame, then emit the ACK if the caller
/// asked for one. The pending entry exists before the enqueue so the
/// deadline covers the whole round trip.
async fn handle_send_message(
    state: &Arc<BrokerState>,
    conn_id: &str,
    user_id: &str,
    request: relay_protocol::PublishRequest,
) {
    let ack_id = request.request_ack.then(|| request.ack_id.clone()).flatten();
    if let Some(ack_id) = &ack_id {
        state.acks.insert(ack_id, conn_id).await;
    }

    let deadline = state.config.server.request_timeout_ms;
    match with_deadline(deadline, publish_message(state, user_id, request)).await {
        Ok(receipt) => {
            if let Some(ack_id) = &ack_id {
                ack::emit_ack(
                    &state.acks,
                    &state.registry,
                    ack_id,
                    &receipt.message_id,
                    &receipt.message_type,
                )
                .await;
            }
        },
        Err(e) => {
            if let Some(ack_id) = &ack_id {
                state.acks.take(ack_id).await;
            }
            debug!(conn_id = %conn_id, error = %e, "ws: publish rejected");
            let writer = state.registry.writer(conn_id).await;
            send_error(writer.as_ref(), e.code(), e.detail());
        },
    }
}

fn send_error(
    writer: Option<&relay_registry::FrameWriter>,
    code: &str,
    message: impl Into<String>,
) {
    let Some(writer) = writer else {
        return;
    };
    let frame = ErrorFrame::new(code, message);
    if let Ok(json) = serde_json::to_string(&frame) {
        // Best effort; a full or closed writer is handled by the reaper.
        let _ = writer.send(&json);
    }
}
