//! HTTP surface: publish, history reads, permission management, health.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Query, State},
        http::HeaderMap,
    },
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use {
    relay_auth::TokenVerifier as _,
    relay_protocol::{Envelope, PublishReceipt, PublishRequest},
    relay_store::{HistoryStore as _, ListQuery, PermissionStore as _},
};

use crate::{
    error::{Error, Result, with_deadline},
    publish::publish_message,
    state::BrokerState,
};

/// Resolve the bearer principal or fail with 401.
async fn authenticate(state: &BrokerState, headers: &HeaderMap) -> Result<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthenticated("missing Authorization header".into()))?;
    let token = relay_auth::bearer_token(header)
        .ok_or_else(|| Error::Unauthenticated("expected a bearer token".into()))?;
    let claims = state.verifier.verify(token).await?;
    Ok(claims.user_id()?.to_string())
}

// ── Publish ──────────────────────────────────────────────────────────────────

/// `POST /publish` — request-originated publish. Same body as the WebSocket
/// frame minus the `action` field; the 200 receipt doubles as the ACK.
pub async fn publish_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishReceipt>> {
    let user_id = authenticate(&state, &headers).await?;
    let deadline = state.config.server.request_timeout_ms;
    let receipt = with_deadline(deadline, publish_message(&state, &user_id, request)).await?;
    Ok(Json(receipt))
}

// ── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
    pub limit: Option<u32>,
    #[serde(rename = "startKey")]
    pub start_key: Option<String>,
    #[serde(rename = "fromTimestamp")]
    pub from_timestamp: Option<String>,
    #[serde(rename = "toTimestamp")]
    pub to_timestamp: Option<String>,
    /// Sequence-range (gap recovery) read; switches the query to the
    /// per-chat sequence index.
    #[serde(rename = "fromSequence")]
    pub from_sequence: Option<i64>,
    #[serde(rename = "toSequence")]
    pub to_sequence: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub messages: Vec<Envelope>,
    pub count: usize,
    #[serde(rename = "nextStartKey", skip_serializing_if = "Option::is_none")]
    pub next_start_key: Option<String>,
}

/// `GET /messages?chatId=…&limit=…&startKey=…&fromTimestamp=…&toTimestamp=…`
pub async fn messages_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>> {
    let user_id = authenticate(&state, &headers).await?;
    let chat_id = query
        .chat_id
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::BadRequest("chatId query parameter is required".into()))?;
    if !state.permissions.may(&user_id, &chat_id).await? {
        return Err(Error::Forbidden);
    }

    let deadline = state.config.server.request_timeout_ms;

    // Sequence-range read: consumers that detected a gap in the per-chat
    // sequence refetch the missing span.
    if query.from_sequence.is_some() || query.to_sequence.is_some() {
        let from_seq = query.from_sequence.unwrap_or(1).max(1);
        let to_seq = query.to_sequence.unwrap_or(i64::MAX);
        if to_seq < from_seq {
            return Err(Error::BadRequest("toSequence is before fromSequence".into()));
        }
        let items = with_deadline(deadline, async {
            state
                .history
                .list_by_sequence(&chat_id, from_seq, to_seq)
                .await
                .map_err(Error::from)
        })
        .await?;
        return Ok(Json(MessagesResponse {
            chat_id,
            count: items.len(),
            messages: items,
            next_start_key: None,
        }));
    }

    let list = ListQuery {
        limit: query.limit,
        cursor: query.start_key,
        from_ts: parse_timestamp(query.from_timestamp.as_deref(), "fromTimestamp")?,
        to_ts: parse_timestamp(query.to_timestamp.as_deref(), "toTimestamp")?,
    };
    let page = with_deadline(deadline, async {
        state.history.list(&chat_id, list).await.map_err(Error::from)
    })
    .await?;

    Ok(Json(MessagesResponse {
        chat_id,
        count: page.items.len(),
        messages: page.items,
        next_start_key: page.next_cursor,
    }))
}

/// Timestamps arrive as epoch milliseconds or ISO-8601.
fn parse_timestamp(raw: Option<&str>, name: &str) -> Result<Option<i64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(Some(ms));
    }
    relay_common::time::from_iso8601(raw)
        .map(Some)
        .ok_or_else(|| Error::BadRequest(format!("invalid {name}: {raw}")))
}

// ── Permissions ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PermissionBody {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionListQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// `POST /permissions` — grant `(userId, chatId, role)`.
pub async fn grant_permission_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(body): Json<PermissionBody>,
) -> Result<Json<serde_json::Value>> {
    authenticate(&state, &headers).await?;
    let role = body.role.as_deref().unwrap_or("member");
    state
        .permissions
        .grant(&body.user_id, &body.chat_id, role)
        .await?;
    debug!(user_id = %body.user_id, chat_id = %body.chat_id, role, "permission granted");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// `DELETE /permissions` — revoke `(userId, chatId)`.
pub async fn revoke_permission_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Json(body): Json<PermissionBody>,
) -> Result<Json<serde_json::Value>> {
    authenticate(&state, &headers).await?;
    let removed = state
        .permissions
        .revoke(&body.user_id, &body.chat_id)
        .await?;
    Ok(Json(serde_json::json!({ "status": "ok", "removed": removed })))
}

/// `GET /permissions?userId=…` — list a user's chat grants.
pub async fn list_permissions_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    Query(query): Query<PermissionListQuery>,
) -> Result<Json<serde_json::Value>> {
    authenticate(&state, &headers).await?;
    let entries = state.permissions.list(&query.user_id).await?;
    let permissions: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|e| {
            serde_json::json!({
                "userId": e.user_id,
                "chatId": e.chat_id,
                "role": e.role,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "permissions": permissions })))
}

// ── Health ───────────────────────────────────────────────────────────────────

pub async fn health_handler(State(state): State<Arc<BrokerState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.registry.connection_count().await,
        "deadLetters": state.dead_letters.len(),
    }))
}
