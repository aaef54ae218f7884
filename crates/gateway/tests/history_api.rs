#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for `GET /messages` pagination and gating.

use std::{net::SocketAddr, sync::Arc};

use {
    jsonwebtoken::{EncodingKey, Header, encode},
    relay_protocol::{Envelope, MessageType},
    relay_store::{HistoryStore, PermissionStore},
    tokio::net::TcpListener,
};

use relay_gateway::{BrokerState, build_app, start};

const SECRET: &str = "integration-secret";

fn token_for(user: &str) -> String {
    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        exp: u64,
    }
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 3_600;
    encode(
        &Header::default(),
        &Claims { sub: user, exp },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn start_broker() -> (SocketAddr, Arc<BrokerState>) {
    let pool = relay_store::open("sqlite::memory:").await.unwrap();
    let mut config = relay_config::RelayConfig::default();
    config.auth.hs256_secret = Some(SECRET.into());
    let verifier = relay_auth::verifier_from_config(&config.auth).unwrap();
    let history = Arc::new(relay_store::SqliteHistory::new(pool.clone(), &config.history));
    let state = BrokerState::new(
        config,
        Arc::new(relay_store::SqlitePermissions::new(pool.clone())),
        Arc::new(relay_store::SqliteSequences::new(pool)),
        history,
        verifier,
    );
    let _handle = start(&state);

    let app = build_app(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn seed_messages(state: &BrokerState, chat_id: &str, count: i64) {
    let base = relay_common::time::now_ms() - count;
    for i in 0..count {
        let envelope = Envelope {
            message_id: format!("m{i:03}"),
            chat_id: chat_id.into(),
            event_type: "chat.message".into(),
            content: serde_json::json!({"n": i}),
            publish_ts: base + i,
            client_publish_ts: None,
            message_type: MessageType::Fast,
            message_group_id: None,
            sequence_number: None,
            multi_part_metadata: None,
            retry_count: 0,
        };
        state.history.put(&envelope).await.unwrap();
    }
}

async fn get_messages(addr: SocketAddr, user: &str, query: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}/messages?{query}"))
        .header("Authorization", format!("Bearer {}", token_for(user)))
        .send()
        .await
        .unwrap()
}

/// Scenario: 120 persisted messages page out as 50 + 50 + 20, newest first.
#[tokio::test]
async fn pages_through_history_newest_first() {
    let (addr, state) = start_broker().await;
    state.permissions.grant("reader", "c5", "member").await.unwrap();
    seed_messages(&state, "c5", 120).await;

    let resp = get_messages(addr, "reader", "chatId=c5").await;
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 50);
    assert_eq!(page["chatId"], "c5");
    assert_eq!(page["messages"][0]["messageId"], "m119");
    let cursor = page["nextStartKey"].as_str().unwrap().to_string();

    let resp = get_messages(addr, "reader", &format!("chatId=c5&startKey={cursor}")).await;
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 50);
    assert_eq!(page["messages"][0]["messageId"], "m069");
    let cursor = page["nextStartKey"].as_str().unwrap().to_string();

    let resp = get_messages(addr, "reader", &format!("chatId=c5&startKey={cursor}")).await;
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 20);
    assert!(page.get("nextStartKey").is_none());
}

#[tokio::test]
async fn limit_is_clamped_and_zero_yields_an_empty_page() {
    let (addr, state) = start_broker().await;
    state.permissions.grant("reader", "c1", "member").await.unwrap();
    seed_messages(&state, "c1", 110).await;

    let resp = get_messages(addr, "reader", "chatId=c1&limit=500").await;
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 100);

    let resp = get_messages(addr, "reader", "chatId=c1&limit=0").await;
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 0);
    assert!(page.get("nextStartKey").is_none());
}

#[tokio::test]
async fn malformed_start_key_is_a_bad_request() {
    let (addr, state) = start_broker().await;
    state.permissions.grant("reader", "c1", "member").await.unwrap();

    let resp = get_messages(addr, "reader", "chatId=c1&startKey=%21%21garbage").await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad-request");
}

#[tokio::test]
async fn reads_are_gated_by_chat_permission() {
    let (addr, state) = start_broker().await;
    seed_messages(&state, "c1", 3).await;

    let resp = get_messages(addr, "stranger", "chatId=c1").await;
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"error": "forbidden"}));
}

#[tokio::test]
async fn time_range_filters_apply() {
    let (addr, state) = start_broker().await;
    state.permissions.grant("reader", "c1", "member").await.unwrap();

    let base = relay_common::time::now_ms() - 10_000;
    for i in 0..10 {
        let envelope = Envelope {
            message_id: format!("t{i}"),
            chat_id: "c1".into(),
            event_type: "chat.message".into(),
            content: serde_json::json!(i),
            publish_ts: base + i * 1_000,
            client_publish_ts: None,
            message_type: MessageType::Fast,
            message_group_id: None,
            sequence_number: None,
            multi_part_metadata: None,
            retry_count: 0,
        };
        state.history.put(&envelope).await.unwrap();
    }

    let resp = get_messages(
        addr,
        "reader",
        &format!(
            "chatId=c1&fromTimestamp={}&toTimestamp={}",
            base + 2_000,
            base + 4_000
        ),
    )
    .await;
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 3);
    assert_eq!(page["messages"][0]["messageId"], "t4");
    assert_eq!(page["messages"][2]["messageId"], "t2");
}

/// Consumers that notice a sequence gap refetch the span by sequence.
#[tokio::test]
async fn sequence_range_read_serves_gap_recovery() {
    let (addr, state) = start_broker().await;
    state.permissions.grant("reader", "c8", "member").await.unwrap();

    let now = relay_common::time::now_ms();
    for seq in [1_i64, 2, 4, 5] {
        let envelope = Envelope {
            message_id: format!("s{seq}"),
            chat_id: "c8".into(),
            event_type: "chat.message".into(),
            content: serde_json::json!(seq),
            publish_ts: now + seq,
            client_publish_ts: None,
            message_type: MessageType::Ordered,
            message_group_id: Some("c8".into()),
            sequence_number: Some(seq),
            multi_part_metadata: None,
            retry_count: 0,
        };
        state.history.put(&envelope).await.unwrap();
    }

    let resp = get_messages(addr, "reader", "chatId=c8&fromSequence=2&toSequence=5").await;
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["count"], 3);
    let seqs: Vec<i64> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["sequenceNumber"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, [2, 4, 5]);

    let resp = get_messages(addr, "reader", "chatId=c8&fromSequence=5&toSequence=2").await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn missing_chat_id_is_a_bad_request() {
    let (addr, _state) = start_broker().await;
    let resp = get_messages(addr, "reader", "limit=10").await;
    assert_eq!(resp.status(), 400);
}

/// The permission management surface drives what `/messages` allows.
#[tokio::test]
async fn permission_surface_grants_and_revokes_read_access() {
    let (addr, state) = start_broker().await;
    seed_messages(&state, "c1", 2).await;
    let client = reqwest::Client::new();
    let admin_token = token_for("admin");

    let resp = client
        .post(format!("http://{addr}/permissions"))
        .header("Authorization", format!("Bearer {admin_token}"))
        .json(&serde_json::json!({"userId": "reader", "chatId": "c1", "role": "member"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert_eq!(get_messages(addr, "reader", "chatId=c1").await.status(), 200);

    let resp = client
        .get(format!("http://{addr}/permissions?userId=reader"))
        .header("Authorization", format!("Bearer {admin_token}"))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["permissions"][0]["chatId"], "c1");

    let resp = client
        .delete(format!("http://{addr}/permissions"))
        .header("Authorization", format!("Bearer {admin_token}"))
        .json(&serde_json::json!({"userId": "reader", "chatId": "c1"}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], true);

    assert_eq!(get_messages(addr, "reader", "chatId=c1").await.status(), 403);
}
