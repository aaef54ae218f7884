//! Message history: every routed envelope, keyed by chat and recency,
//! readable until its 30-day TTL elapses.
//!
//! Appends are idempotent by `message_id`, so a lane redelivery that races a
//! completed persist cannot double-store. Reads filter expired rows
//! directly; the periodic sweep only reclaims space.

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    relay_protocol::{Envelope, MessageType, MultiPartMetadata},
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::{Error, Result};

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

/// Read parameters for one history page.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub from_ts: Option<i64>,
    pub to_ts: Option<i64>,
}

/// One page of history, newest first.
#[derive(Debug)]
pub struct HistoryPage {
    pub items: Vec<Envelope>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Durable append. Safe to call more than once per `message_id`.
    async fn put(&self, envelope: &Envelope) -> Result<()>;
    /// Paginated, time-filtered read in reverse chronological order.
    async fn list(&self, chat_id: &str, query: ListQuery) -> Result<HistoryPage>;
    /// Sequence-index read for gap recovery: ordered-lane messages with
    /// `from_seq <= seq <= to_seq`, ascending. A missing value in the
    /// result is a gap the consumer can refetch or report. The span is
    /// clamped to the page cap.
    async fn list_by_sequence(
        &self,
        chat_id: &str,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<Envelope>>;
    /// Delete rows past their TTL; returns the number removed.
    async fn sweep_expired(&self) -> Result<u64>;
}

/// Initialize the messages table schema.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            message_id       TEXT    NOT NULL UNIQUE,
            chat_id          TEXT    NOT NULL,
            event_type       TEXT    NOT NULL,
            content          TEXT    NOT NULL,
            publish_ts       INTEGER NOT NULL,
            client_publish_ts TEXT,
            message_type     TEXT    NOT NULL,
            message_group_id TEXT,
            seq              INTEGER,
            multi_part       TEXT,
            retry_count      INTEGER NOT NULL DEFAULT 0,
            expires_at       INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_chat_recency
         ON messages (chat_id, publish_ts DESC)",
    )
    .execute(pool)
    .await?;

    // Supports gap queries over the per-chat sequence.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_chat_seq
         ON messages (chat_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub struct SqliteHistory {
    pool: SqlitePool,
    retention_ms: i64,
    default_page: u32,
    max_page: u32,
}

impl SqliteHistory {
    #[must_use]
    pub fn new(pool: SqlitePool, cfg: &relay_config::HistoryConfig) -> Self {
        Self {
            pool,
            retention_ms: cfg.retention_days * DAY_MS,
            default_page: cfg.default_page,
            max_page: cfg.max_page,
        }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn put(&self, envelope: &Envelope) -> Result<()> {
        let multi_part = envelope
            .multi_part_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT OR IGNORE INTO messages
             (message_id, chat_id, event_type, content, publish_ts, client_publish_ts,
              message_type, message_group_id, seq, multi_part, retry_count, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&envelope.message_id)
        .bind(&envelope.chat_id)
        .bind(&envelope.event_type)
        .bind(serde_json::to_string(&envelope.content)?)
        .bind(envelope.publish_ts)
        .bind(&envelope.client_publish_ts)
        .bind(envelope.message_type.as_wire())
        .bind(&envelope.message_group_id)
        .bind(envelope.sequence_number)
        .bind(multi_part)
        .bind(i64::from(envelope.retry_count))
        .bind(envelope.publish_ts + self.retention_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, chat_id: &str, query: ListQuery) -> Result<HistoryPage> {
        let limit = match query.limit {
            Some(0) => {
                return Ok(HistoryPage {
                    items: Vec::new(),
                    next_cursor: None,
                });
            },
            Some(n) => n.min(self.max_page),
            None => self.default_page,
        };

        let now = relay_common::time::now_ms();
        let from_ts = query.from_ts.unwrap_or(i64::MIN);
        let to_ts = query.to_ts.unwrap_or(i64::MAX);
        // Fetch one extra row to know whether another page exists.
        let fetch = i64::from(limit) + 1;

        let rows: Vec<Row> = match query.cursor.as_deref().map(decode_cursor).transpose()? {
            Some((cursor_ts, cursor_id)) => {
                sqlx::query_as(
                    "SELECT message_id, chat_id, event_type, content, publish_ts,
                            client_publish_ts, message_type, message_group_id, seq,
                            multi_part, retry_count
                     FROM messages
                     WHERE chat_id = ? AND expires_at > ?
                       AND publish_ts >= ? AND publish_ts <= ?
                       AND (publish_ts < ? OR (publish_ts = ? AND message_id < ?))
                     ORDER BY publish_ts DESC, message_id DESC
                     LIMIT ?",
                )
                .bind(chat_id)
                .bind(now)
                .bind(from_ts)
                .bind(to_ts)
                .bind(cursor_ts)
                .bind(cursor_ts)
                .bind(&cursor_id)
                .bind(fetch)
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as(
                    "SELECT message_id, chat_id, event_type, content, publish_ts,
                            client_publish_ts, message_type, message_group_id, seq,
                            multi_part, retry_count
                     FROM messages
                     WHERE chat_id = ? AND expires_at > ?
                       AND publish_ts >= ? AND publish_ts <= ?
                     ORDER BY publish_ts DESC, message_id DESC
                     LIMIT ?",
                )
                .bind(chat_id)
                .bind(now)
                .bind(from_ts)
                .bind(to_ts)
                .bind(fetch)
                .fetch_all(&self.pool)
                .await?
            },
        };

        let mut items: Vec<Envelope> = rows
            .into_iter()
            .map(row_to_envelope)
            .collect::<Result<_>>()?;
        let next_cursor = if items.len() > limit as usize {
            items.truncate(limit as usize);
            items
                .last()
                .map(|last| encode_cursor(last.publish_ts, &last.message_id))
        } else {
            None
        };

        Ok(HistoryPage { items, next_cursor })
    }

    async fn list_by_sequence(
        &self,
        chat_id: &str,
        from_seq: i64,
        to_seq: i64,
    ) -> Result<Vec<Envelope>> {
        let to_seq = to_seq.min(from_seq.saturating_add(i64::from(self.max_page) - 1));
        let rows: Vec<Row> = sqlx::query_as(
            "SELECT message_id, chat_id, event_type, content, publish_ts,
                    client_publish_ts, message_type, message_group_id, seq,
                    multi_part, retry_count
             FROM messages
             WHERE chat_id = ? AND expires_at > ?
               AND seq IS NOT NULL AND seq >= ? AND seq <= ?
             ORDER BY seq ASC",
        )
        .bind(chat_id)
        .bind(relay_common::time::now_ms())
        .bind(from_seq)
        .bind(to_seq)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_envelope).collect()
    }

    async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE expires_at <= ?")
            .bind(relay_common::time::now_ms())
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "swept expired history rows");
        }
        Ok(removed)
    }
}

// ── Cursors ──────────────────────────────────────────────────────────────────

type Row = (
    String,         // message_id
    String,         // chat_id
    String,         // event_type
    String,         // content
    i64,            // publish_ts
    Option<String>, // client_publish_ts
    String,         // message_type
    Option<String>, // message_group_id
    Option<i64>,    // seq
    Option<String>, // multi_part
    i64,            // retry_count
);

fn row_to_envelope(row: Row) -> Result<Envelope> {
    let multi_part_metadata: Option<MultiPartMetadata> = row
        .9
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Envelope {
        message_id: row.0,
        chat_id: row.1,
        event_type: row.2,
        content: serde_json::from_str(&row.3)?,
        publish_ts: row.4,
        client_publish_ts: row.5,
        message_type: MessageType::parse(&row.6).unwrap_or(MessageType::Fast),
        message_group_id: row.7,
        sequence_number: row.8,
        multi_part_metadata,
        retry_count: row.10.try_into().unwrap_or_default(),
    })
}

/// Cursors are opaque tokens encoding the index position of the last row of
/// a page: `base64(publish_ts:message_id)`.
fn encode_cursor(publish_ts: i64, message_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{publish_ts}:{message_id}"))
}

fn decode_cursor(cursor: &str) -> Result<(i64, String)> {
    let raw = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| Error::BadCursor)?;
    let raw = String::from_utf8(raw).map_err(|_| Error::BadCursor)?;
    let (ts, id) = raw.split_once(':').ok_or(Error::BadCursor)?;
    if id.is_empty() {
        return Err(Error::BadCursor);
    }
    let ts = ts.parse().map_err(|_| Error::BadCursor)?;
    Ok((ts, id.to_string()))
}
