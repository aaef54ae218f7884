//! Connection registry: the single owner of live subscriber connections.
//!
//! The registry holds one record per connected WebSocket client, indexed by
//! connection id and by subscribed chat id. It is the only mutator of both
//! maps; the processor works from read-lock snapshots and reports dead
//! connections back through [`ConnectionRegistry::drop_gone`].

use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

use {
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info},
};

/// Crate-wide result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport handed out the same connection id twice.
    #[error("duplicate connection id: {conn_id}")]
    Duplicate { conn_id: String },
}

// ── Writer channel ───────────────────────────────────────────────────────────

/// Outcome of a non-blocking frame send toward one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Writer buffer is full; the consumer is slow but alive.
    Full,
    /// The receive half is dropped; the peer is gone.
    Gone,
}

/// Cloneable send half of a connection's bounded writer channel.
///
/// Sends never block: a slow consumer surfaces as [`SendOutcome::Full`] and
/// the caller decides whether to retry briefly or reap the connection.
#[derive(Debug, Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<String>,
}

impl FrameWriter {
    #[must_use]
    pub fn send(&self, frame: &str) -> SendOutcome {
        match self.tx.try_send(frame.to_string()) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Gone,
        }
    }
}

// ── Connection record ────────────────────────────────────────────────────────

/// One live subscriber connection. The writer's receive half is owned by the
/// socket write loop; the registry owns the record and the send half.
#[derive(Debug)]
pub struct Connection {
    pub conn_id: String,
    pub user_id: String,
    /// Chats this connection subscribed to at connect time (fixed for the
    /// connection's lifetime).
    pub chat_ids: Vec<String>,
    pub writer: FrameWriter,
    pub connected_at: Instant,
}

/// Snapshot entry handed to the fan-out path.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub conn_id: String,
    pub writer: FrameWriter,
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    conns: HashMap<String, Connection>,
    by_chat: HashMap<String, HashSet<String>>,
}

/// Registry of live connections plus the chat subscription index.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    writer_buffer: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(writer_buffer: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            writer_buffer,
        }
    }

    /// Insert a connection and index it under each of its chats. Returns the
    /// receive half of the new bounded writer channel for the socket write
    /// loop.
    pub async fn register(
        &self,
        conn_id: &str,
        user_id: &str,
        chat_ids: Vec<String>,
    ) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(self.writer_buffer);
        let mut inner = self.inner.write().await;
        if inner.conns.contains_key(conn_id) {
            return Err(Error::Duplicate {
                conn_id: conn_id.to_string(),
            });
        }
        for chat_id in &chat_ids {
            inner
                .by_chat
                .entry(chat_id.clone())
                .or_default()
                .insert(conn_id.to_string());
        }
        inner.conns.insert(conn_id.to_string(), Connection {
            conn_id: conn_id.to_string(),
            user_id: user_id.to_string(),
            chat_ids,
            writer: FrameWriter { tx },
            connected_at: Instant::now(),
        });
        info!(conn_id = %conn_id, user_id = %user_id, "connection registered");
        Ok(rx)
    }

    /// Remove a connection from the primary map and every chat index entry in
    /// one critical section. Dropping the record closes the writer; the write
    /// loop drains and exits. Idempotent.
    pub async fn unregister(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.conns.remove(conn_id) else {
            return;
        };
        for chat_id in &conn.chat_ids {
            if let Some(set) = inner.by_chat.get_mut(chat_id) {
                set.remove(conn_id);
                if set.is_empty() {
                    inner.by_chat.remove(chat_id);
                }
            }
        }
        info!(
            conn_id = %conn_id,
            duration_secs = conn.connected_at.elapsed().as_secs(),
            "connection unregistered"
        );
    }

    /// Reap a connection whose transport reported gone. Same disposal path
    /// as a graceful close.
    pub async fn drop_gone(&self, conn_id: &str) {
        debug!(conn_id = %conn_id, "reaping gone connection");
        self.unregister(conn_id).await;
    }

    /// Snapshot of the current subscribers of a chat, sufficient for one
    /// fan-out pass. Never blocks connects/disconnects beyond the read lock;
    /// unknown chats yield an empty list.
    pub async fn subscribers(&self, chat_id: &str) -> Vec<Recipient> {
        let inner = self.inner.read().await;
        let Some(conn_ids) = inner.by_chat.get(chat_id) else {
            return Vec::new();
        };
        conn_ids
            .iter()
            .filter_map(|id| inner.conns.get(id))
            .map(|c| Recipient {
                conn_id: c.conn_id.clone(),
                writer: c.writer.clone(),
            })
            .collect()
    }

    /// Writer for a single connection (ACK delivery path).
    pub async fn writer(&self, conn_id: &str) -> Option<FrameWriter> {
        self.inner
            .read()
            .await
            .conns
            .get(conn_id)
            .map(|c| c.writer.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.conns.len()
    }
}
