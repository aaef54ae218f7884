//! End-to-end acknowledgement bookkeeping.
//!
//! An entry exists only between a `requestAck` publish and the ACK frame
//! leaving toward the originating connection; entries also die with their
//! deadline or their connection.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use {
    relay_protocol::AckFrame,
    relay_registry::{ConnectionRegistry, SendOutcome},
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

pub struct PendingAck {
    pub conn_id: String,
    pub deadline: Instant,
}

/// Ingress-side map `ackId → pending entry` with bounded lifetime.
pub struct PendingAcks {
    inner: RwLock<HashMap<String, PendingAck>>,
    timeout: Duration,
}

impl PendingAcks {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn insert(&self, ack_id: &str, conn_id: &str) {
        self.inner.write().await.insert(ack_id.to_string(), PendingAck {
            conn_id: conn_id.to_string(),
            deadline: Instant::now() + self.timeout,
        });
    }

    pub async fn take(&self, ack_id: &str) -> Option<PendingAck> {
        self.inner.write().await.remove(ack_id)
    }

    /// Drop every entry belonging to a closed connection.
    pub async fn discard_for_conn(&self, conn_id: &str) {
        self.inner
            .write()
            .await
            .retain(|_, pending| pending.conn_id != conn_id);
    }

    /// Drop entries past their deadline. Expired ACKs are discarded
    /// silently; the message itself was already enqueued.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, pending| pending.deadline > now);
        let swept = before - inner.len();
        if swept > 0 {
            debug!(swept, "expired pending ACKs discarded");
        }
        swept
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Emit the ACK frame for a durably enqueued publish. Called after the lane
/// confirms the enqueue; a failed send is logged and swallowed, and the
/// message is still delivered.
pub async fn emit_ack(
    acks: &PendingAcks,
    registry: &ConnectionRegistry,
    ack_id: &str,
    message_id: &str,
    message_type: &str,
) {
    let Some(pending) = acks.take(ack_id).await else {
        // Deadline sweeper or connection cleanup got here first.
        return;
    };
    let Some(writer) = registry.writer(&pending.conn_id).await else {
        debug!(ack_id = %ack_id, conn_id = %pending.conn_id, "ACK target already disconnected");
        return;
    };
    let frame = AckFrame::success(ack_id, message_id, message_type);
    match serde_json::to_string(&frame) {
        Ok(json) => {
            if writer.send(&json) != SendOutcome::Sent {
                warn!(ack_id = %ack_id, conn_id = %pending.conn_id, "failed to deliver ACK frame");
            }
        },
        Err(e) => warn!(ack_id = %ack_id, error = %e, "failed to serialize ACK frame"),
    }
}
