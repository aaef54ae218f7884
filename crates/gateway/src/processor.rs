//! Dispatch and fan-out: one envelope in, every live subscriber out.
//!
//! Both lanes drive the same processor; the ordered lane's instance also
//! stamps the per-chat sequence number, which happens after FIFO ordering
//! so sequence numbers match publish order.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    relay_common::Context as _,
    relay_lanes::EnvelopeHandler,
    relay_protocol::Envelope,
    relay_registry::{ConnectionRegistry, FrameWriter, SendOutcome},
    relay_store::{HistoryStore, SequenceService},
    tracing::{debug, warn},
};

pub struct Processor {
    registry: Arc<ConnectionRegistry>,
    sequences: Arc<dyn SequenceService>,
    history: Arc<dyn HistoryStore>,
    /// Ordered-lane instances stamp per-chat sequence numbers.
    sequencing: bool,
    /// Grace period for a full writer before the recipient is reaped.
    writer_retry: Duration,
}

impl Processor {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sequences: Arc<dyn SequenceService>,
        history: Arc<dyn HistoryStore>,
        sequencing: bool,
        writer_retry: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sequences,
            history,
            sequencing,
            writer_retry,
        })
    }
}

#[async_trait]
impl EnvelopeHandler for Processor {
    async fn handle(&self, envelope: &Envelope) -> relay_common::Result<()> {
        let mut envelope = envelope.clone();

        // 1. Sequence assignment (ordered lane, after FIFO ordering).
        if self.sequencing && envelope.message_type.is_ordered() {
            let seq = self
                .sequences
                .next(&envelope.chat_id)
                .await
                .context("sequence service")?;
            envelope.sequence_number = Some(seq);
        }

        // 2. Recipient snapshot.
        let recipients = self.registry.subscribers(&envelope.chat_id).await;

        // 3. Serialize once, outside the per-recipient loop.
        let frame = serde_json::to_string(&envelope).context("serialize envelope")?;

        // 4. Fan-out: all recipient writes launched concurrently, awaited
        //    together. A gone recipient is reaped and never fails the batch.
        let mut sends = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let frame = frame.clone();
            let retry = self.writer_retry;
            let conn_id = recipient.conn_id.clone();
            sends.push((
                conn_id,
                tokio::spawn(async move { send_with_retry(&recipient.writer, &frame, retry).await }),
            ));
        }
        for (conn_id, send) in sends {
            match send.await {
                Ok(SendOutcome::Sent) => {},
                Ok(SendOutcome::Gone) => {
                    debug!(conn_id = %conn_id, "recipient gone, reaping");
                    self.registry.drop_gone(&conn_id).await;
                },
                Ok(SendOutcome::Full) => {
                    // Still saturated after the retry window: soft failure,
                    // treated like a gone peer.
                    warn!(conn_id = %conn_id, "writer saturated, reaping slow recipient");
                    self.registry.drop_gone(&conn_id).await;
                },
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "recipient send task failed");
                },
            }
        }

        // 5. Durable append. Failure redelivers the envelope; the append is
        //    idempotent by message id, so the retry cannot double-store.
        self.history.put(&envelope).await.context("history append")?;

        debug!(
            message_id = %envelope.message_id,
            chat_id = %envelope.chat_id,
            seq = envelope.sequence_number,
            "envelope processed"
        );
        Ok(())
    }
}

/// Non-blocking send with one short retry for a full writer.
async fn send_with_retry(writer: &FrameWriter, frame: &str, retry: Duration) -> SendOutcome {
    match writer.send(frame) {
        SendOutcome::Full => {
            tokio::time::sleep(retry).await;
            writer.send(frame)
        },
        outcome => outcome,
    }
}
