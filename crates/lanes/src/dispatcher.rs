//! Lane workers: pull from the queues, drive the processor, report per-item
//! results back to the substrate.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::{task::JoinHandle, time::timeout},
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

use crate::{FastQueue, OrderedQueue};

/// Processes one envelope end to end (sequence, fan-out, persistence).
/// An `Err` nacks the delivery so the substrate redelivers it.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &relay_protocol::Envelope) -> relay_common::Result<()>;
}

/// Handles of a lane's worker tasks.
pub struct LaneWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl LaneWorkers {
    /// Wait for every worker to exit (after the shutdown token fires).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawn ordered-lane workers. Each worker handles one delivery at a time;
/// parallelism across workers maps to parallelism across groups, while the
/// queue's one-in-flight-per-group discipline keeps each group serial.
pub fn spawn_ordered_workers(
    queue: Arc<OrderedQueue>,
    handler: Arc<dyn EnvelopeHandler>,
    workers: usize,
    deadline: Duration,
    shutdown: CancellationToken,
) -> LaneWorkers {
    let handles = (0..workers.max(1))
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        () = shutdown.cancelled() => break,
                        delivery = queue.receive() => delivery,
                    };
                    match timeout(deadline, handler.handle(&delivery.envelope)).await {
                        Ok(Ok(())) => queue.ack(delivery.handle),
                        Ok(Err(e)) => {
                            warn!(
                                worker,
                                message_id = %delivery.envelope.message_id,
                                error = %e,
                                "ordered item failed, redelivering"
                            );
                            queue.nack(delivery.handle, &e.to_string());
                        },
                        Err(_) => {
                            warn!(
                                worker,
                                message_id = %delivery.envelope.message_id,
                                "ordered item missed the batch deadline"
                            );
                            queue.nack(delivery.handle, "batch deadline exceeded");
                        },
                    }
                }
            })
        })
        .collect();
    LaneWorkers { handles }
}

/// Spawn fast-lane workers. Each worker drains a batch and processes its
/// items in parallel (one spawned task per item, awaited together) so a
/// slow item never serializes the rest of the batch.
pub fn spawn_fast_workers(
    queue: Arc<FastQueue>,
    handler: Arc<dyn EnvelopeHandler>,
    workers: usize,
    batch_size: usize,
    deadline: Duration,
    shutdown: CancellationToken,
) -> LaneWorkers {
    let handles = (0..workers.max(1))
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let batch = tokio::select! {
                        () = shutdown.cancelled() => break,
                        batch = queue.receive_batch(batch_size) => batch,
                    };
                    let tasks: Vec<_> = batch
                        .into_iter()
                        .map(|delivery| {
                            let handler = Arc::clone(&handler);
                            let handle = delivery.handle;
                            let message_id = delivery.envelope.message_id.clone();
                            let task = tokio::spawn(async move {
                                timeout(deadline, handler.handle(&delivery.envelope)).await
                            });
                            (handle, message_id, task)
                        })
                        .collect();

                    for (handle, message_id, task) in tasks {
                        match task.await {
                            Ok(Ok(Ok(()))) => queue.ack(handle),
                            Ok(Ok(Err(e))) => {
                                warn!(worker, message_id = %message_id, error = %e, "fast item failed, redelivering");
                                queue.nack(handle, &e.to_string());
                            },
                            Ok(Err(_)) => {
                                warn!(worker, message_id = %message_id, "fast item missed the batch deadline");
                                queue.nack(handle, "batch deadline exceeded");
                            },
                            Err(join_err) => {
                                warn!(worker, message_id = %message_id, error = %join_err, "fast item task aborted");
                                queue.nack(handle, "item task aborted");
                            },
                        }
                    }
                }
            })
        })
        .collect();
    LaneWorkers { handles }
}
