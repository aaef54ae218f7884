//! Fast lane: unordered queue drained in batches with no batching delay.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use {relay_protocol::Envelope, tokio::sync::Notify};

use crate::{DeadLetter, DeadLetterSink, Delivery, DeliveryHandle, Enqueued, Error, Result};

struct Queued {
    envelope: Envelope,
    receives: u32,
}

struct Inner {
    queue: VecDeque<Queued>,
    in_flight: HashMap<u64, Queued>,
    next_handle: u64,
    closed: bool,
}

/// Best-effort-ordered queue. `receive_batch` returns as soon as anything is
/// queued, up to the batch cap; items are acked/nacked individually so only
/// failed items redeliver.
pub struct FastQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    dead_letters: Arc<DeadLetterSink>,
    max_receives: u32,
}

impl FastQueue {
    #[must_use]
    pub fn new(max_receives: u32, dead_letters: Arc<DeadLetterSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                in_flight: HashMap::new(),
                next_handle: 0,
                closed: false,
            }),
            notify: Notify::new(),
            dead_letters,
            max_receives,
        }
    }

    /// Returning `Ok` is the durability confirmation ACK emission waits on.
    pub fn enqueue(&self, envelope: Envelope) -> Result<Enqueued> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.queue.push_back(Queued {
            envelope,
            receives: 0,
        });
        self.notify.notify_one();
        Ok(Enqueued::Accepted)
    }

    /// Wait until at least one item is queued, then drain up to `max`
    /// immediately; the lane never waits to fill a batch.
    pub async fn receive_batch(&self, max: usize) -> Vec<Delivery> {
        loop {
            let notified = self.notify.notified();
            let batch = self.try_receive_batch(max);
            if !batch.is_empty() {
                return batch;
            }
            notified.await;
        }
    }

    fn try_receive_batch(&self, max: usize) -> Vec<Delivery> {
        let mut inner = self.lock();
        let take = inner.queue.len().min(max);
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(mut item) = inner.queue.pop_front() else {
                break;
            };
            let mut envelope = item.envelope.clone();
            envelope.retry_count = item.receives;
            item.receives += 1;
            let handle = inner.next_handle;
            inner.next_handle += 1;
            inner.in_flight.insert(handle, item);
            batch.push(Delivery {
                envelope,
                handle: DeliveryHandle(handle),
            });
        }
        if !inner.queue.is_empty() {
            // More items remain; wake another worker.
            self.notify.notify_one();
        }
        batch
    }

    pub fn ack(&self, handle: DeliveryHandle) {
        self.lock().in_flight.remove(&handle.0);
    }

    /// Failed item: requeue at the back with a bumped retry count, or
    /// dead-letter once the receive budget is spent.
    pub fn nack(&self, handle: DeliveryHandle, reason: &str) {
        let letter = {
            let mut inner = self.lock();
            let Some(mut item) = inner.in_flight.remove(&handle.0) else {
                return;
            };
            if item.receives >= self.max_receives {
                item.envelope.retry_count = item.receives - 1;
                Some(DeadLetter {
                    envelope: item.envelope,
                    reason: reason.to_string(),
                })
            } else {
                item.envelope.retry_count = item.receives;
                inner.queue.push_back(item);
                self.notify.notify_one();
                None
            }
        };
        if let Some(letter) = letter {
            self.dead_letters.push(letter);
        }
    }

    /// Stop accepting publishes. In-flight and queued items still drain.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().queue.len()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fast lane state poisoned")
    }
}
