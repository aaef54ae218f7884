//! Ordered lane: per-group FIFO with content dedup and a single in-flight
//! delivery per group.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use {relay_protocol::Envelope, tokio::sync::Notify, tracing::debug};

use crate::{
    DeadLetter, DeadLetterSink, Delivery, DeliveryHandle, Enqueued, Error, Result,
    dedup::DedupWindow,
};

struct Queued {
    envelope: Envelope,
    /// Deliveries handed out so far.
    receives: u32,
}

struct InFlight {
    group: String,
    item: Queued,
}

struct Inner {
    groups: HashMap<String, VecDeque<Queued>>,
    /// Groups with queued items and no in-flight delivery, in arrival order.
    ready: VecDeque<String>,
    /// Groups currently holding an in-flight delivery.
    busy: HashSet<String>,
    in_flight: HashMap<u64, InFlight>,
    dedup: DedupWindow,
    next_handle: u64,
    closed: bool,
}

/// FIFO-per-group queue. The receive discipline hands out at most one item
/// per group at a time (batch size 1 per group); distinct groups are
/// deliverable concurrently. A nack requeues at the front of the group so
/// only the failed tail is redelivered.
pub struct OrderedQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    dead_letters: Arc<DeadLetterSink>,
    max_receives: u32,
}

impl OrderedQueue {
    #[must_use]
    pub fn new(dedup_window: Duration, max_receives: u32, dead_letters: Arc<DeadLetterSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: HashMap::new(),
                ready: VecDeque::new(),
                busy: HashSet::new(),
                in_flight: HashMap::new(),
                dedup: DedupWindow::new(dedup_window),
                next_handle: 0,
                closed: false,
            }),
            notify: Notify::new(),
            dead_letters,
            max_receives,
        }
    }

    /// Append to the envelope's group. Byte-identical payloads for the same
    /// group within the dedup window collapse to the first publish.
    ///
    /// Returning `Ok` is the durability confirmation ACK emission waits on.
    pub fn enqueue(&self, envelope: Envelope) -> Result<Enqueued> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        if inner.dedup.check_and_insert(&envelope.dedup_key()) {
            debug!(message_id = %envelope.message_id, "duplicate publish collapsed");
            return Ok(Enqueued::Deduplicated);
        }
        let group = envelope.group_id().to_string();
        let queue = inner.groups.entry(group.clone()).or_default();
        let was_empty = queue.is_empty();
        queue.push_back(Queued {
            envelope,
            receives: 0,
        });
        if was_empty && !inner.busy.contains(&group) {
            inner.ready.push_back(group);
            self.notify.notify_one();
        }
        Ok(Enqueued::Accepted)
    }

    /// Wait for the next deliverable item. The item's group stays locked
    /// until the delivery is acked or nacked.
    pub async fn receive(&self) -> Delivery {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_receive() {
                return delivery;
            }
            notified.await;
        }
    }

    fn try_receive(&self) -> Option<Delivery> {
        let mut inner = self.lock();
        let group = inner.ready.pop_front()?;
        // Wake the next worker if other groups are deliverable.
        if !inner.ready.is_empty() {
            self.notify.notify_one();
        }
        let queue = inner.groups.get_mut(&group)?;
        let mut item = queue.pop_front()?;
        let mut envelope = item.envelope.clone();
        envelope.retry_count = item.receives;
        item.receives += 1;

        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.busy.insert(group.clone());
        inner.in_flight.insert(handle, InFlight { group, item });
        Some(Delivery {
            envelope,
            handle: DeliveryHandle(handle),
        })
    }

    /// Delivery processed; release the group for its next item.
    pub fn ack(&self, handle: DeliveryHandle) {
        let mut inner = self.lock();
        let Some(done) = inner.in_flight.remove(&handle.0) else {
            return;
        };
        self.release_group(&mut inner, done.group);
    }

    /// Delivery failed; requeue at the front of the group with a bumped
    /// retry count, or dead-letter once the receive budget is spent.
    pub fn nack(&self, handle: DeliveryHandle, reason: &str) {
        let letter = {
            let mut inner = self.lock();
            let Some(failed) = inner.in_flight.remove(&handle.0) else {
                return;
            };
            let InFlight { group, mut item } = failed;
            if item.receives >= self.max_receives {
                item.envelope.retry_count = item.receives - 1;
                self.release_group(&mut inner, group);
                Some(DeadLetter {
                    envelope: item.envelope,
                    reason: reason.to_string(),
                })
            } else {
                item.envelope.retry_count = item.receives;
                inner.groups.entry(group.clone()).or_default().push_front(item);
                self.release_group(&mut inner, group);
                None
            }
        };
        if let Some(letter) = letter {
            self.dead_letters.push(letter);
        }
    }

    fn release_group(&self, inner: &mut Inner, group: String) {
        inner.busy.remove(&group);
        match inner.groups.get(&group) {
            Some(queue) if !queue.is_empty() => {
                inner.ready.push_back(group);
                self.notify.notify_one();
            },
            Some(_) => {
                inner.groups.remove(&group);
            },
            None => {},
        }
    }

    /// Stop accepting publishes. In-flight and queued items still drain.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Queued (not in-flight) items across all groups.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().groups.values().map(VecDeque::len).sum()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Never held across an await; poisoned means a worker panicked mid-update.
        self.inner.lock().expect("ordered lane state poisoned")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use relay_protocol::MessageType;

    use super::*;

    fn sink() -> Arc<DeadLetterSink> {
        Arc::new(DeadLetterSink::new())
    }

    fn queue(sink: &Arc<DeadLetterSink>) -> OrderedQueue {
        OrderedQueue::new(Duration::from_secs(300), 3, Arc::clone(sink))
    }

    fn envelope(id: &str, chat: &str, content: &str) -> Envelope {
        Envelope {
            message_id: id.into(),
            chat_id: chat.into(),
            event_type: "chat.message".into(),
            content: serde_json::json!(content),
            publish_ts: 0,
            client_publish_ts: None,
            message_type: MessageType::Ordered,
            message_group_id: None,
            sequence_number: None,
            multi_part_metadata: None,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn fifo_within_a_group() {
        let sink = sink();
        let q = queue(&sink);
        q.enqueue(envelope("m1", "c1", "a")).unwrap();
        q.enqueue(envelope("m2", "c1", "b")).unwrap();

        let first = q.receive().await;
        assert_eq!(first.envelope.message_id, "m1");
        q.ack(first.handle);

        let second = q.receive().await;
        assert_eq!(second.envelope.message_id, "m2");
        q.ack(second.handle);
    }

    #[tokio::test]
    async fn one_in_flight_per_group() {
        let sink = sink();
        let q = queue(&sink);
        q.enqueue(envelope("m1", "c1", "a")).unwrap();
        q.enqueue(envelope("m2", "c1", "b")).unwrap();

        let first = q.receive().await;
        // m2 is in the same group; nothing is deliverable until m1 resolves.
        assert!(q.try_receive().is_none());
        q.ack(first.handle);
        assert_eq!(q.receive().await.envelope.message_id, "m2");
    }

    #[tokio::test]
    async fn groups_deliver_concurrently() {
        let sink = sink();
        let q = queue(&sink);
        q.enqueue(envelope("m1", "c1", "a")).unwrap();
        q.enqueue(envelope("m2", "c2", "b")).unwrap();

        let first = q.receive().await;
        let second = q.receive().await;
        let mut chats = vec![first.envelope.chat_id.clone(), second.envelope.chat_id.clone()];
        chats.sort();
        assert_eq!(chats, ["c1", "c2"]);
    }

    #[tokio::test]
    async fn duplicate_content_collapses() {
        let sink = sink();
        let q = queue(&sink);
        assert_eq!(q.enqueue(envelope("m1", "c1", "same")).unwrap(), Enqueued::Accepted);
        assert_eq!(
            q.enqueue(envelope("m2", "c1", "same")).unwrap(),
            Enqueued::Deduplicated
        );
        assert_eq!(
            q.enqueue(envelope("m3", "c1", "different")).unwrap(),
            Enqueued::Accepted
        );
        assert_eq!(q.depth(), 2);
    }

    #[tokio::test]
    async fn nack_redelivers_front_with_bumped_retry() {
        let sink = sink();
        let q = queue(&sink);
        q.enqueue(envelope("m1", "c1", "a")).unwrap();
        q.enqueue(envelope("m2", "c1", "b")).unwrap();

        let first = q.receive().await;
        assert_eq!(first.envelope.retry_count, 0);
        q.nack(first.handle, "handler failed");

        // Same message comes back before m2, with the retry counter bumped.
        let redelivered = q.receive().await;
        assert_eq!(redelivered.envelope.message_id, "m1");
        assert_eq!(redelivered.envelope.retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_item_dead_letters_and_unblocks_group() {
        let sink = sink();
        let q = queue(&sink);
        q.enqueue(envelope("m1", "c1", "a")).unwrap();
        q.enqueue(envelope("m2", "c1", "b")).unwrap();

        for _ in 0..3 {
            let d = q.receive().await;
            assert_eq!(d.envelope.message_id, "m1");
            q.nack(d.handle, "persistent failure");
        }

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].envelope.message_id, "m1");
        // The group moves on.
        assert_eq!(q.receive().await.envelope.message_id, "m2");
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let sink = sink();
        let q = queue(&sink);
        q.close();
        assert!(matches!(q.enqueue(envelope("m1", "c1", "a")), Err(Error::Closed)));
    }
}
