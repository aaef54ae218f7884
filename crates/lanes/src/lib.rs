//! The two delivery lanes and their in-process queue substrate.
//!
//! The ordered lane preserves per-group FIFO with content deduplication and
//! hands the processor one item per group at a time. The fast lane drains
//! batches of up to ten and processes the items of a batch in parallel.
//! Both report failures per item, so the substrate redelivers only what
//! actually failed; items that exhaust their receive budget move to the
//! dead-letter sink.

mod dead_letter;
mod dedup;
mod dispatcher;
mod fast;
mod ordered;

pub use {
    dead_letter::{DeadLetter, DeadLetterSink},
    dispatcher::{EnvelopeHandler, LaneWorkers, spawn_fast_workers, spawn_ordered_workers},
    fast::FastQueue,
    ordered::OrderedQueue,
};

/// Crate-wide result type for lane operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The queue is shut down and accepts no further work.
    #[error("lane is closed")]
    Closed,
}

/// Outcome of a lane enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Collapsed into an earlier byte-identical publish within the dedup
    /// window (ordered lane only).
    Deduplicated,
}

/// Opaque receipt for one in-flight delivery; pass back to `ack` or `nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(pub(crate) u64);

/// One item handed to a lane worker. The queue retains its own copy of the
/// envelope until the delivery is acked, so a nack can redeliver without
/// round-tripping the payload through the handler.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: relay_protocol::Envelope,
    pub handle: DeliveryHandle,
}
