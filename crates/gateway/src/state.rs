use std::{sync::Arc, time::Duration};

use {
    relay_auth::TokenVerifier,
    relay_config::RelayConfig,
    relay_lanes::{DeadLetterSink, FastQueue, OrderedQueue},
    relay_registry::ConnectionRegistry,
    relay_store::{HistoryStore, PermissionStore, SequenceService},
};

use crate::ack::PendingAcks;

/// Shared broker runtime state, wrapped in Arc for use across async tasks.
pub struct BrokerState {
    pub config: RelayConfig,
    /// Live connections and the chat subscription index.
    pub registry: Arc<ConnectionRegistry>,
    /// Ordered-lane substrate.
    pub ordered: Arc<OrderedQueue>,
    /// Fast-lane substrate.
    pub fast: Arc<FastQueue>,
    pub permissions: Arc<dyn PermissionStore>,
    pub sequences: Arc<dyn SequenceService>,
    pub history: Arc<dyn HistoryStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Publishes awaiting an ACK toward their originating connection.
    pub acks: PendingAcks,
    pub dead_letters: Arc<DeadLetterSink>,
}

impl BrokerState {
    pub fn new(
        config: RelayConfig,
        permissions: Arc<dyn PermissionStore>,
        sequences: Arc<dyn SequenceService>,
        history: Arc<dyn HistoryStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Arc<Self> {
        let dead_letters = Arc::new(DeadLetterSink::new());
        let ordered = Arc::new(OrderedQueue::new(
            Duration::from_millis(config.lanes.dedup_window_ms),
            config.lanes.max_receives,
            Arc::clone(&dead_letters),
        ));
        let fast = Arc::new(FastQueue::new(
            config.lanes.max_receives,
            Arc::clone(&dead_letters),
        ));
        let registry = Arc::new(ConnectionRegistry::new(config.registry.writer_buffer));
        let acks = PendingAcks::new(Duration::from_millis(config.ack.timeout_ms));

        Arc::new(Self {
            config,
            registry,
            ordered,
            fast,
            permissions,
            sequences,
            history,
            verifier,
            acks,
            dead_letters,
        })
    }
}
