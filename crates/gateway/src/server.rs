//! Router assembly, lane worker wiring, and the serve loop.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        routing::{get, post},
    },
    relay_lanes::{LaneWorkers, spawn_fast_workers, spawn_ordered_workers},
    relay_store::HistoryStore as _,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{processor::Processor, routes, state::BrokerState, ws};

/// Running broker background work: lane workers plus the ACK/history
/// sweepers, all tied to one shutdown token.
pub struct BrokerHandle {
    pub shutdown: CancellationToken,
    ordered_workers: LaneWorkers,
    fast_workers: LaneWorkers,
}

impl BrokerHandle {
    /// Cancel background work and wait for the lane workers to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.ordered_workers.join().await;
        self.fast_workers.join().await;
    }
}

/// Build the HTTP/WebSocket router. Kept separate from [`run`] so tests can
/// bind an ephemeral port.
pub fn build_app(state: Arc<BrokerState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/publish", post(routes::publish_handler))
        .route("/messages", get(routes::messages_handler))
        .route(
            "/permissions",
            post(routes::grant_permission_handler)
                .delete(routes::revoke_permission_handler)
                .get(routes::list_permissions_handler),
        )
        .route("/ws", get(ws::ws_upgrade_handler))
        .with_state(state)
}

/// Spawn the lane workers and periodic sweepers.
pub fn start(state: &Arc<BrokerState>) -> BrokerHandle {
    let shutdown = CancellationToken::new();
    let lanes = &state.config.lanes;
    let deadline = Duration::from_millis(lanes.batch_deadline_ms);
    let writer_retry = Duration::from_millis(state.config.registry.writer_retry_ms);

    // The ordered-lane processor stamps sequence numbers; both share the
    // same fan-out and persistence path.
    let ordered_processor = Processor::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.sequences),
        Arc::clone(&state.history),
        true,
        writer_retry,
    );
    let fast_processor = Processor::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.sequences),
        Arc::clone(&state.history),
        false,
        writer_retry,
    );

    let ordered_workers = spawn_ordered_workers(
        Arc::clone(&state.ordered),
        ordered_processor,
        lanes.ordered_workers,
        deadline,
        shutdown.clone(),
    );
    let fast_workers = spawn_fast_workers(
        Arc::clone(&state.fast),
        fast_processor,
        lanes.fast_workers,
        lanes.fast_batch,
        deadline,
        shutdown.clone(),
    );

    // Pending-ACK deadline sweeper.
    {
        let state = Arc::clone(state);
        let shutdown = shutdown.clone();
        let period = Duration::from_millis(state.config.ack.timeout_ms.max(1_000) / 2);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        state.acks.sweep_expired().await;
                    },
                }
            }
        });
    }

    // History TTL sweeper.
    {
        let state = Arc::clone(state);
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(state.config.history.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so startup stays quick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = state.history.sweep_expired().await {
                            warn!(error = %e, "history sweep failed");
                        }
                    },
                }
            }
        });
    }

    BrokerHandle {
        shutdown,
        ordered_workers,
        fast_workers,
    }
}

/// Start background work, bind the configured address, and serve until
/// ctrl-c.
pub async fn run(state: Arc<BrokerState>) -> relay_common::Result<()> {
    let handle = start(&state);

    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "broker listening");

    let shutdown = handle.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let app = build_app(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(handle.shutdown.clone().cancelled_owned())
        .await?;

    // Refuse new publishes, then stop the lane workers.
    state.ordered.close();
    state.fast.close();
    handle.stop().await;
    info!("broker stopped");
    Ok(())
}
