//! The broker itself: ingress surfaces, lane wiring, the processor that
//! fans messages out to subscribers, and the history/permission HTTP API.

pub mod ack;
pub mod error;
pub mod processor;
pub mod publish;
pub mod routes;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    error::{Error, Result},
    server::{BrokerHandle, build_app, start},
    state::BrokerState,
};
