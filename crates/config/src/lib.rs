//! Broker configuration: schema, discovery, and loading.

mod loader;
mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        AckConfig, AuthConfig, HistoryConfig, LaneConfig, RegistryConfig, RelayConfig,
        ServerConfig, StoreConfig,
    },
};
