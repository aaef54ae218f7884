//! Config schema types (server, auth, lanes, history, ack, registry, store).
//!
//! Every section defaults to the documented limits so a missing config file
//! yields a fully usable broker.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub lanes: LaneConfig,
    pub history: HistoryConfig,
    pub ack: AckConfig,
    pub registry: RegistryConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Deadline applied to each publish/read request.
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            request_timeout_ms: 10_000,
        }
    }
}

/// Token verification settings. Exactly one of `hs256_secret` / `jwks_url`
/// is normally set; when both are present the JWKS verifier wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for HS256 tokens (supports `${ENV}` substitution).
    pub hs256_secret: Option<String>,
    /// JWKS document URL for RS256 tokens.
    pub jwks_url: Option<String>,
    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,
    /// Expected `aud` claim, if any.
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    /// Max items drained per fast-lane batch.
    pub fast_batch: usize,
    pub fast_workers: usize,
    pub ordered_workers: usize,
    /// Receives before an item is dead-lettered.
    pub max_receives: u32,
    /// Per-batch processing deadline.
    pub batch_deadline_ms: u64,
    /// Ordered-lane content dedup window.
    pub dedup_window_ms: u64,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            fast_batch: 10,
            fast_workers: 4,
            ordered_workers: 4,
            max_receives: 3,
            batch_deadline_ms: 10_000,
            dedup_window_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention_days: i64,
    pub default_page: u32,
    pub max_page: u32,
    pub sweep_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            default_page: 50,
            max_page: 100,
            sweep_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AckConfig {
    pub timeout_ms: u64,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Bound of each connection's writer channel.
    pub writer_buffer: usize,
    /// Grace period before a persistently full writer is reaped.
    pub writer_retry_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            writer_buffer: 64,
            writer_retry_ms: 25,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite connection string; `None` resolves to `<data-dir>/relay.db`.
    pub database_url: Option<String>,
}
