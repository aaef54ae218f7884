//! Broker wire protocol definitions.
//!
//! All communication uses JSON frames. Three directions:
//! - client → broker: action frames over WebSocket (`sendMessage`) or the
//!   same body as `POST /publish`
//! - broker → originating client: ACK frames
//! - broker → subscribers: fan-out frames (the serialized [`Envelope`])

use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod frames;

pub use envelope::{Envelope, MessageType, MultiPartMetadata};
pub use frames::{AckFrame, ClientFrame, ErrorFrame, PublishPayload, PublishReceipt, PublishRequest};

// ── Constants ────────────────────────────────────────────────────────────────

/// Per-frame payload cap on the WebSocket ingress. Operational tunables
/// (batch sizes, dedup window, retention) live in the config schema.
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KB

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const BAD_REQUEST: &str = "bad-request";
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not-found";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const TIMEOUT: &str = "timeout";
    pub const INTERNAL: &str = "internal";
}

// ── Wire timestamp encoding ──────────────────────────────────────────────────

/// Serde adapter: epoch-millis `i64` internally, ISO-8601 string on the wire.
pub mod iso_millis {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(ms: &i64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&relay_common::time::to_iso8601(*ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(de)?;
        relay_common::time::from_iso8601(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }
}

// ── Error shape (HTTP bodies) ────────────────────────────────────────────────

/// JSON body returned on HTTP errors: `{ "error": "forbidden", ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            error: code.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
