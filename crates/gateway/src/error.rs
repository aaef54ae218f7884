//! Gateway error kinds and their HTTP mapping.
//!
//! Validation and authorization failures are non-retriable (4xx);
//! substrate/store trouble is retriable (503). `gone` recipients never reach
//! this type; the processor recovers them locally.

use std::future::Future;

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    relay_protocol::{ErrorBody, error_codes},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => error_codes::BAD_REQUEST,
            Self::Unauthenticated(_) => error_codes::UNAUTHENTICATED,
            Self::Forbidden => error_codes::FORBIDDEN,
            Self::NotFound(_) => error_codes::NOT_FOUND,
            Self::Unavailable(_) => error_codes::UNAVAILABLE,
            Self::Timeout => error_codes::TIMEOUT,
            Self::Internal(_) => error_codes::INTERNAL,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) | Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human detail for the WebSocket error frame / HTTP body.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::BadRequest(m)
            | Self::Unauthenticated(m)
            | Self::Unavailable(m)
            | Self::NotFound(m)
            | Self::Internal(m) => m.clone(),
            Self::Forbidden => "no permission for this chat".into(),
            Self::Timeout => "deadline exceeded".into(),
        }
    }
}

/// Apply a request deadline; missing it surfaces as `timeout` (503).
pub async fn with_deadline<T>(
    ms: u64,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(std::time::Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = match &self {
            // The bare code is the contract for authorization failures.
            Self::Forbidden => ErrorBody::new(self.code()),
            _ => ErrorBody::new(self.code()).with_message(self.detail()),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<relay_auth::Error> for Error {
    fn from(err: relay_auth::Error) -> Self {
        match err {
            relay_auth::Error::InvalidToken(m) => Self::Unauthenticated(m),
            // A verified token without a principal: authenticated transport,
            // no usable identity.
            relay_auth::Error::MissingUser => Self::Forbidden,
            relay_auth::Error::Unavailable(m) => Self::Unavailable(m),
        }
    }
}

impl From<relay_store::Error> for Error {
    fn from(err: relay_store::Error) -> Self {
        match err {
            relay_store::Error::BadCursor => Self::BadRequest("malformed startKey".into()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<relay_lanes::Error> for Error {
    fn from(err: relay_lanes::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
