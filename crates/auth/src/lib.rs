//! Token verification for both ingress surfaces.
//!
//! The identity provider that mints tokens lives outside the broker; this
//! crate holds the contract the broker consumes: a verified token yields a
//! `userId` principal. Two verifiers are provided: a shared-secret HS256
//! verifier for local deployments and tests, and an RS256 verifier backed by
//! a JWKS document.

use serde::{Deserialize, Serialize};

mod verifier;

pub use verifier::{Hs256Verifier, JwksVerifier, TokenVerifier, verifier_from_config};

/// Crate-wide result type for token operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token is malformed, has a bad signature, or is expired.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token verified but carries no usable principal.
    #[error("token has no user id")]
    MissingUser,

    /// The key source (JWKS endpoint) could not be reached.
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

/// Claims the broker cares about. `sub` is the authenticated user id; a
/// token that verifies without one is authenticated transport with no
/// usable principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub exp: u64,
}

impl Claims {
    /// The authenticated principal, rejecting empty subjects.
    pub fn user_id(&self) -> Result<&str> {
        if self.sub.is_empty() {
            return Err(Error::MissingUser);
        }
        Ok(&self.sub)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }

    #[test]
    fn empty_subject_is_rejected() {
        let claims = Claims {
            sub: String::new(),
            iss: None,
            aud: None,
            exp: 0,
        };
        assert!(matches!(claims.user_id(), Err(Error::MissingUser)));
    }
}
