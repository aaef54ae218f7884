use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header},
    serde::Deserialize,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{Claims, Error, Result};

/// Verifies a bearer token and yields its claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims>;
}

fn base_validation(alg: Algorithm, issuer: Option<&str>, audience: Option<&str>) -> Validation {
    let mut validation = Validation::new(alg);
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    match audience {
        Some(aud) => validation.set_audience(&[aud]),
        // jsonwebtoken requires an audience once `aud` appears in the token;
        // we accept tokens with or without one unless configured.
        None => validation.validate_aud = false,
    }
    validation
}

// ── HS256 (shared secret) ────────────────────────────────────────────────────

/// Shared-secret verifier for local deployments and tests.
pub struct Hs256Verifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256Verifier {
    #[must_use]
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: base_validation(Algorithm::HS256, issuer, audience),
        }
    }
}

#[async_trait]
impl TokenVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }
}

// ── RS256 via JWKS ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// RS256 verifier that resolves signing keys from a JWKS endpoint.
///
/// Keys are cached by `kid`; an unknown `kid` triggers one refetch so key
/// rotation does not require a restart.
pub struct JwksVerifier {
    url: String,
    client: reqwest::Client,
    validation: Validation,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

impl JwksVerifier {
    #[must_use]
    pub fn new(url: impl Into<String>, issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            validation: base_validation(Algorithm::RS256, issuer, audience),
            keys: RwLock::new(HashMap::new()),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let doc: JwksDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let mut keys = self.keys.write().await;
        keys.clear();
        for jwk in doc.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                },
                Err(err) => warn!(kid = %kid, error = %err, "skipping unparseable JWK"),
            }
        }
        debug!(count = keys.len(), "JWKS refreshed");
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(Some(key.clone()));
        }
        self.refresh().await?;
        Ok(self.keys.read().await.get(kid).cloned())
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token).map_err(|e| Error::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::InvalidToken("token header has no kid".into()))?;
        let key = self
            .key_for(&kid)
            .await?
            .ok_or_else(|| Error::InvalidToken(format!("no JWKS key for kid {kid}")))?;
        let data = decode::<Claims>(token, &key, &self.validation)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        Ok(data.claims)
    }
}

// ── Config wiring ────────────────────────────────────────────────────────────

/// Build the verifier described by the auth config section.
///
/// JWKS wins when both sources are configured; no source at all is a
/// startup error (the broker never runs unauthenticated).
pub fn verifier_from_config(
    cfg: &relay_config::AuthConfig,
) -> std::result::Result<Arc<dyn TokenVerifier>, String> {
    let issuer = cfg.issuer.as_deref();
    let audience = cfg.audience.as_deref();
    if let Some(url) = &cfg.jwks_url {
        return Ok(Arc::new(JwksVerifier::new(url, issuer, audience)));
    }
    if let Some(secret) = &cfg.hs256_secret {
        return Ok(Arc::new(Hs256Verifier::new(secret, issuer, audience)));
    }
    Err("auth requires either jwks_url or hs256_secret".into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;
    use crate::Claims;

    fn token(secret: &str, sub: &str, exp_offset: i64) -> String {
        let exp = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + exp_offset) as u64;
        let claims = Claims {
            sub: sub.into(),
            iss: None,
            aud: None,
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn hs256_accepts_valid_token() {
        let verifier = Hs256Verifier::new("s3cret", None, None);
        let claims = verifier.verify(&token("s3cret", "user-1", 600)).await.unwrap();
        assert_eq!(claims.user_id().unwrap(), "user-1");
    }

    #[tokio::test]
    async fn hs256_rejects_wrong_secret() {
        let verifier = Hs256Verifier::new("s3cret", None, None);
        let err = verifier.verify(&token("other", "user-1", 600)).await;
        assert!(matches!(err, Err(Error::InvalidToken(_))));
    }

    #[tokio::test]
    async fn hs256_rejects_expired_token() {
        let verifier = Hs256Verifier::new("s3cret", None, None);
        let err = verifier.verify(&token("s3cret", "user-1", -600)).await;
        assert!(matches!(err, Err(Error::InvalidToken(_))));
    }

    #[tokio::test]
    async fn jwks_fetch_failure_is_unavailable() {
        // Port 9 is discard; nothing is listening.
        let verifier = JwksVerifier::new("http://127.0.0.1:9/jwks.json", None, None);
        // A syntactically valid RS256 token header with a kid.
        let header = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0";
        let token = format!("{header}.e30.sig");
        let err = verifier.verify(&token).await;
        assert!(matches!(err, Err(Error::Unavailable(_))));
    }

    #[test]
    fn config_prefers_jwks() {
        let cfg = relay_config::AuthConfig {
            hs256_secret: Some("x".into()),
            jwks_url: Some("http://localhost/jwks".into()),
            issuer: None,
            audience: None,
        };
        assert!(verifier_from_config(&cfg).is_ok());

        let none = relay_config::AuthConfig::default();
        assert!(verifier_from_config(&none).is_err());
    }
}
