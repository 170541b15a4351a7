//! JWKS document cache, refreshed on the configured poll interval.

use std::str::FromStr;
use std::time::{Duration, Instant};

use jwt_compact::jwk::JsonWebKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

use super::{AuthResult, error::AuthError};

/// Signing algorithms accepted on caller tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Alg {
    HS256,
    HS384,
    HS512,
    ES256,
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    EdDSA,
}

impl FromStr for Alg {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "HS256" => Ok(Alg::HS256),
            "HS384" => Ok(Alg::HS384),
            "HS512" => Ok(Alg::HS512),
            "ES256" => Ok(Alg::ES256),
            "RS256" => Ok(Alg::RS256),
            "RS384" => Ok(Alg::RS384),
            "RS512" => Ok(Alg::RS512),
            "PS256" => Ok(Alg::PS256),
            "PS384" => Ok(Alg::PS384),
            "PS512" => Ok(Alg::PS512),
            "EdDSA" => Ok(Alg::EdDSA),
            _ => Err(()),
        }
    }
}

/// One key from the provider's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Jwk {
    #[serde(flatten)]
    pub key: JsonWebKey<'static>,
    #[serde(default, rename = "kid")]
    pub key_id: Option<String>,
}

/// The provider's key set.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Fetches and caches the JWKS document.
pub(crate) struct JwksCache {
    url: Url,
    client: reqwest::Client,
    poll_interval: Duration,
    cached: RwLock<Option<(Jwks, Instant)>>,
}

impl JwksCache {
    pub fn new(url: Url, poll_interval: Duration) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            poll_interval,
            cached: RwLock::new(None),
        }
    }

    /// The current key set, re-fetched once the poll interval elapses. A
    /// failed refresh keeps serving the previous document.
    pub async fn get(&self) -> AuthResult<Jwks> {
        {
            let cached = self.cached.read().await;
            if let Some((jwks, fetched_at)) = cached.as_ref()
                && fetched_at.elapsed() < self.poll_interval
            {
                return Ok(jwks.clone());
            }
        }

        let mut cached = self.cached.write().await;

        // Another task refreshed while we waited for the write lock.
        if let Some((jwks, fetched_at)) = cached.as_ref()
            && fetched_at.elapsed() < self.poll_interval
        {
            return Ok(jwks.clone());
        }

        match self.fetch().await {
            Ok(jwks) => {
                *cached = Some((jwks.clone(), Instant::now()));
                Ok(jwks)
            }
            Err(err) => {
                log::error!("JWKS refresh from {} failed: {err}", self.url);

                match cached.as_ref() {
                    Some((stale, _)) => Ok(stale.clone()),
                    None => Err(AuthError::Internal),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Jwks, String> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("provider returned {status}"));
        }

        // Deserialize through Value so the keys own their data.
        let document: serde_json::Value = response.json().await.map_err(|err| format!("malformed body: {err}"))?;
        serde_json::from_value(document).map_err(|err| format!("malformed key set: {err}"))
    }
}
