//! RFC 8693 token exchange with per-key coalescing and an exp-bounded cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use mini_moka::sync::Cache;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;

use crate::ExecutorError;

const EXCHANGE_CACHE_CAPACITY: u64 = 100_000;
const EXCHANGE_ATTEMPTS: u32 = 3;
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

#[derive(Clone)]
struct CachedToken {
    token: SecretString,
    expires_at: Timestamp,
}

#[derive(serde::Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchanges caller tokens for upstream-audience tokens at the identity
/// provider's token endpoint.
///
/// Simultaneous exchanges for the same (subject, audience) share one
/// in-flight request; the result lands in a cache bounded both by the
/// configured TTL and by the returned token's own lifetime.
pub struct TokenExchanger {
    http: reqwest::Client,
    token_url: Url,
    cache: Cache<String, CachedToken>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    default_ttl: Duration,
}

impl TokenExchanger {
    /// Creates an exchanger against the given token endpoint.
    pub fn new(http: reqwest::Client, token_url: Url, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(EXCHANGE_CACHE_CAPACITY)
            .time_to_live(default_ttl)
            .build();

        Self {
            http,
            token_url,
            cache,
            inflight: DashMap::new(),
            default_ttl,
        }
    }

    /// Exchanges `caller_token` for a token scoped to `audience`,
    /// preserving the caller's subject identity.
    ///
    /// `subject` keys the cache; `required_scopes` is compared against the
    /// granted scope, and a narrower grant is accepted with a warning.
    pub async fn exchange(
        &self,
        subject: &str,
        caller_token: &SecretString,
        audience: &str,
        required_scopes: &[String],
    ) -> Result<SecretString, ExecutorError> {
        let key = cache_key(subject, audience);

        if let Some(cached) = self.fresh(&key) {
            return Ok(cached);
        }

        // Coalesce: simultaneous waiters for the same key queue on one lock
        // and all but the first find the cache populated.
        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(cached) = self.fresh(&key) {
            return Ok(cached);
        }

        let response = self.request_with_retries(caller_token, audience).await?;

        if let Some(granted) = response.scope.as_deref() {
            let granted: Vec<&str> = granted.split_whitespace().collect();
            let missing: Vec<&String> = required_scopes
                .iter()
                .filter(|scope| !granted.contains(&scope.as_str()))
                .collect();

            if !missing.is_empty() {
                log::warn!(
                    "exchanged token for audience '{audience}' is narrower than requested, missing scopes: {missing:?}"
                );
            }
        }

        let ttl = response
            .expires_in
            .map(Duration::from_secs)
            .map(|lifetime| lifetime.saturating_sub(EXPIRY_SKEW))
            .unwrap_or(self.default_ttl)
            .min(self.default_ttl);

        let token = SecretString::from(response.access_token);
        self.cache.insert(
            key,
            CachedToken {
                token: token.clone(),
                expires_at: Timestamp::now() + jiff::SignedDuration::try_from(ttl).unwrap_or_default(),
            },
        );

        Ok(token)
    }

    fn fresh(&self, key: &str) -> Option<SecretString> {
        let cached = self.cache.get(&key.to_string())?;

        if cached.expires_at <= Timestamp::now() {
            self.cache.invalidate(&key.to_string());
            return None;
        }

        Some(cached.token)
    }

    async fn request_with_retries(
        &self,
        caller_token: &SecretString,
        audience: &str,
    ) -> Result<ExchangeResponse, ExecutorError> {
        let mut backoff = Duration::from_millis(200);
        let mut last_error = String::new();

        for attempt in 1..=EXCHANGE_ATTEMPTS {
            let mut form = HashMap::new();
            form.insert("grant_type", GRANT_TYPE.to_string());
            form.insert("subject_token", caller_token.expose_secret().to_string());
            form.insert("subject_token_type", ACCESS_TOKEN_TYPE.to_string());
            form.insert("requested_token_type", ACCESS_TOKEN_TYPE.to_string());
            form.insert("audience", audience.to_string());

            match self.http.post(self.token_url.clone()).form(&form).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|err| ExecutorError::TokenExchange {
                            message: format!("malformed exchange response: {err}"),
                            retryable: false,
                        });
                    }

                    let body = response.text().await.unwrap_or_default();

                    // 4xx means the provider rejected the exchange; retrying
                    // the same request cannot help.
                    if status.is_client_error() {
                        return Err(ExecutorError::TokenExchange {
                            message: format!("provider rejected exchange ({status}): {body}"),
                            retryable: false,
                        });
                    }

                    last_error = format!("provider returned {status}: {body}");
                }
                Err(err) => {
                    last_error = format!("transport error: {err}");
                }
            }

            if attempt < EXCHANGE_ATTEMPTS {
                log::debug!("token exchange attempt {attempt} failed ({last_error}), retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(ExecutorError::TokenExchange {
            message: format!("exchange failed after {EXCHANGE_ATTEMPTS} attempts: {last_error}"),
            retryable: true,
        })
    }
}

fn cache_key(subject: &str, audience: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(b"@");
    hasher.update(audience.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_separate_subjects_and_audiences() {
        assert_eq!(cache_key("alice", "svc"), cache_key("alice", "svc"));
        assert_ne!(cache_key("alice", "svc"), cache_key("bob", "svc"));
        assert_ne!(cache_key("alice", "svc-a"), cache_key("alice", "svc-b"));
    }
}
