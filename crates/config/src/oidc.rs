//! OIDC identity provider configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Configuration for the OIDC identity provider used to validate caller
/// tokens and to exchange them for upstream-scoped tokens.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OidcConfig {
    /// URL of the provider's JWKS document.
    pub jwks_url: Url,
    /// Token endpoint used for RFC 8693 token exchange.
    pub token_url: Url,
    /// Expected `iss` claim. Skipped when absent.
    #[serde(default)]
    pub expected_issuer: Option<String>,
    /// Expected `aud` claim. Skipped when absent.
    #[serde(default)]
    pub expected_audience: Option<String>,
    /// How often the JWKS document is re-fetched.
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(300)
}
