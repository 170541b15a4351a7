//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::{OidcConfig, RateLimitConfig, TlsServerConfig};

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
    /// CORS configuration.
    pub cors: Option<CorsConfig>,
    /// OIDC identity provider configuration.
    pub oidc: Option<OidcConfig>,
    /// Rate limiting configuration.
    pub rate_limits: RateLimitConfig,
}

impl ServerConfig {
    /// Returns whether OIDC authentication is configured for this server.
    pub fn uses_oidc(&self) -> bool {
        self.oidc.is_some()
    }
}

/// CORS configuration for browser clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Origins allowed to call the control plane. Empty means any origin.
    pub allow_origins: Vec<String>,
    /// Whether credentialed requests (cookies) are allowed.
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_credentials: true,
        }
    }
}
