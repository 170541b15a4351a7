//! TLS configuration for the server listener.

use std::path::PathBuf;

use serde::Deserialize;

/// TLS certificate and key paths for serving HTTPS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsServerConfig {
    /// Path to the PEM-encoded certificate chain.
    pub certificate: PathBuf,
    /// Path to the PEM-encoded private key.
    pub key: PathBuf,
}
