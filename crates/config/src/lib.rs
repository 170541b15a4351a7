//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod agent;
mod catalog;
mod executor;
mod llm;
mod loader;
mod oidc;
mod rate_limit;
mod server;
mod store;
mod tls;

use std::path::Path;

pub use agent::AgentConfig;
pub use catalog::CatalogConfig;
pub use executor::ExecutorConfig;
pub use llm::{LlmConfig, LlmProviderConfig, ModelConfig, ProviderKind};
pub use oidc::OidcConfig;
pub use rate_limit::RateLimitConfig;
use serde::Deserialize;
pub use server::{CorsConfig, ServerConfig};
pub use store::{StoreBackend, StoreConfig};
pub use tls::TlsServerConfig;

/// Main configuration structure for the Switchboard application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Conversation agent loop configuration settings.
    pub agent: AgentConfig,
    /// Tool execution pipeline configuration settings.
    pub executor: ExecutorConfig,
    /// Tool catalog and access cache configuration settings.
    pub catalog: CatalogConfig,
    /// LLM provider configuration settings.
    pub llm: LlmConfig,
    /// Event store configuration settings.
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates cross-references between configuration sections.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                tls: None,
                cors: None,
                oidc: None,
                rate_limits: RateLimitConfig {
                    enabled: false,
                    requests_per_minute: 60,
                    concurrent_streams: 4,
                },
            },
            agent: AgentConfig {
                max_context_messages: 50,
                max_iterations: 10,
                max_tool_calls_per_iteration: 5,
                stop_on_error: false,
                turn_timeout: 120s,
            },
            executor: ExecutorConfig {
                default_tool_timeout: 30s,
                token_cache_ttl: 300s,
                validate_arguments: true,
                plugin_connect_timeout: 10s,
                plugin_ping_interval: 30s,
            },
            catalog: CatalogConfig {
                manifest_cache_ttl: 1800s,
                access_cache_ttl: 300s,
            },
            llm: LlmConfig {
                default_model: None,
                providers: {},
            },
            store: StoreConfig {
                backend: Memory,
            },
        }
        "#);
    }
}
