//! Tool execution pipeline configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Settings for tool dispatch, token exchange, and plugin transports.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Dispatch timeout applied when a tool declares none.
    #[serde(deserialize_with = "deserialize_duration")]
    pub default_tool_timeout: Duration,
    /// Upper bound on how long an exchanged token is cached. The token's own
    /// `exp` claim shortens this further.
    #[serde(deserialize_with = "deserialize_duration")]
    pub token_cache_ttl: Duration,
    /// Validate tool arguments against the tool's input schema before
    /// dispatch. Per-call options may override this.
    pub validate_arguments: bool,
    /// Connect timeout for spawning or dialing a plugin transport.
    #[serde(deserialize_with = "deserialize_duration")]
    pub plugin_connect_timeout: Duration,
    /// Interval between liveness pings on an idle plugin transport.
    #[serde(deserialize_with = "deserialize_duration")]
    pub plugin_ping_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_tool_timeout: Duration::from_secs(30),
            token_cache_ttl: Duration::from_secs(300),
            validate_arguments: true,
            plugin_connect_timeout: Duration::from_secs(10),
            plugin_ping_interval: Duration::from_secs(30),
        }
    }
}
