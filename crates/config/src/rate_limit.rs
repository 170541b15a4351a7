//! Rate limit configuration.

use serde::Deserialize;

/// Per-user rate limiting applied in front of the chat and tool endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced.
    pub enabled: bool,
    /// Requests allowed per user per minute.
    pub requests_per_minute: u32,
    /// Concurrently open streaming sessions allowed per user.
    pub concurrent_streams: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60,
            concurrent_streams: 4,
        }
    }
}
