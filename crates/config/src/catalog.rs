//! Tool catalog cache configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// TTLs for the advisory catalog caches. Readers recompute from aggregates
/// on expiry; writers broadcast invalidations on commit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// TTL for resolved tool-group manifests.
    #[serde(deserialize_with = "deserialize_duration")]
    pub manifest_cache_ttl: Duration,
    /// TTL for per-caller access resolutions.
    #[serde(deserialize_with = "deserialize_duration")]
    pub access_cache_ttl: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            manifest_cache_ttl: Duration::from_secs(1800),
            access_cache_ttl: Duration::from_secs(300),
        }
    }
}
