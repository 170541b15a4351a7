//! The `UpstreamSource` aggregate: an external system exposing tools.

use std::collections::BTreeMap;

use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::CatalogError;

/// What kind of system a source is, which decides the transport its tools
/// dispatch over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// An HTTP service described by an OpenAPI document.
    Openapi,
    /// A workflow engine with HTTP-invokable operations.
    Workflow,
    /// A local MCP plugin process launched on demand.
    McpPlugin,
    /// A remote MCP server dialed over HTTP.
    McpRemote,
}

impl SourceKind {
    /// Whether tools of this source dispatch over the plugin transport.
    pub fn uses_plugin_transport(&self) -> bool {
        matches!(self, SourceKind::McpPlugin | SourceKind::McpRemote)
    }
}

/// How the caller's identity reaches the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Exchange the caller token for one scoped to the source's audience.
    #[default]
    TokenExchange,
    /// Forward the caller's raw bearer token.
    Passthrough,
    /// Send no credential.
    None,
}

/// Source health as observed by sync attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Never synced.
    #[default]
    Unknown,
    /// Last sync succeeded.
    Healthy,
    /// Recent sync failures below the unhealthy threshold.
    Degraded,
    /// Three or more consecutive sync failures.
    Unhealthy,
}

/// How to launch or dial the plugin transport for mcp_* sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginLaunchConfig {
    /// Spawn a child process speaking MCP over stdio.
    Stdio {
        /// Command and arguments.
        cmd: Vec<String>,
        /// Extra environment variables.
        #[serde(default)]
        env: Vec<(String, String)>,
    },
    /// Dial a remote MCP server over streamable HTTP.
    Http {
        /// Server URL.
        url: Url,
    },
}

/// Consecutive sync failures after which a source is unhealthy.
const UNHEALTHY_FAILURE_STREAK: u32 = 3;

/// Aggregate state for an upstream source.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSource {
    /// Aggregate id, also the prefix of every owned tool id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Source kind; `None` only before the registration event applied.
    pub kind: Option<SourceKind>,
    /// Base URL for HTTP dispatch.
    pub base_url: Option<Url>,
    /// Where the OpenAPI document lives, for openapi/workflow kinds.
    pub spec_url: Option<Url>,
    /// How caller identity reaches the upstream.
    pub auth_mode: AuthMode,
    /// Target audience for token exchange.
    pub default_audience: Option<String>,
    /// Scopes the upstream requires on delegated tokens.
    pub required_scopes: Vec<String>,
    /// Plugin transport configuration for mcp_* kinds.
    pub plugin: Option<PluginLaunchConfig>,
    /// Health as observed by sync attempts.
    pub health: HealthStatus,
    /// Consecutive failed syncs.
    pub failure_streak: u32,
    /// Completion time of the last successful sync.
    pub last_sync: Option<Timestamp>,
    /// Hash over the full normalized inventory.
    pub inventory_hash: Option<String>,
    /// Operation id → definition hash for every tool seen by the last sync.
    /// Refresh diffing compares the next inventory against this map.
    pub tool_hashes: BTreeMap<String, String>,
    /// Number of tools discovered by the last sync.
    pub tool_count: usize,
    /// Disabled sources drop out of every access resolution.
    pub enabled: bool,
    /// Soft-deleted sources stay replayable but leave the read model.
    pub deleted: bool,
}

/// Events of the `UpstreamSource` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    /// The source was registered.
    Registered {
        /// Aggregate id.
        id: String,
        /// Display name.
        name: String,
        /// Source kind.
        kind: SourceKind,
        /// Base URL for HTTP dispatch.
        base_url: Option<Url>,
        /// OpenAPI document location.
        spec_url: Option<Url>,
        /// Identity delegation mode.
        auth_mode: AuthMode,
        /// Token exchange audience.
        default_audience: Option<String>,
        /// Scopes required on delegated tokens.
        required_scopes: Vec<String>,
        /// Plugin transport configuration.
        plugin: Option<PluginLaunchConfig>,
        /// Registration time.
        registered_at: Timestamp,
    },
    /// An inventory sync began.
    SyncStarted {
        /// Sync start time.
        started_at: Timestamp,
    },
    /// An inventory sync completed.
    InventoryIngested {
        /// Hash over the normalized inventory.
        inventory_hash: String,
        /// Operation id → definition hash for every discovered tool.
        tool_hashes: BTreeMap<String, String>,
        /// Sync completion time.
        ingested_at: Timestamp,
    },
    /// An inventory sync failed.
    SyncFailed {
        /// Failure description.
        error: String,
        /// Failure time.
        failed_at: Timestamp,
    },
    /// The source was enabled.
    Enabled {
        /// When.
        enabled_at: Timestamp,
    },
    /// The source was disabled.
    Disabled {
        /// Optional operator note.
        reason: Option<String>,
        /// When.
        disabled_at: Timestamp,
    },
    /// Auth configuration was replaced.
    AuthUpdated {
        /// New delegation mode.
        auth_mode: AuthMode,
        /// New exchange audience.
        default_audience: Option<String>,
        /// New required scopes.
        required_scopes: Vec<String>,
        /// When.
        updated_at: Timestamp,
    },
    /// The source was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for UpstreamSource {
    type Event = SourceEvent;
    const AGGREGATE_TYPE: &'static str = "source";

    fn apply(&mut self, event: &SourceEvent) {
        match event {
            SourceEvent::Registered {
                id,
                name,
                kind,
                base_url,
                spec_url,
                auth_mode,
                default_audience,
                required_scopes,
                plugin,
                ..
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.kind = Some(*kind);
                self.base_url = base_url.clone();
                self.spec_url = spec_url.clone();
                self.auth_mode = *auth_mode;
                self.default_audience = default_audience.clone();
                self.required_scopes = required_scopes.clone();
                self.plugin = plugin.clone();
                self.enabled = true;
            }
            SourceEvent::SyncStarted { .. } => {}
            SourceEvent::InventoryIngested {
                inventory_hash,
                tool_hashes,
                ingested_at,
            } => {
                self.inventory_hash = Some(inventory_hash.clone());
                self.tool_hashes = tool_hashes.clone();
                self.tool_count = tool_hashes.len();
                self.last_sync = Some(*ingested_at);
                self.failure_streak = 0;
                self.health = HealthStatus::Healthy;
            }
            SourceEvent::SyncFailed { .. } => {
                self.failure_streak += 1;
                self.health = if self.failure_streak >= UNHEALTHY_FAILURE_STREAK {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                };
            }
            SourceEvent::Enabled { .. } => self.enabled = true,
            SourceEvent::Disabled { .. } => self.enabled = false,
            SourceEvent::AuthUpdated {
                auth_mode,
                default_audience,
                required_scopes,
                ..
            } => {
                self.auth_mode = *auth_mode;
                self.default_audience = default_audience.clone();
                self.required_scopes = required_scopes.clone();
            }
            SourceEvent::Deleted { .. } => {
                self.deleted = true;
                self.enabled = false;
            }
        }
    }
}

impl UpstreamSource {
    /// Registration command for a new source.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        id: &str,
        name: &str,
        kind: SourceKind,
        base_url: Option<Url>,
        spec_url: Option<Url>,
        auth_mode: AuthMode,
        default_audience: Option<String>,
        required_scopes: Vec<String>,
        plugin: Option<PluginLaunchConfig>,
    ) -> Result<Vec<SourceEvent>, CatalogError> {
        if id.trim().is_empty() {
            return Err(CatalogError::validation("id", "source id cannot be empty"));
        }
        if id.contains(':') {
            return Err(CatalogError::validation("id", "source id cannot contain ':'"));
        }
        if name.trim().is_empty() {
            return Err(CatalogError::validation("name", "source name cannot be empty"));
        }
        if kind.uses_plugin_transport() && plugin.is_none() {
            return Err(CatalogError::validation(
                "plugin",
                "mcp sources require a plugin launch configuration",
            ));
        }
        if !kind.uses_plugin_transport() && base_url.is_none() {
            return Err(CatalogError::validation("base_url", "http sources require a base URL"));
        }

        Ok(vec![SourceEvent::Registered {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            kind,
            base_url,
            spec_url,
            auth_mode,
            default_audience,
            required_scopes,
            plugin,
            registered_at: Timestamp::now(),
        }])
    }

    /// Marks a sync as started.
    pub fn mark_sync_started(&self) -> Vec<SourceEvent> {
        vec![SourceEvent::SyncStarted {
            started_at: Timestamp::now(),
        }]
    }

    /// Records a completed inventory sync.
    pub fn record_inventory(&self, inventory_hash: String, tool_hashes: BTreeMap<String, String>) -> Vec<SourceEvent> {
        vec![SourceEvent::InventoryIngested {
            inventory_hash,
            tool_hashes,
            ingested_at: Timestamp::now(),
        }]
    }

    /// Records a failed sync attempt.
    pub fn mark_sync_failed(&self, error: impl Into<String>) -> Vec<SourceEvent> {
        vec![SourceEvent::SyncFailed {
            error: error.into(),
            failed_at: Timestamp::now(),
        }]
    }

    /// Enables the source. No event when already enabled.
    pub fn enable(&self) -> Vec<SourceEvent> {
        if self.enabled {
            return Vec::new();
        }
        vec![SourceEvent::Enabled {
            enabled_at: Timestamp::now(),
        }]
    }

    /// Disables the source. No event when already disabled.
    pub fn disable(&self, reason: Option<String>) -> Vec<SourceEvent> {
        if !self.enabled {
            return Vec::new();
        }
        vec![SourceEvent::Disabled {
            reason,
            disabled_at: Timestamp::now(),
        }]
    }

    /// Replaces the auth configuration.
    pub fn update_auth(
        &self,
        auth_mode: AuthMode,
        default_audience: Option<String>,
        required_scopes: Vec<String>,
    ) -> Vec<SourceEvent> {
        if self.auth_mode == auth_mode
            && self.default_audience == default_audience
            && self.required_scopes == required_scopes
        {
            return Vec::new();
        }

        vec![SourceEvent::AuthUpdated {
            auth_mode,
            default_audience,
            required_scopes,
            updated_at: Timestamp::now(),
        }]
    }

    /// Soft-deletes the source.
    pub fn delete(&self) -> Vec<SourceEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![SourceEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> UpstreamSource {
        let mut source = UpstreamSource::default();
        let events = UpstreamSource::register(
            "weather",
            "Weather API",
            SourceKind::Openapi,
            Some("https://weather.internal".parse().unwrap()),
            Some("https://weather.internal/openapi.json".parse().unwrap()),
            AuthMode::TokenExchange,
            Some("weather-api".into()),
            vec!["forecast:read".into()],
            None,
        )
        .unwrap();

        for event in &events {
            source.apply(event);
        }
        source
    }

    #[test]
    fn registration_enables_the_source() {
        let source = registered();
        assert!(source.enabled);
        assert_eq!(source.kind, Some(SourceKind::Openapi));
        assert_eq!(source.health, HealthStatus::Unknown);
    }

    #[test]
    fn source_ids_cannot_collide_with_tool_id_separator() {
        let result = UpstreamSource::register(
            "bad:id",
            "Bad",
            SourceKind::Openapi,
            Some("https://x".parse().unwrap()),
            None,
            AuthMode::None,
            None,
            vec![],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn mcp_sources_require_plugin_config() {
        let result = UpstreamSource::register(
            "plugin",
            "Plugin",
            SourceKind::McpPlugin,
            None,
            None,
            AuthMode::None,
            None,
            vec![],
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn failure_streak_degrades_then_unhealthy() {
        let mut source = registered();

        for event in source.mark_sync_failed("boom") {
            source.apply(&event);
        }
        assert_eq!(source.health, HealthStatus::Degraded);

        for _ in 0..2 {
            for event in source.mark_sync_failed("boom") {
                source.apply(&event);
            }
        }
        assert_eq!(source.health, HealthStatus::Unhealthy);
        assert_eq!(source.failure_streak, 3);

        let hashes = BTreeMap::from([
            ("get_forecast".to_string(), "h1".to_string()),
            ("get_alerts".to_string(), "h2".to_string()),
        ]);
        for event in source.record_inventory("abc".into(), hashes) {
            source.apply(&event);
        }
        assert_eq!(source.health, HealthStatus::Healthy);
        assert_eq!(source.failure_streak, 0);
        assert_eq!(source.tool_count, 2);
        assert_eq!(source.tool_hashes.get("get_alerts").map(String::as_str), Some("h2"));
    }

    #[test]
    fn enable_disable_are_idempotent() {
        let mut source = registered();

        assert!(source.enable().is_empty());

        let disabled = source.disable(Some("maintenance".into()));
        assert_eq!(disabled.len(), 1);
        for event in &disabled {
            source.apply(event);
        }

        assert!(source.disable(None).is_empty());
        assert_eq!(source.enable().len(), 1);
    }
}
