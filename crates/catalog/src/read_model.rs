//! Queryable projections of the catalog aggregates.
//!
//! Read-model records are explicit DTO shapes rebuilt from aggregate state;
//! they never participate in write validation. Each record carries the
//! stream version it was built at, and a sequence tracker drops stale
//! deliveries so re-applying an event is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use event_store::{Aggregate, EventStore, Projection, SequenceTracker};
use jiff::Timestamp;
use serde::Serialize;
use url::Url;

use crate::{
    AccessPolicy, AuthMode, ClaimMatcher, HealthStatus, PluginLaunchConfig, SourceKind, SourceTool, ToolDefinition,
    ToolGroup, ToolId, ToolSelector, ToolStatus, UpstreamSource,
};

/// Read-model record for an upstream source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDto {
    /// Source id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Source kind.
    pub kind: SourceKind,
    /// Base URL for HTTP dispatch.
    pub base_url: Option<Url>,
    /// OpenAPI document location.
    pub spec_url: Option<Url>,
    /// Identity delegation mode.
    pub auth_mode: AuthMode,
    /// Token exchange audience.
    pub default_audience: Option<String>,
    /// Scopes required on delegated tokens.
    pub required_scopes: Vec<String>,
    /// Plugin transport configuration.
    pub plugin: Option<PluginLaunchConfig>,
    /// Sync health.
    pub health: HealthStatus,
    /// Completion time of the last successful sync.
    pub last_sync: Option<Timestamp>,
    /// Hash over the last ingested inventory.
    pub inventory_hash: Option<String>,
    /// Tools in the last inventory.
    pub tool_count: usize,
    /// Whether the source participates in resolution.
    pub enabled: bool,
    /// Last applied stream version.
    pub version: u64,
}

/// Read-model record for a discovered tool.
#[derive(Debug, Clone, Serialize)]
pub struct SourceToolDto {
    /// Composite tool id.
    pub id: ToolId,
    /// Owning source.
    pub source_id: String,
    /// Denormalized source display name.
    pub source_name: String,
    /// Normalized tool name.
    pub tool_name: String,
    /// Tool description.
    pub description: String,
    /// The executable definition.
    pub definition: ToolDefinition,
    /// Content hash of the definition.
    pub definition_hash: String,
    /// Selector-visible tags.
    pub tags: Vec<String>,
    /// Whether the tool participates in resolution.
    pub enabled: bool,
    /// Lifecycle status.
    pub status: ToolStatus,
    /// Last applied stream version.
    pub version: u64,
}

impl SourceToolDto {
    /// Whether the tool may appear in group manifests and executions.
    pub fn is_resolvable(&self) -> bool {
        self.enabled && self.status == ToolStatus::Active
    }
}

/// Read-model record for a tool group.
#[derive(Debug, Clone, Serialize)]
pub struct ToolGroupDto {
    /// Group id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: String,
    /// Pattern-based membership rules.
    pub selectors: Vec<ToolSelector>,
    /// Explicit includes.
    pub included: Vec<ToolId>,
    /// Explicit excludes.
    pub excluded: Vec<ToolId>,
    /// Whether the group grants anything.
    pub is_active: bool,
    /// Last applied stream version.
    pub version: u64,
}

/// Read-model record for an access policy.
#[derive(Debug, Clone, Serialize)]
pub struct AccessPolicyDto {
    /// Policy id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: Option<String>,
    /// Matchers evaluated with AND.
    pub matchers: Vec<ClaimMatcher>,
    /// Groups this policy grants.
    pub allowed_group_ids: Vec<String>,
    /// Evaluation priority, higher first.
    pub priority: i32,
    /// Whether the policy participates in resolution.
    pub is_active: bool,
    /// Last applied stream version.
    pub version: u64,
}

/// In-memory read model over all catalog aggregates.
pub struct CatalogReadModel {
    store: Arc<EventStore>,
    sources: DashMap<String, SourceDto>,
    tools: DashMap<ToolId, SourceToolDto>,
    groups: DashMap<String, ToolGroupDto>,
    policies: DashMap<String, AccessPolicyDto>,
    tracker: SequenceTracker,
}

impl CatalogReadModel {
    /// Creates an empty read model over the given store.
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            sources: DashMap::new(),
            tools: DashMap::new(),
            groups: DashMap::new(),
            policies: DashMap::new(),
            tracker: SequenceTracker::new(),
        }
    }

    /// Rebuilds the record for one aggregate from its stream. Called by the
    /// projection for every committed event and by the service right after
    /// a commit so queries observe their own writes.
    pub async fn refresh_aggregate(&self, aggregate_type: &str, aggregate_id: &str, sequence: u64) {
        if !self.tracker.advance(&format!("{aggregate_type}/{aggregate_id}"), sequence) {
            return;
        }

        match aggregate_type {
            t if t == UpstreamSource::AGGREGATE_TYPE => self.project_source(aggregate_id).await,
            t if t == SourceTool::AGGREGATE_TYPE => self.project_tool(aggregate_id).await,
            t if t == ToolGroup::AGGREGATE_TYPE => self.project_group(aggregate_id).await,
            t if t == AccessPolicy::AGGREGATE_TYPE => self.project_policy(aggregate_id).await,
            _ => {}
        }
    }

    async fn project_source(&self, id: &str) {
        match self.store.try_load::<UpstreamSource>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;
                let Some(kind) = state.kind else { return };

                self.sources.insert(
                    id.to_string(),
                    SourceDto {
                        id: state.id,
                        name: state.name,
                        kind,
                        base_url: state.base_url,
                        spec_url: state.spec_url,
                        auth_mode: state.auth_mode,
                        default_audience: state.default_audience,
                        required_scopes: state.required_scopes,
                        plugin: state.plugin,
                        health: state.health,
                        last_sync: state.last_sync,
                        inventory_hash: state.inventory_hash,
                        tool_count: state.tool_count,
                        enabled: state.enabled,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                // Soft delete removes the record from queries.
                self.sources.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", UpstreamSource::AGGREGATE_TYPE),
        }
    }

    async fn project_tool(&self, id: &str) {
        let Ok(tool_id) = id.parse::<ToolId>() else {
            log::error!("tool stream '{id}' does not carry a composite tool id");
            return;
        };

        match self.store.try_load::<SourceTool>(id).await {
            Ok(Some(hydrated)) => {
                let state = hydrated.state;
                let (Some(id), Some(definition)) = (state.id, state.definition) else {
                    return;
                };

                self.tools.insert(
                    tool_id,
                    SourceToolDto {
                        id,
                        source_id: state.source_id,
                        source_name: state.source_name,
                        tool_name: state.tool_name,
                        description: definition.description.clone(),
                        tags: definition.tags.clone(),
                        definition,
                        definition_hash: state.definition_hash,
                        enabled: state.enabled,
                        status: state.status,
                        version: hydrated.version,
                    },
                );
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", SourceTool::AGGREGATE_TYPE),
        }
    }

    async fn project_group(&self, id: &str) {
        match self.store.try_load::<ToolGroup>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;

                self.groups.insert(
                    id.to_string(),
                    ToolGroupDto {
                        id: state.id,
                        name: state.name,
                        description: state.description,
                        selectors: state.selectors,
                        included: state.included,
                        excluded: state.excluded,
                        is_active: state.is_active,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                self.groups.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", ToolGroup::AGGREGATE_TYPE),
        }
    }

    async fn project_policy(&self, id: &str) {
        match self.store.try_load::<AccessPolicy>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;

                self.policies.insert(
                    id.to_string(),
                    AccessPolicyDto {
                        id: state.id,
                        name: state.name,
                        description: state.description,
                        matchers: state.matchers,
                        allowed_group_ids: state.allowed_group_ids,
                        priority: state.priority,
                        is_active: state.is_active,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                self.policies.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", AccessPolicy::AGGREGATE_TYPE),
        }
    }

    /// One source by id.
    pub fn source(&self, id: &str) -> Option<SourceDto> {
        self.sources.get(id).map(|entry| entry.clone())
    }

    /// All sources, name-sorted.
    pub fn sources(&self) -> Vec<SourceDto> {
        let mut sources: Vec<_> = self.sources.iter().map(|entry| entry.clone()).collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    /// One tool by id.
    pub fn tool(&self, id: &ToolId) -> Option<SourceToolDto> {
        self.tools.get(id).map(|entry| entry.clone())
    }

    /// All tools, id-sorted.
    pub fn tools(&self) -> Vec<SourceToolDto> {
        let mut tools: Vec<_> = self.tools.iter().map(|entry| entry.clone()).collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// Tools owned by one source.
    pub fn tools_of_source(&self, source_id: &str) -> Vec<SourceToolDto> {
        let mut tools: Vec<_> = self
            .tools
            .iter()
            .filter(|entry| entry.source_id == source_id)
            .map(|entry| entry.clone())
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// Substring/tag/source filtered tool search.
    pub fn search_tools(&self, query: Option<&str>, source_id: Option<&str>, tags: &[String]) -> Vec<SourceToolDto> {
        let query = query.map(str::to_lowercase);

        let mut tools: Vec<_> = self
            .tools
            .iter()
            .filter(|entry| {
                if let Some(source_id) = source_id
                    && entry.source_id != source_id
                {
                    return false;
                }

                if !tags.is_empty() && !tags.iter().all(|tag| entry.tags.contains(tag)) {
                    return false;
                }

                match &query {
                    Some(query) => {
                        entry.tool_name.to_lowercase().contains(query)
                            || entry.description.to_lowercase().contains(query)
                    }
                    None => true,
                }
            })
            .map(|entry| entry.clone())
            .collect();

        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// One group by id.
    pub fn group(&self, id: &str) -> Option<ToolGroupDto> {
        self.groups.get(id).map(|entry| entry.clone())
    }

    /// All groups, id-sorted.
    pub fn groups(&self) -> Vec<ToolGroupDto> {
        let mut groups: Vec<_> = self.groups.iter().map(|entry| entry.clone()).collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    /// One policy by id.
    pub fn policy(&self, id: &str) -> Option<AccessPolicyDto> {
        self.policies.get(id).map(|entry| entry.clone())
    }

    /// Active and inactive policies, highest priority first.
    pub fn policies(&self) -> Vec<AccessPolicyDto> {
        let mut policies: Vec<_> = self.policies.iter().map(|entry| entry.clone()).collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        policies
    }

    /// Every claim path named by any policy. Access cache keys hash only
    /// these claims so unrelated claims do not fragment the cache.
    pub fn policy_claim_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .policies
            .iter()
            .flat_map(|entry| {
                entry
                    .matchers
                    .iter()
                    .map(|matcher| matcher.claim_path.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

#[async_trait]
impl Projection for CatalogReadModel {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn apply(&self, envelope: &event_store::EventEnvelope) {
        self.refresh_aggregate(&envelope.aggregate_type, &envelope.aggregate_id, envelope.sequence)
            .await;
    }
}
