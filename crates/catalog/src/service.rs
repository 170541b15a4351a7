//! Command facade over the catalog aggregates.
//!
//! Every mutation follows load → execute → commit under the store's
//! per-aggregate lock, then rebuilds the read-model record and drops
//! affected cache entries so callers observe their own writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use event_store::{Aggregate, EventMetadata, EventStore, StoreError};
use url::Url;

use crate::{
    AccessPolicy, AccessResolver, AuthMode, CatalogCaches, CatalogError, CatalogReadModel, ClaimMatcher,
    PluginLaunchConfig, RefreshOutcome, SourceKind, SourceTool, SourceToolEvent, ToolDefinition, ToolGroup, ToolId,
    ToolSelector, UpstreamSource,
    ingestion::{self, ingestion_error},
};

/// The catalog's write and refresh surface.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<EventStore>,
    read_model: Arc<CatalogReadModel>,
    caches: Arc<CatalogCaches>,
    resolver: AccessResolver,
    http: reqwest::Client,
}

/// Parameters for registering an upstream source.
#[derive(Debug, Clone)]
pub struct RegisterSource {
    /// Source id, also the prefix of every owned tool id.
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
    /// Plugin transport configuration for mcp_* kinds.
    pub plugin: Option<PluginLaunchConfig>,
}

impl CatalogService {
    /// Creates the service over shared store, read model, and caches.
    pub fn new(store: Arc<EventStore>, read_model: Arc<CatalogReadModel>, caches: Arc<CatalogCaches>) -> Self {
        let resolver = AccessResolver::new(read_model.clone(), caches.clone());

        Self {
            store,
            read_model,
            caches,
            resolver,
            http: reqwest::Client::new(),
        }
    }

    /// The queryable read model.
    pub fn read_model(&self) -> &Arc<CatalogReadModel> {
        &self.read_model
    }

    /// The access resolver.
    pub fn resolver(&self) -> &AccessResolver {
        &self.resolver
    }

    async fn mutate<A, F>(&self, id: &str, metadata: EventMetadata, command: F) -> Result<u64, CatalogError>
    where
        A: Aggregate,
        F: FnOnce(&A) -> Result<Vec<A::Event>, CatalogError>,
    {
        let _guard = self.store.lock_aggregate::<A>(id).await;

        let hydrated = self.store.load::<A>(id).await.map_err(|err| match err {
            StoreError::NotFound { .. } => CatalogError::not_found(A::AGGREGATE_TYPE, id),
            other => CatalogError::Store(other),
        })?;

        let events = command(&hydrated.state)?;
        let version = self
            .store
            .commit::<A>(id, hydrated.version, &events, metadata)
            .await?;

        self.read_model.refresh_aggregate(A::AGGREGATE_TYPE, id, version).await;
        self.invalidate::<A>(id);

        Ok(version)
    }

    async fn create<A, F>(&self, id: &str, metadata: EventMetadata, command: F) -> Result<u64, CatalogError>
    where
        A: Aggregate,
        F: FnOnce() -> Result<Vec<A::Event>, CatalogError>,
    {
        let _guard = self.store.lock_aggregate::<A>(id).await;

        if self.store.try_load::<A>(id).await?.is_some() {
            return Err(CatalogError::validation(
                "id",
                format!("{} '{id}' already exists", A::AGGREGATE_TYPE),
            ));
        }

        let events = command()?;
        let version = self.store.commit::<A>(id, 0, &events, metadata).await?;

        self.read_model.refresh_aggregate(A::AGGREGATE_TYPE, id, version).await;
        self.invalidate::<A>(id);

        Ok(version)
    }

    fn invalidate<A: Aggregate>(&self, id: &str) {
        match A::AGGREGATE_TYPE {
            t if t == ToolGroup::AGGREGATE_TYPE => self.caches.invalidate_manifest(id),
            t if t == SourceTool::AGGREGATE_TYPE || t == UpstreamSource::AGGREGATE_TYPE => {
                self.caches.invalidate_all_manifests()
            }
            t if t == AccessPolicy::AGGREGATE_TYPE => self.caches.invalidate_access(),
            _ => {}
        }
    }

    // --- sources ---------------------------------------------------------

    /// Registers a new upstream source.
    pub async fn register_source(&self, params: RegisterSource, metadata: EventMetadata) -> Result<(), CatalogError> {
        let id = params.id.clone();

        self.create::<UpstreamSource, _>(&id, metadata, || {
            UpstreamSource::register(
                &params.id,
                &params.name,
                params.kind,
                params.base_url.clone(),
                params.spec_url.clone(),
                params.auth_mode,
                params.default_audience.clone(),
                params.required_scopes.clone(),
                params.plugin.clone(),
            )
        })
        .await?;

        Ok(())
    }

    /// Enables a source.
    pub async fn enable_source(&self, id: &str, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<UpstreamSource, _>(id, metadata, |source| Ok(source.enable()))
            .await?;
        Ok(())
    }

    /// Disables a source, removing its tools from every resolution.
    pub async fn disable_source(
        &self,
        id: &str,
        reason: Option<String>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<UpstreamSource, _>(id, metadata, |source| Ok(source.disable(reason)))
            .await?;
        Ok(())
    }

    /// Replaces a source's auth configuration.
    pub async fn update_source_auth(
        &self,
        id: &str,
        auth_mode: AuthMode,
        default_audience: Option<String>,
        required_scopes: Vec<String>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<UpstreamSource, _>(id, metadata, |source| {
            Ok(source.update_auth(auth_mode, default_audience, required_scopes))
        })
        .await?;
        Ok(())
    }

    /// Soft-deletes a source and deprecates every tool it owns.
    pub async fn delete_source(&self, id: &str, metadata: EventMetadata) -> Result<(), CatalogError> {
        let owned: Vec<String> = {
            let _guard = self.store.lock_aggregate::<UpstreamSource>(id).await;
            let hydrated = self
                .store
                .load::<UpstreamSource>(id)
                .await
                .map_err(|err| match err {
                    StoreError::NotFound { .. } => CatalogError::not_found(UpstreamSource::AGGREGATE_TYPE, id),
                    other => CatalogError::Store(other),
                })?;

            let events = hydrated.state.delete();
            let version = self
                .store
                .commit::<UpstreamSource>(id, hydrated.version, &events, metadata.clone())
                .await?;
            self.read_model
                .refresh_aggregate(UpstreamSource::AGGREGATE_TYPE, id, version)
                .await;

            hydrated
                .state
                .tool_hashes
                .keys()
                .map(|operation| ToolId::new(id, operation).to_string())
                .collect()
        };

        for tool_stream in owned {
            if let Err(err) = self
                .mutate::<SourceTool, _>(&tool_stream, metadata.clone(), |tool| Ok(tool.deprecate()))
                .await
            {
                log::warn!("failed to deprecate '{tool_stream}' while deleting source '{id}': {err}");
            }
        }

        self.caches.invalidate_all_manifests();
        Ok(())
    }

    /// Refreshes a source's inventory.
    ///
    /// For openapi/workflow sources the descriptor is fetched from the
    /// source's `spec_url` when `provided` is `None`; plugin sources must
    /// pass the normalized inventory obtained from their transport.
    pub async fn refresh_source(
        &self,
        source_id: &str,
        provided: Option<Vec<ToolDefinition>>,
        metadata: EventMetadata,
    ) -> Result<RefreshOutcome, CatalogError> {
        let _guard = self.store.lock_aggregate::<UpstreamSource>(source_id).await;

        let mut hydrated = self
            .store
            .load::<UpstreamSource>(source_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => CatalogError::not_found(UpstreamSource::AGGREGATE_TYPE, source_id),
                other => CatalogError::Store(other),
            })?;

        if hydrated.state.deleted {
            return Err(CatalogError::not_found(UpstreamSource::AGGREGATE_TYPE, source_id));
        }

        let started = hydrated.state.mark_sync_started();
        hydrated.version = self
            .store
            .commit::<UpstreamSource>(source_id, hydrated.version, &started, metadata.clone())
            .await?;
        hydrated.apply_all(&started);

        let discovered = match provided {
            Some(definitions) => definitions,
            None => match self.fetch_inventory(&hydrated.state).await {
                Ok(definitions) => definitions,
                Err(message) => {
                    let failed = hydrated.state.mark_sync_failed(message.clone());
                    let version = self
                        .store
                        .commit::<UpstreamSource>(source_id, hydrated.version, &failed, metadata)
                        .await?;
                    self.read_model
                        .refresh_aggregate(UpstreamSource::AGGREGATE_TYPE, source_id, version)
                        .await;

                    return Err(ingestion_error(source_id, message));
                }
            },
        };

        let previous = hydrated.state.tool_hashes.clone();
        let source_name = hydrated.state.name.clone();

        let mut outcome = RefreshOutcome::default();
        let mut new_hashes = BTreeMap::new();

        for definition in discovered {
            let tool_id = ToolId::new(source_id, &definition.name);
            let stream_id = tool_id.to_string();
            new_hashes.insert(definition.name.clone(), definition.content_hash());

            let _tool_guard = self.store.lock_aggregate::<SourceTool>(&stream_id).await;

            match self.store.try_load::<SourceTool>(&stream_id).await? {
                None => {
                    let events = SourceTool::discover(tool_id.clone(), &source_name, definition);
                    let version = self
                        .store
                        .commit::<SourceTool>(&stream_id, 0, &events, metadata.clone())
                        .await?;
                    self.read_model
                        .refresh_aggregate(SourceTool::AGGREGATE_TYPE, &stream_id, version)
                        .await;
                    outcome.discovered.push(tool_id);
                }
                Some(tool) => {
                    let events = tool.state.refresh(definition);

                    match events.first() {
                        None => outcome.unchanged += 1,
                        Some(SourceToolEvent::Restored { .. }) => outcome.restored.push(tool_id.clone()),
                        Some(_) => outcome.updated.push(tool_id.clone()),
                    }

                    let version = self
                        .store
                        .commit::<SourceTool>(&stream_id, tool.version, &events, metadata.clone())
                        .await?;
                    self.read_model
                        .refresh_aggregate(SourceTool::AGGREGATE_TYPE, &stream_id, version)
                        .await;
                }
            }
        }

        for operation in previous.keys().filter(|operation| !new_hashes.contains_key(*operation)) {
            let tool_id = ToolId::new(source_id, operation);
            let stream_id = tool_id.to_string();

            match self
                .mutate::<SourceTool, _>(&stream_id, metadata.clone(), |tool| Ok(tool.deprecate()))
                .await
            {
                Ok(_) => outcome.deprecated.push(tool_id),
                Err(err) => log::warn!("failed to deprecate missing tool '{stream_id}': {err}"),
            }
        }

        outcome.inventory_hash = ingestion::inventory_hash(&new_hashes);

        let ingested = hydrated
            .state
            .record_inventory(outcome.inventory_hash.clone(), new_hashes);
        let version = self
            .store
            .commit::<UpstreamSource>(source_id, hydrated.version, &ingested, metadata)
            .await?;
        self.read_model
            .refresh_aggregate(UpstreamSource::AGGREGATE_TYPE, source_id, version)
            .await;
        self.caches.invalidate_all_manifests();

        log::info!(
            "refreshed source '{source_id}': {} discovered, {} updated, {} deprecated, {} restored, {} unchanged",
            outcome.discovered.len(),
            outcome.updated.len(),
            outcome.deprecated.len(),
            outcome.restored.len(),
            outcome.unchanged,
        );

        Ok(outcome)
    }

    async fn fetch_inventory(&self, source: &UpstreamSource) -> Result<Vec<ToolDefinition>, String> {
        match source.kind {
            Some(SourceKind::Openapi) | Some(SourceKind::Workflow) => {
                let Some(spec_url) = source.spec_url.as_ref() else {
                    return Err("source has no spec_url to fetch".to_string());
                };

                let document = ingestion::fetch_openapi_document(&self.http, spec_url).await?;
                ingestion::normalize_openapi(&document)
            }
            Some(SourceKind::McpPlugin) | Some(SourceKind::McpRemote) => {
                Err("plugin inventories must be provided by the plugin transport".to_string())
            }
            None => Err("source is not initialized".to_string()),
        }
    }

    // --- tools -----------------------------------------------------------

    /// Enables a tool.
    pub async fn enable_tool(&self, id: &ToolId, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<SourceTool, _>(&id.to_string(), metadata, |tool| Ok(tool.enable()))
            .await?;
        Ok(())
    }

    /// Disables a tool, removing it from every resolution.
    pub async fn disable_tool(
        &self,
        id: &ToolId,
        reason: Option<String>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<SourceTool, _>(&id.to_string(), metadata, |tool| Ok(tool.disable(reason)))
            .await?;
        Ok(())
    }

    /// Removes a tool entirely.
    pub async fn delete_tool(&self, id: &ToolId, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<SourceTool, _>(&id.to_string(), metadata, |tool| Ok(tool.delete()))
            .await?;
        Ok(())
    }

    // --- groups ----------------------------------------------------------

    /// Creates a tool group.
    pub async fn create_group(
        &self,
        id: &str,
        name: &str,
        description: &str,
        selectors: Vec<ToolSelector>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.create::<ToolGroup, _>(id, metadata, || ToolGroup::create(id, name, description, selectors))
            .await?;
        Ok(())
    }

    /// Renames or re-describes a group.
    pub async fn update_group(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.update(name, description)))
            .await?;
        Ok(())
    }

    /// Adds a selector to a group.
    pub async fn add_group_selector(
        &self,
        id: &str,
        selector: ToolSelector,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.add_selector(selector)))
            .await?;
        Ok(())
    }

    /// Removes a selector from a group.
    pub async fn remove_group_selector(
        &self,
        id: &str,
        selector_id: &str,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.remove_selector(selector_id)))
            .await?;
        Ok(())
    }

    /// Explicitly includes a tool in a group.
    pub async fn include_group_tool(
        &self,
        id: &str,
        tool_id: ToolId,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.include_tool(tool_id)))
            .await?;
        Ok(())
    }

    /// Drops an explicit include from a group.
    pub async fn remove_group_tool(
        &self,
        id: &str,
        tool_id: &ToolId,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.remove_included_tool(tool_id)))
            .await?;
        Ok(())
    }

    /// Excludes a tool from a group.
    pub async fn exclude_group_tool(
        &self,
        id: &str,
        tool_id: ToolId,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.exclude_tool(tool_id)))
            .await?;
        Ok(())
    }

    /// Lifts an exclusion.
    pub async fn unexclude_group_tool(
        &self,
        id: &str,
        tool_id: &ToolId,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.unexclude_tool(tool_id)))
            .await?;
        Ok(())
    }

    /// Soft-deletes a group. Policies referencing it simply grant nothing
    /// through it afterwards.
    pub async fn delete_group(&self, id: &str, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<ToolGroup, _>(id, metadata, |group| Ok(group.delete()))
            .await?;
        Ok(())
    }

    // --- policies --------------------------------------------------------

    /// Defines an access policy.
    #[allow(clippy::too_many_arguments)]
    pub async fn define_policy(
        &self,
        id: &str,
        name: &str,
        description: Option<String>,
        matchers: Vec<ClaimMatcher>,
        allowed_group_ids: Vec<String>,
        priority: i32,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        for group_id in &allowed_group_ids {
            if self.read_model.group(group_id).is_none() {
                log::warn!("policy '{id}' references unknown group '{group_id}'");
            }
        }

        self.create::<AccessPolicy, _>(id, metadata, || {
            AccessPolicy::define(id, name, description, matchers, allowed_group_ids, priority)
        })
        .await?;
        Ok(())
    }

    /// Replaces a policy's matchers.
    pub async fn update_policy_matchers(
        &self,
        id: &str,
        matchers: Vec<ClaimMatcher>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| policy.update_matchers(matchers))
            .await?;
        Ok(())
    }

    /// Replaces a policy's granted groups.
    pub async fn update_policy_groups(
        &self,
        id: &str,
        allowed_group_ids: Vec<String>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| policy.update_groups(allowed_group_ids))
            .await?;
        Ok(())
    }

    /// Changes a policy's evaluation priority.
    pub async fn set_policy_priority(&self, id: &str, priority: i32, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| Ok(policy.set_priority(priority)))
            .await?;
        Ok(())
    }

    /// Activates a policy.
    pub async fn activate_policy(&self, id: &str, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| Ok(policy.activate()))
            .await?;
        Ok(())
    }

    /// Deactivates a policy.
    pub async fn deactivate_policy(
        &self,
        id: &str,
        reason: Option<String>,
        metadata: EventMetadata,
    ) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| Ok(policy.deactivate(reason)))
            .await?;
        Ok(())
    }

    /// Soft-deletes a policy.
    pub async fn delete_policy(&self, id: &str, metadata: EventMetadata) -> Result<(), CatalogError> {
        self.mutate::<AccessPolicy, _>(id, metadata, |policy| Ok(policy.delete()))
            .await?;
        Ok(())
    }
}
