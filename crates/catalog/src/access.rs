//! Access resolution: which tools a caller may see and execute.
//!
//! Resolution order per group: start empty, add every enabled active tool
//! matching any selector, add explicit includes, subtract explicit
//! excludes. Policies grant groups; matchers within a policy are AND,
//! policies across the set are OR, highest priority first.

use std::collections::BTreeSet;
use std::sync::Arc;

use context::Claims;

use crate::{CatalogCaches, CatalogReadModel, ToolGroupDto, ToolId, cache::claims_cache_key};

/// Resolves caller claims into accessible tool sets, with caching.
#[derive(Clone)]
pub struct AccessResolver {
    read_model: Arc<CatalogReadModel>,
    caches: Arc<CatalogCaches>,
}

impl AccessResolver {
    /// Creates a resolver over the read model and caches.
    pub fn new(read_model: Arc<CatalogReadModel>, caches: Arc<CatalogCaches>) -> Self {
        Self { read_model, caches }
    }

    /// The group ids granted to the caller by the active policies.
    pub fn resolve_allowed_groups(&self, claims: &Claims) -> Arc<BTreeSet<String>> {
        let paths = self.read_model.policy_claim_paths();
        let key = claims_cache_key(&paths, claims);

        if let Some(cached) = self.caches.allowed_groups(&key) {
            return cached;
        }

        let mut allowed = BTreeSet::new();

        // policies() orders by descending priority; higher-priority grants
        // land first and the union makes later duplicates harmless.
        for policy in self.read_model.policies() {
            if !policy.is_active {
                continue;
            }

            if policy.matchers.iter().all(|matcher| matcher.matches(claims)) {
                allowed.extend(policy.allowed_group_ids.iter().cloned());
            }
        }

        let allowed = Arc::new(allowed);
        self.caches.store_allowed_groups(&key, allowed.clone());
        allowed
    }

    /// The resolved membership of one group, filtered to enabled active
    /// tools of enabled sources.
    pub fn resolve_group_manifest(&self, group_id: &str) -> Arc<BTreeSet<ToolId>> {
        if let Some(cached) = self.caches.manifest(group_id) {
            return cached;
        }

        let manifest = match self.read_model.group(group_id) {
            Some(group) => Arc::new(self.compute_membership(&group)),
            None => Arc::new(BTreeSet::new()),
        };

        self.caches.store_manifest(group_id, manifest.clone());
        manifest
    }

    fn compute_membership(&self, group: &ToolGroupDto) -> BTreeSet<ToolId> {
        if !group.is_active {
            return BTreeSet::new();
        }

        let enabled_sources: BTreeSet<String> = self
            .read_model
            .sources()
            .into_iter()
            .filter(|source| source.enabled)
            .map(|source| source.id)
            .collect();

        let mut members = BTreeSet::new();

        for tool in self.read_model.tools() {
            if !tool.is_resolvable() || !enabled_sources.contains(&tool.source_id) {
                continue;
            }

            if group
                .selectors
                .iter()
                .any(|selector| selector.matches(&tool.tool_name, &tool.tags, &tool.source_id))
            {
                members.insert(tool.id.clone());
            }
        }

        for tool_id in &group.included {
            let resolvable = self
                .read_model
                .tool(tool_id)
                .is_some_and(|tool| tool.is_resolvable() && enabled_sources.contains(&tool.source_id));

            if resolvable {
                members.insert(tool_id.clone());
            }
        }

        for tool_id in &group.excluded {
            members.remove(tool_id);
        }

        members
    }

    /// Every tool id the caller may execute.
    pub fn resolve_accessible_tools(&self, claims: &Claims) -> BTreeSet<ToolId> {
        let mut accessible = BTreeSet::new();

        for group_id in self.resolve_allowed_groups(claims).iter() {
            accessible.extend(self.resolve_group_manifest(group_id).iter().cloned());
        }

        accessible
    }

    /// Whether the caller may execute one specific tool.
    pub fn can_access(&self, claims: &Claims, tool_id: &ToolId) -> bool {
        self.resolve_allowed_groups(claims)
            .iter()
            .any(|group_id| self.resolve_group_manifest(group_id).contains(tool_id))
    }
}
