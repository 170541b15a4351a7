//! Advisory caches for group manifests and per-caller access resolutions.

use std::collections::BTreeSet;
use std::sync::Arc;

use config::CatalogConfig;
use context::Claims;
use event_store::{Aggregate, EventEnvelope, EventStore};
use mini_moka::sync::Cache;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast::error::RecvError;

use crate::{AccessPolicy, SourceTool, ToolGroup, ToolId, UpstreamSource};

const MANIFEST_CACHE_CAPACITY: u64 = 10_000;
const ACCESS_CACHE_CAPACITY: u64 = 100_000;

/// The two catalog caches. Both are advisory: a miss or expiry recomputes
/// from the read model, and every relevant commit invalidates eagerly.
pub struct CatalogCaches {
    manifests: Cache<String, Arc<BTreeSet<ToolId>>>,
    access: Cache<String, Arc<BTreeSet<String>>>,
}

impl CatalogCaches {
    /// Creates caches with the configured TTLs.
    pub fn new(config: &CatalogConfig) -> Self {
        let manifests = Cache::builder()
            .max_capacity(MANIFEST_CACHE_CAPACITY)
            .time_to_live(config.manifest_cache_ttl)
            .build();

        let access = Cache::builder()
            .max_capacity(ACCESS_CACHE_CAPACITY)
            .time_to_live(config.access_cache_ttl)
            .build();

        Self { manifests, access }
    }

    /// Cached manifest for a group.
    pub fn manifest(&self, group_id: &str) -> Option<Arc<BTreeSet<ToolId>>> {
        self.manifests.get(&group_id.to_string())
    }

    /// Stores a freshly resolved manifest.
    pub fn store_manifest(&self, group_id: &str, manifest: Arc<BTreeSet<ToolId>>) {
        self.manifests.insert(group_id.to_string(), manifest);
    }

    /// Cached allowed-group set for a claims key.
    pub fn allowed_groups(&self, claims_key: &str) -> Option<Arc<BTreeSet<String>>> {
        self.access.get(&claims_key.to_string())
    }

    /// Stores a freshly resolved allowed-group set.
    pub fn store_allowed_groups(&self, claims_key: &str, groups: Arc<BTreeSet<String>>) {
        self.access.insert(claims_key.to_string(), groups);
    }

    /// Drops one group's manifest.
    pub fn invalidate_manifest(&self, group_id: &str) {
        self.manifests.invalidate(&group_id.to_string());
    }

    /// Drops every manifest. Used when a tool or source changes, since any
    /// selector may match it.
    pub fn invalidate_all_manifests(&self) {
        self.manifests.invalidate_all();
    }

    /// Drops every access resolution. Used on any policy change.
    pub fn invalidate_access(&self) {
        self.access.invalidate_all();
    }

    /// Applies the invalidation rules for one committed event.
    pub fn invalidate_for(&self, envelope: &EventEnvelope) {
        match envelope.aggregate_type.as_str() {
            t if t == ToolGroup::AGGREGATE_TYPE => {
                self.invalidate_manifest(&envelope.aggregate_id);
            }
            t if t == SourceTool::AGGREGATE_TYPE || t == UpstreamSource::AGGREGATE_TYPE => {
                self.invalidate_all_manifests();
            }
            t if t == AccessPolicy::AGGREGATE_TYPE => {
                self.invalidate_access();
            }
            _ => {}
        }
    }

    /// Runs the bus-driven invalidator until the store drops. Spawn on its
    /// own task.
    pub async fn run_invalidator(self: Arc<Self>, store: Arc<EventStore>) {
        let mut receiver = store.subscribe();

        loop {
            match receiver.recv().await {
                Ok(envelope) => self.invalidate_for(&envelope),
                Err(RecvError::Lagged(_)) => {
                    // Missed invalidations; drop everything rather than
                    // serve stale entries.
                    self.invalidate_all_manifests();
                    self.invalidate_access();
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Stable cache key over the claims an access decision depends on. Only the
/// claim paths named by some policy participate, so unrelated claims (or
/// token rotation) do not fragment the cache.
pub(crate) fn claims_cache_key(paths: &[String], claims: &Claims) -> String {
    let mut hasher = Sha256::new();

    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update(b"=");
        match claims.value_at(path) {
            Some(value) => {
                if let Ok(bytes) = serde_json::to_vec(&value) {
                    hasher.update(&bytes);
                }
            }
            None => hasher.update(b"null"),
        }
        hasher.update(b";");
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(additional: serde_json::Value) -> Claims {
        Claims {
            issuer: None,
            audience: None,
            subject: Some("user-1".into()),
            additional: serde_json::from_value(additional).unwrap(),
        }
    }

    #[test]
    fn key_depends_only_on_named_paths() {
        let paths = vec!["roles".to_string()];

        let a = claims(json!({"roles": ["admin"], "session": "s1"}));
        let b = claims(json!({"roles": ["admin"], "session": "s2"}));
        let c = claims(json!({"roles": ["viewer"], "session": "s1"}));

        assert_eq!(claims_cache_key(&paths, &a), claims_cache_key(&paths, &b));
        assert_ne!(claims_cache_key(&paths, &a), claims_cache_key(&paths, &c));
    }

    #[test]
    fn missing_claims_hash_distinctly() {
        let paths = vec!["roles".to_string()];

        let present = claims(json!({"roles": []}));
        let absent = claims(json!({}));

        assert_ne!(claims_cache_key(&paths, &present), claims_cache_key(&paths, &absent));
    }
}
