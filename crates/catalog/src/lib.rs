//! Tool catalog: upstream sources, discovered tools, curated groups, and
//! claim-based access policies.
//!
//! The catalog owns four event-sourced aggregates and their read models,
//! normalizes external API specifications into tool definitions, and
//! resolves which tools a caller may see and execute.

mod access;
mod cache;
mod definition;
mod error;
mod group;
mod ingestion;
mod policy;
mod read_model;
mod service;
mod source;
mod tool;
mod tool_id;

pub use access::AccessResolver;
pub use cache::CatalogCaches;
pub use definition::{
    ExecutionMode, ExecutionProfile, HttpMethod, InputSchema, ParameterLocation, PropertySchema, ToolDefinition,
};
pub use error::CatalogError;
pub use group::{SelectorField, SelectorKind, ToolGroup, ToolGroupEvent, ToolSelector};
pub use ingestion::{PluginToolDescriptor, RefreshOutcome, fetch_openapi_document, normalize_openapi, normalize_plugin_tools};
pub use policy::{AccessPolicy, AccessPolicyEvent, ClaimMatcher, MatchOperator};
pub use read_model::{AccessPolicyDto, CatalogReadModel, SourceDto, SourceToolDto, ToolGroupDto};
pub use service::{CatalogService, RegisterSource};
pub use source::{AuthMode, HealthStatus, PluginLaunchConfig, SourceEvent, SourceKind, UpstreamSource};
pub use tool::{SourceTool, SourceToolEvent, ToolStatus};
pub use tool_id::ToolId;
