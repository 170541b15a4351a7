//! The `SourceTool` aggregate: a single callable operation discovered from
//! an upstream source.

use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{ToolDefinition, ToolId};

/// Lifecycle status of a discovered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Present in the source inventory.
    #[default]
    Active,
    /// Missing from the latest inventory; retained for audit.
    Deprecated,
    /// Removed by an admin.
    Deleted,
}

/// Aggregate state for a discovered tool.
#[derive(Debug, Clone, Default)]
pub struct SourceTool {
    /// Composite id, `{source_id}:{operation_id}`.
    pub id: Option<ToolId>,
    /// The owning source.
    pub source_id: String,
    /// Denormalized source display name.
    pub source_name: String,
    /// Normalized tool name.
    pub tool_name: String,
    /// The executable definition.
    pub definition: Option<ToolDefinition>,
    /// Content hash of the definition, for refresh diffing.
    pub definition_hash: String,
    /// Only enabled tools resolve into groups.
    pub enabled: bool,
    /// Lifecycle status.
    pub status: ToolStatus,
    /// Last time the tool was seen in an inventory.
    pub last_seen_at: Option<Timestamp>,
}

/// Events of the `SourceTool` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceToolEvent {
    /// First discovery during an inventory sync.
    Discovered {
        /// Composite tool id.
        id: ToolId,
        /// The owning source.
        source_id: String,
        /// Denormalized source display name.
        source_name: String,
        /// Normalized tool name.
        tool_name: String,
        /// The executable definition.
        definition: ToolDefinition,
        /// Content hash of the definition.
        definition_hash: String,
        /// When.
        discovered_at: Timestamp,
    },
    /// The definition changed during a refresh.
    DefinitionUpdated {
        /// Hash before the change.
        old_definition_hash: String,
        /// The replacement definition.
        new_definition: ToolDefinition,
        /// Hash after the change.
        new_definition_hash: String,
        /// When.
        updated_at: Timestamp,
    },
    /// The tool disappeared from the source inventory.
    Deprecated {
        /// When.
        deprecated_at: Timestamp,
    },
    /// A deprecated tool reappeared.
    Restored {
        /// The definition observed on reappearance.
        new_definition: ToolDefinition,
        /// Its content hash.
        new_definition_hash: String,
        /// When.
        restored_at: Timestamp,
    },
    /// Admin enabled the tool.
    Enabled {
        /// When.
        enabled_at: Timestamp,
    },
    /// Admin disabled the tool.
    Disabled {
        /// Optional operator note.
        reason: Option<String>,
        /// When.
        disabled_at: Timestamp,
    },
    /// Admin removed the tool.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for SourceTool {
    type Event = SourceToolEvent;
    const AGGREGATE_TYPE: &'static str = "source_tool";

    fn apply(&mut self, event: &SourceToolEvent) {
        match event {
            SourceToolEvent::Discovered {
                id,
                source_id,
                source_name,
                tool_name,
                definition,
                definition_hash,
                discovered_at,
            } => {
                self.id = Some(id.clone());
                self.source_id = source_id.clone();
                self.source_name = source_name.clone();
                self.tool_name = tool_name.clone();
                self.definition = Some(definition.clone());
                self.definition_hash = definition_hash.clone();
                self.enabled = true;
                self.status = ToolStatus::Active;
                self.last_seen_at = Some(*discovered_at);
            }
            SourceToolEvent::DefinitionUpdated {
                new_definition,
                new_definition_hash,
                updated_at,
                ..
            } => {
                self.definition = Some(new_definition.clone());
                self.definition_hash = new_definition_hash.clone();
                self.last_seen_at = Some(*updated_at);
            }
            SourceToolEvent::Deprecated { .. } => {
                self.status = ToolStatus::Deprecated;
            }
            SourceToolEvent::Restored {
                new_definition,
                new_definition_hash,
                restored_at,
            } => {
                self.definition = Some(new_definition.clone());
                self.definition_hash = new_definition_hash.clone();
                self.status = ToolStatus::Active;
                self.last_seen_at = Some(*restored_at);
            }
            SourceToolEvent::Enabled { .. } => self.enabled = true,
            SourceToolEvent::Disabled { .. } => self.enabled = false,
            SourceToolEvent::Deleted { .. } => {
                self.status = ToolStatus::Deleted;
                self.enabled = false;
            }
        }
    }
}

impl SourceTool {
    /// Discovery command, used by ingestion for tools not yet in the store.
    pub fn discover(
        id: ToolId,
        source_name: &str,
        definition: ToolDefinition,
    ) -> Vec<SourceToolEvent> {
        let definition_hash = definition.content_hash();

        vec![SourceToolEvent::Discovered {
            source_id: id.source_id().to_string(),
            source_name: source_name.to_string(),
            tool_name: definition.name.clone(),
            id,
            definition,
            definition_hash,
            discovered_at: Timestamp::now(),
        }]
    }

    /// Refresh command for a tool present in the latest inventory. Produces
    /// a definition update on hash change, a restore for deprecated tools,
    /// nothing when unchanged.
    pub fn refresh(&self, definition: ToolDefinition) -> Vec<SourceToolEvent> {
        let new_hash = definition.content_hash();

        if self.status == ToolStatus::Deprecated {
            return vec![SourceToolEvent::Restored {
                new_definition: definition,
                new_definition_hash: new_hash,
                restored_at: Timestamp::now(),
            }];
        }

        if new_hash == self.definition_hash {
            return Vec::new();
        }

        vec![SourceToolEvent::DefinitionUpdated {
            old_definition_hash: self.definition_hash.clone(),
            new_definition: definition,
            new_definition_hash: new_hash,
            updated_at: Timestamp::now(),
        }]
    }

    /// Marks the tool missing from the latest inventory. No event when
    /// already deprecated or deleted.
    pub fn deprecate(&self) -> Vec<SourceToolEvent> {
        if self.status != ToolStatus::Active {
            return Vec::new();
        }
        vec![SourceToolEvent::Deprecated {
            deprecated_at: Timestamp::now(),
        }]
    }

    /// Enables the tool. No event when already enabled.
    pub fn enable(&self) -> Vec<SourceToolEvent> {
        if self.enabled {
            return Vec::new();
        }
        vec![SourceToolEvent::Enabled {
            enabled_at: Timestamp::now(),
        }]
    }

    /// Disables the tool. No event when already disabled.
    pub fn disable(&self, reason: Option<String>) -> Vec<SourceToolEvent> {
        if !self.enabled {
            return Vec::new();
        }
        vec![SourceToolEvent::Disabled {
            reason,
            disabled_at: Timestamp::now(),
        }]
    }

    /// Removes the tool. No event when already deleted.
    pub fn delete(&self) -> Vec<SourceToolEvent> {
        if self.status == ToolStatus::Deleted {
            return Vec::new();
        }
        vec![SourceToolEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionMode, ExecutionProfile, HttpMethod, InputSchema};

    fn definition(description: &str) -> ToolDefinition {
        ToolDefinition {
            name: "get_forecast".into(),
            description: description.into(),
            input_schema: InputSchema::default(),
            execution: ExecutionProfile {
                mode: ExecutionMode::Http {
                    method: HttpMethod::Get,
                    path: "/forecast".into(),
                },
                required_audience: None,
                timeout_seconds: None,
                response_pointer: None,
            },
            tags: vec![],
        }
    }

    fn discovered() -> SourceTool {
        let mut tool = SourceTool::default();
        let events = SourceTool::discover(
            ToolId::new("weather", "get_forecast"),
            "Weather API",
            definition("v1"),
        );
        for event in &events {
            tool.apply(event);
        }
        tool
    }

    #[test]
    fn discovery_activates_and_enables() {
        let tool = discovered();
        assert!(tool.enabled);
        assert_eq!(tool.status, ToolStatus::Active);
        assert_eq!(tool.tool_name, "get_forecast");
    }

    #[test]
    fn unchanged_refresh_is_silent() {
        let tool = discovered();
        assert!(tool.refresh(definition("v1")).is_empty());
    }

    #[test]
    fn changed_refresh_updates_definition() {
        let mut tool = discovered();
        let old_hash = tool.definition_hash.clone();

        let events = tool.refresh(definition("v2"));
        assert_eq!(events.len(), 1);
        match &events[0] {
            SourceToolEvent::DefinitionUpdated {
                old_definition_hash,
                new_definition_hash,
                ..
            } => {
                assert_eq!(old_definition_hash, &old_hash);
                assert_ne!(new_definition_hash, &old_hash);
            }
            other => panic!("unexpected event {other:?}"),
        }

        for event in &events {
            tool.apply(event);
        }
        assert_ne!(tool.definition_hash, old_hash);
    }

    #[test]
    fn deprecated_tool_restores_on_reappearance() {
        let mut tool = discovered();

        for event in tool.deprecate() {
            tool.apply(&event);
        }
        assert_eq!(tool.status, ToolStatus::Deprecated);
        assert!(tool.deprecate().is_empty());

        let events = tool.refresh(definition("v1"));
        assert!(matches!(events[0], SourceToolEvent::Restored { .. }));
        for event in &events {
            tool.apply(event);
        }
        assert_eq!(tool.status, ToolStatus::Active);
    }

    #[test]
    fn disable_keeps_status_active() {
        let mut tool = discovered();

        for event in tool.disable(Some("broken".into())) {
            tool.apply(&event);
        }
        assert!(!tool.enabled);
        assert_eq!(tool.status, ToolStatus::Active);
    }
}
