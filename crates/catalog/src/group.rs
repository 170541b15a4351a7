//! The `ToolGroup` aggregate: a curated set of tools assembled from
//! selectors, explicit includes, and explicit excludes.

use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CatalogError, ToolId};

/// Which tool attribute a selector matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorField {
    /// The normalized tool name.
    Name,
    /// Any of the tool's tags.
    Tags,
    /// The owning source id.
    SourceId,
}

/// How a selector pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Glob-style wildcard matching (`get_*`, `weather?`).
    #[default]
    Wildcard,
    /// Full regular expression matching.
    Regex,
}

/// A pattern-based rule picking tools into a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelector {
    /// Identifies the selector for removal.
    pub id: String,
    /// The attribute the pattern applies to.
    pub field: SelectorField,
    /// Pattern interpretation.
    #[serde(default)]
    pub kind: SelectorKind,
    /// The pattern itself.
    pub pattern: String,
}

impl ToolSelector {
    /// Creates a selector with a fresh id.
    pub fn new(field: SelectorField, kind: SelectorKind, pattern: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            field,
            kind,
            pattern: pattern.into(),
        }
    }

    /// Whether a tool descriptor matches this selector.
    pub fn matches(&self, tool_name: &str, tags: &[String], source_id: &str) -> bool {
        match self.field {
            SelectorField::Name => self.matches_value(tool_name),
            SelectorField::SourceId => self.matches_value(source_id),
            SelectorField::Tags => tags.iter().any(|tag| self.matches_value(tag)),
        }
    }

    fn matches_value(&self, value: &str) -> bool {
        match self.kind {
            SelectorKind::Wildcard => fast_glob::glob_match(&self.pattern, value),
            SelectorKind::Regex => match regex::Regex::new(&self.pattern) {
                Ok(re) => re.is_match(value),
                Err(err) => {
                    log::warn!("selector '{}' has an invalid regex pattern: {err}", self.id);
                    false
                }
            },
        }
    }
}

/// Aggregate state for a tool group.
#[derive(Debug, Clone, Default)]
pub struct ToolGroup {
    /// Aggregate id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: String,
    /// Pattern-based membership rules.
    pub selectors: Vec<ToolSelector>,
    /// Tools explicitly added regardless of selectors.
    pub included: Vec<ToolId>,
    /// Tools removed even when matched by selectors or includes.
    pub excluded: Vec<ToolId>,
    /// Inactive groups grant nothing.
    pub is_active: bool,
    /// Soft-deleted groups stay replayable but leave the read model.
    pub deleted: bool,
}

/// Events of the `ToolGroup` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolGroupEvent {
    /// The group was created.
    Created {
        /// Aggregate id.
        id: String,
        /// Display name.
        name: String,
        /// Purpose description.
        description: String,
        /// Initial selectors.
        selectors: Vec<ToolSelector>,
        /// When.
        created_at: Timestamp,
    },
    /// Name or description changed.
    Updated {
        /// New name, when changed.
        name: Option<String>,
        /// New description, when changed.
        description: Option<String>,
        /// When.
        updated_at: Timestamp,
    },
    /// A selector was added.
    SelectorAdded {
        /// The new selector.
        selector: ToolSelector,
        /// When.
        added_at: Timestamp,
    },
    /// A selector was removed.
    SelectorRemoved {
        /// Id of the removed selector.
        selector_id: String,
        /// When.
        removed_at: Timestamp,
    },
    /// A tool was explicitly included.
    ToolIncluded {
        /// The tool.
        tool_id: ToolId,
        /// When.
        included_at: Timestamp,
    },
    /// An explicit include was removed.
    IncludedToolRemoved {
        /// The tool.
        tool_id: ToolId,
        /// When.
        removed_at: Timestamp,
    },
    /// A tool was explicitly excluded.
    ToolExcluded {
        /// The tool.
        tool_id: ToolId,
        /// When.
        excluded_at: Timestamp,
    },
    /// An exclusion was lifted.
    ToolUnexcluded {
        /// The tool.
        tool_id: ToolId,
        /// When.
        unexcluded_at: Timestamp,
    },
    /// The group was activated.
    Activated {
        /// When.
        activated_at: Timestamp,
    },
    /// The group was deactivated.
    Deactivated {
        /// When.
        deactivated_at: Timestamp,
    },
    /// The group was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for ToolGroup {
    type Event = ToolGroupEvent;
    const AGGREGATE_TYPE: &'static str = "tool_group";

    fn apply(&mut self, event: &ToolGroupEvent) {
        match event {
            ToolGroupEvent::Created {
                id,
                name,
                description,
                selectors,
                ..
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.description = description.clone();
                self.selectors = selectors.clone();
                self.is_active = true;
            }
            ToolGroupEvent::Updated { name, description, .. } => {
                if let Some(name) = name {
                    self.name = name.clone();
                }
                if let Some(description) = description {
                    self.description = description.clone();
                }
            }
            ToolGroupEvent::SelectorAdded { selector, .. } => {
                self.selectors.push(selector.clone());
            }
            ToolGroupEvent::SelectorRemoved { selector_id, .. } => {
                self.selectors.retain(|selector| &selector.id != selector_id);
            }
            ToolGroupEvent::ToolIncluded { tool_id, .. } => {
                if !self.included.contains(tool_id) {
                    self.included.push(tool_id.clone());
                }
            }
            ToolGroupEvent::IncludedToolRemoved { tool_id, .. } => {
                self.included.retain(|id| id != tool_id);
            }
            ToolGroupEvent::ToolExcluded { tool_id, .. } => {
                if !self.excluded.contains(tool_id) {
                    self.excluded.push(tool_id.clone());
                }
            }
            ToolGroupEvent::ToolUnexcluded { tool_id, .. } => {
                self.excluded.retain(|id| id != tool_id);
            }
            ToolGroupEvent::Activated { .. } => self.is_active = true,
            ToolGroupEvent::Deactivated { .. } => self.is_active = false,
            ToolGroupEvent::Deleted { .. } => {
                self.deleted = true;
                self.is_active = false;
            }
        }
    }
}

impl ToolGroup {
    /// Creation command.
    pub fn create(
        id: &str,
        name: &str,
        description: &str,
        selectors: Vec<ToolSelector>,
    ) -> Result<Vec<ToolGroupEvent>, CatalogError> {
        if id.trim().is_empty() {
            return Err(CatalogError::validation("id", "group id cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(CatalogError::validation("name", "group name cannot be empty"));
        }

        Ok(vec![ToolGroupEvent::Created {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            selectors,
            created_at: Timestamp::now(),
        }])
    }

    /// Renames or re-describes the group. No event when nothing changed.
    pub fn update(&self, name: Option<&str>, description: Option<&str>) -> Vec<ToolGroupEvent> {
        let name = name.map(str::trim).filter(|name| *name != self.name);
        let description = description.map(str::trim).filter(|description| *description != self.description);

        if name.is_none() && description.is_none() {
            return Vec::new();
        }

        vec![ToolGroupEvent::Updated {
            name: name.map(str::to_string),
            description: description.map(str::to_string),
            updated_at: Timestamp::now(),
        }]
    }

    /// Adds a selector.
    pub fn add_selector(&self, selector: ToolSelector) -> Vec<ToolGroupEvent> {
        vec![ToolGroupEvent::SelectorAdded {
            selector,
            added_at: Timestamp::now(),
        }]
    }

    /// Removes a selector by id. No event for an unknown id.
    pub fn remove_selector(&self, selector_id: &str) -> Vec<ToolGroupEvent> {
        if !self.selectors.iter().any(|selector| selector.id == selector_id) {
            return Vec::new();
        }
        vec![ToolGroupEvent::SelectorRemoved {
            selector_id: selector_id.to_string(),
            removed_at: Timestamp::now(),
        }]
    }

    /// Explicitly includes a tool. No event when already included.
    pub fn include_tool(&self, tool_id: ToolId) -> Vec<ToolGroupEvent> {
        if self.included.contains(&tool_id) {
            return Vec::new();
        }
        vec![ToolGroupEvent::ToolIncluded {
            tool_id,
            included_at: Timestamp::now(),
        }]
    }

    /// Drops an explicit include. No event when not included.
    pub fn remove_included_tool(&self, tool_id: &ToolId) -> Vec<ToolGroupEvent> {
        if !self.included.contains(tool_id) {
            return Vec::new();
        }
        vec![ToolGroupEvent::IncludedToolRemoved {
            tool_id: tool_id.clone(),
            removed_at: Timestamp::now(),
        }]
    }

    /// Excludes a tool from the group regardless of selectors.
    pub fn exclude_tool(&self, tool_id: ToolId) -> Vec<ToolGroupEvent> {
        if self.excluded.contains(&tool_id) {
            return Vec::new();
        }
        vec![ToolGroupEvent::ToolExcluded {
            tool_id,
            excluded_at: Timestamp::now(),
        }]
    }

    /// Lifts an exclusion. No event when not excluded.
    pub fn unexclude_tool(&self, tool_id: &ToolId) -> Vec<ToolGroupEvent> {
        if !self.excluded.contains(tool_id) {
            return Vec::new();
        }
        vec![ToolGroupEvent::ToolUnexcluded {
            tool_id: tool_id.clone(),
            unexcluded_at: Timestamp::now(),
        }]
    }

    /// Activates the group. No event when already active.
    pub fn activate(&self) -> Vec<ToolGroupEvent> {
        if self.is_active {
            return Vec::new();
        }
        vec![ToolGroupEvent::Activated {
            activated_at: Timestamp::now(),
        }]
    }

    /// Deactivates the group. No event when already inactive.
    pub fn deactivate(&self) -> Vec<ToolGroupEvent> {
        if !self.is_active {
            return Vec::new();
        }
        vec![ToolGroupEvent::Deactivated {
            deactivated_at: Timestamp::now(),
        }]
    }

    /// Soft-deletes the group.
    pub fn delete(&self) -> Vec<ToolGroupEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![ToolGroupEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_selectors_match_names_and_tags() {
        let by_name = ToolSelector::new(SelectorField::Name, SelectorKind::Wildcard, "get_*");
        assert!(by_name.matches("get_forecast", &[], "weather"));
        assert!(!by_name.matches("list_users", &[], "weather"));

        let by_tag = ToolSelector::new(SelectorField::Tags, SelectorKind::Wildcard, "weather");
        assert!(by_tag.matches("anything", &["weather".into(), "public".into()], "src"));
        assert!(!by_tag.matches("anything", &["admin".into()], "src"));

        let by_source = ToolSelector::new(SelectorField::SourceId, SelectorKind::Wildcard, "weather*");
        assert!(by_source.matches("x", &[], "weather-eu"));
    }

    #[test]
    fn regex_selectors_match_and_invalid_patterns_never_match() {
        let re = ToolSelector::new(SelectorField::Name, SelectorKind::Regex, "^(get|list)_");
        assert!(re.matches("get_forecast", &[], "s"));
        assert!(re.matches("list_users", &[], "s"));
        assert!(!re.matches("delete_user", &[], "s"));

        let bad = ToolSelector::new(SelectorField::Name, SelectorKind::Regex, "(unclosed");
        assert!(!bad.matches("anything", &[], "s"));
    }

    #[test]
    fn include_exclude_commands_are_idempotent() {
        let mut group = ToolGroup::default();
        for event in ToolGroup::create("ops", "Ops", "", vec![]).unwrap() {
            group.apply(&event);
        }

        let tool = ToolId::new("weather", "get_forecast");

        let include = group.include_tool(tool.clone());
        assert_eq!(include.len(), 1);
        for event in &include {
            group.apply(event);
        }
        assert!(group.include_tool(tool.clone()).is_empty());

        let exclude = group.exclude_tool(tool.clone());
        for event in &exclude {
            group.apply(event);
        }
        assert!(group.exclude_tool(tool.clone()).is_empty());
        assert_eq!(group.unexclude_tool(&tool).len(), 1);
    }

    #[test]
    fn selector_removal_targets_by_id() {
        let mut group = ToolGroup::default();
        let selector = ToolSelector::new(SelectorField::Name, SelectorKind::Wildcard, "get_*");
        let selector_id = selector.id.clone();

        for event in ToolGroup::create("ops", "Ops", "", vec![selector]).unwrap() {
            group.apply(&event);
        }

        assert!(group.remove_selector("unknown").is_empty());

        for event in group.remove_selector(&selector_id) {
            group.apply(&event);
        }
        assert!(group.selectors.is_empty());
    }
}
