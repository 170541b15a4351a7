//! The `AgentDefinition` aggregate: behavioral configuration binding a
//! system prompt, model choice, tool allow-list, and optional template.

use catalog::ToolId;
use context::Claims;
use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::OrchestratorError;

/// Who may open sessions against a definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAccessRules {
    /// When true, any authenticated caller may use the definition.
    #[serde(default)]
    pub is_public: bool,
    /// Roles (from the `roles` claim) that grant access.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// OAuth scopes (from the `scope` claim) that grant access.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Subjects explicitly allowed.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl AgentAccessRules {
    /// Whether the caller's claims satisfy these rules. Public definitions
    /// admit everyone; otherwise any matching role, scope, or explicit
    /// subject grants access.
    pub fn allows(&self, claims: &Claims) -> bool {
        if self.is_public {
            return true;
        }

        if let Some(subject) = claims.subject.as_deref()
            && self.allowed_users.iter().any(|user| user == subject)
        {
            return true;
        }

        if let Some(Value::Array(roles)) = claims.value_at("roles")
            && self
                .required_roles
                .iter()
                .any(|role| roles.contains(&Value::String(role.clone())))
        {
            return true;
        }

        if let Some(scope) = claims.get_claim("scope") {
            let granted: Vec<&str> = scope.split_whitespace().collect();
            if self.required_scopes.iter().any(|scope| granted.contains(&scope.as_str())) {
                return true;
            }
        }

        false
    }
}

/// Aggregate state for an agent definition.
#[derive(Debug, Clone, Default)]
pub struct AgentDefinition {
    /// Aggregate id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
    /// Display icon reference.
    pub icon: Option<String>,
    /// System prompt injected as the first message.
    pub system_prompt: Option<String>,
    /// Preferred model, in `provider/model` form.
    pub model_id: Option<String>,
    /// Tools this agent may use. Empty means every tool the caller can
    /// access.
    pub allowed_tools: Vec<ToolId>,
    /// Bound proactive template.
    pub template_id: Option<String>,
    /// Owning user.
    pub owner_id: Option<String>,
    /// Who may open sessions.
    pub access: AgentAccessRules,
    /// Soft-deleted definitions stay replayable but leave the read model.
    pub deleted: bool,
}

/// Events of the `AgentDefinition` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentDefinitionEvent {
    /// The definition was created.
    Created {
        /// Aggregate id.
        id: String,
        /// Display name.
        name: String,
        /// Display description.
        description: Option<String>,
        /// Display icon reference.
        icon: Option<String>,
        /// System prompt.
        system_prompt: Option<String>,
        /// Preferred model.
        model_id: Option<String>,
        /// Tool allow-list.
        allowed_tools: Vec<ToolId>,
        /// Bound template.
        template_id: Option<String>,
        /// Owning user.
        owner_id: Option<String>,
        /// Access rules.
        access: AgentAccessRules,
        /// When.
        created_at: Timestamp,
    },
    /// Fields were replaced.
    Updated {
        /// New name, when changed.
        name: Option<String>,
        /// New description, when changed.
        description: Option<String>,
        /// New system prompt, when changed.
        system_prompt: Option<String>,
        /// New model, when changed.
        model_id: Option<String>,
        /// New allow-list, when changed.
        allowed_tools: Option<Vec<ToolId>>,
        /// New template binding, when changed.
        template_id: Option<Option<String>>,
        /// New access rules, when changed.
        access: Option<AgentAccessRules>,
        /// When.
        updated_at: Timestamp,
    },
    /// The definition was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for AgentDefinition {
    type Event = AgentDefinitionEvent;
    const AGGREGATE_TYPE: &'static str = "agent_definition";

    fn apply(&mut self, event: &AgentDefinitionEvent) {
        match event {
            AgentDefinitionEvent::Created {
                id,
                name,
                description,
                icon,
                system_prompt,
                model_id,
                allowed_tools,
                template_id,
                owner_id,
                access,
                ..
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.description = description.clone();
                self.icon = icon.clone();
                self.system_prompt = system_prompt.clone();
                self.model_id = model_id.clone();
                self.allowed_tools = allowed_tools.clone();
                self.template_id = template_id.clone();
                self.owner_id = owner_id.clone();
                self.access = access.clone();
            }
            AgentDefinitionEvent::Updated {
                name,
                description,
                system_prompt,
                model_id,
                allowed_tools,
                template_id,
                access,
                ..
            } => {
                if let Some(name) = name {
                    self.name = name.clone();
                }
                if description.is_some() {
                    self.description = description.clone();
                }
                if system_prompt.is_some() {
                    self.system_prompt = system_prompt.clone();
                }
                if model_id.is_some() {
                    self.model_id = model_id.clone();
                }
                if let Some(allowed_tools) = allowed_tools {
                    self.allowed_tools = allowed_tools.clone();
                }
                if let Some(template_id) = template_id {
                    self.template_id = template_id.clone();
                }
                if let Some(access) = access {
                    self.access = access.clone();
                }
            }
            AgentDefinitionEvent::Deleted { .. } => self.deleted = true,
        }
    }
}

impl AgentDefinition {
    /// Creation command.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: &str,
        name: &str,
        system_prompt: Option<String>,
        model_id: Option<String>,
        allowed_tools: Vec<ToolId>,
        template_id: Option<String>,
        owner_id: Option<String>,
        access: AgentAccessRules,
    ) -> Result<Vec<AgentDefinitionEvent>, OrchestratorError> {
        if id.trim().is_empty() {
            return Err(OrchestratorError::validation("id", "definition id cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(OrchestratorError::validation("name", "definition name cannot be empty"));
        }

        Ok(vec![AgentDefinitionEvent::Created {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            description: None,
            icon: None,
            system_prompt,
            model_id,
            allowed_tools,
            template_id,
            owner_id,
            access,
            created_at: Timestamp::now(),
        }])
    }

    /// Soft-deletes the definition.
    pub fn delete(&self) -> Vec<AgentDefinitionEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![AgentDefinitionEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }

    /// Whether the caller may open sessions against this definition. Owners
    /// always may.
    pub fn allows(&self, claims: &Claims) -> bool {
        if let (Some(owner), Some(subject)) = (self.owner_id.as_deref(), claims.subject.as_deref())
            && owner == subject
        {
            return true;
        }

        self.access.allows(claims)
    }

    /// Whether a tool passes this definition's allow-list.
    pub fn permits_tool(&self, tool_id: &ToolId) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.contains(tool_id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claims(additional: Value, subject: &str) -> Claims {
        Claims {
            issuer: None,
            audience: None,
            subject: Some(subject.to_string()),
            additional: serde_json::from_value(additional).unwrap(),
        }
    }

    #[test]
    fn public_definitions_admit_everyone() {
        let rules = AgentAccessRules {
            is_public: true,
            ..Default::default()
        };
        assert!(rules.allows(&claims(json!({}), "anyone")));
    }

    #[test]
    fn role_scope_and_subject_grants() {
        let rules = AgentAccessRules {
            is_public: false,
            required_roles: vec!["teacher".into()],
            required_scopes: vec!["agents:use".into()],
            allowed_users: vec!["user-7".into()],
        };

        assert!(rules.allows(&claims(json!({"roles": ["teacher"]}), "u1")));
        assert!(rules.allows(&claims(json!({"scope": "openid agents:use"}), "u2")));
        assert!(rules.allows(&claims(json!({}), "user-7")));
        assert!(!rules.allows(&claims(json!({"roles": ["student"]}), "u3")));
    }

    #[test]
    fn owner_always_allowed() {
        let mut definition = AgentDefinition::default();
        for event in AgentDefinition::create(
            "d1",
            "Tutor",
            None,
            None,
            vec![],
            None,
            Some("owner-1".into()),
            AgentAccessRules::default(),
        )
        .unwrap()
        {
            definition.apply(&event);
        }

        assert!(definition.allows(&claims(json!({}), "owner-1")));
        assert!(!definition.allows(&claims(json!({}), "someone-else")));
    }

    #[test]
    fn empty_allow_list_permits_all_tools() {
        let definition = AgentDefinition::default();
        assert!(definition.permits_tool(&ToolId::new("weather", "get_forecast")));

        let mut restricted = AgentDefinition::default();
        for event in AgentDefinition::create(
            "d1",
            "Tutor",
            None,
            None,
            vec![ToolId::new("weather", "get_forecast")],
            None,
            None,
            AgentAccessRules::default(),
        )
        .unwrap()
        {
            restricted.apply(&event);
        }

        assert!(restricted.permits_tool(&ToolId::new("weather", "get_forecast")));
        assert!(!restricted.permits_tool(&ToolId::new("weather", "delete_city")));
    }
}
