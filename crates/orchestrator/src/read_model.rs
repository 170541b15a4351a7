//! Queryable projections of conversations, agent definitions, and
//! templates.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use event_store::{Aggregate, EventStore, Projection, SequenceTracker};
use jiff::Timestamp;
use serde::Serialize;

use crate::{
    AgentAccessRules, AgentDefinition, Conversation, ConversationStatus, ConversationTemplate, MessageRole,
    MessageStatus, TemplateItem, ToolCallRecord, ToolResultRecord,
};

/// Read-model record for one message, flattened for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    /// Message id.
    pub id: String,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Delivery status.
    pub status: MessageStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Attached tool calls.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Attached tool results.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,
}

/// Read-model record for a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDto {
    /// Conversation id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display title.
    pub title: Option<String>,
    /// Bound agent definition.
    pub agent_definition_id: Option<String>,
    /// Bound template.
    pub template_id: Option<String>,
    /// Progress through the bound template.
    pub current_item_index: usize,
    /// Structural status.
    pub status: ConversationStatus,
    /// Flattened messages.
    pub messages: Vec<MessageDto>,
    /// Completion summary.
    pub summary: Option<String>,
    /// Creation time.
    pub created_at: Option<Timestamp>,
    /// Last mutation time.
    pub updated_at: Option<Timestamp>,
    /// Last applied stream version.
    pub version: u64,
}

/// Read-model record for an agent definition.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDefinitionDto {
    /// Definition id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: Option<String>,
    /// Display icon reference.
    pub icon: Option<String>,
    /// Preferred model.
    pub model_id: Option<String>,
    /// Bound template.
    pub template_id: Option<String>,
    /// Access rules.
    pub access: AgentAccessRules,
    /// Last applied stream version.
    pub version: u64,
}

/// Read-model record for a template. Items keep their grading keys here;
/// only client-bound payloads are sanitized.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateDto {
    /// Template id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: Option<String>,
    /// Whether the agent opens the conversation.
    pub agent_starts_first: bool,
    /// Item count.
    pub item_count: usize,
    /// Ordered items.
    pub items: Vec<TemplateItem>,
    /// Last applied stream version.
    pub version: u64,
}

/// In-memory read model over the conversation-side aggregates.
pub struct ConversationReadModel {
    store: Arc<EventStore>,
    conversations: DashMap<String, ConversationDto>,
    definitions: DashMap<String, AgentDefinitionDto>,
    templates: DashMap<String, TemplateDto>,
    tracker: SequenceTracker,
}

impl ConversationReadModel {
    /// Creates an empty read model over the given store.
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            conversations: DashMap::new(),
            definitions: DashMap::new(),
            templates: DashMap::new(),
            tracker: SequenceTracker::new(),
        }
    }

    /// Rebuilds the record for one aggregate from its stream.
    pub async fn refresh_aggregate(&self, aggregate_type: &str, aggregate_id: &str, sequence: u64) {
        if !self.tracker.advance(&format!("{aggregate_type}/{aggregate_id}"), sequence) {
            return;
        }

        match aggregate_type {
            t if t == Conversation::AGGREGATE_TYPE => self.project_conversation(aggregate_id).await,
            t if t == AgentDefinition::AGGREGATE_TYPE => self.project_definition(aggregate_id).await,
            t if t == ConversationTemplate::AGGREGATE_TYPE => self.project_template(aggregate_id).await,
            _ => {}
        }
    }

    async fn project_conversation(&self, id: &str) {
        match self.store.try_load::<Conversation>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;

                let messages = state
                    .messages
                    .iter()
                    .map(|message| MessageDto {
                        id: message.id.clone(),
                        role: message.role,
                        content: message.content.clone(),
                        status: message.status,
                        created_at: message.created_at,
                        tool_calls: message.tool_calls.clone(),
                        tool_results: message.tool_results.clone(),
                    })
                    .collect();

                self.conversations.insert(
                    id.to_string(),
                    ConversationDto {
                        id: state.id,
                        user_id: state.user_id,
                        title: state.title,
                        agent_definition_id: state.agent_definition_id,
                        template_id: state.template_id,
                        current_item_index: state.current_item_index,
                        status: state.status,
                        messages,
                        summary: state.summary,
                        created_at: state.created_at,
                        updated_at: state.updated_at,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                // Soft delete removes the record from queries; events remain
                // in the store for audit.
                self.conversations.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", Conversation::AGGREGATE_TYPE),
        }
    }

    async fn project_definition(&self, id: &str) {
        match self.store.try_load::<AgentDefinition>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;

                self.definitions.insert(
                    id.to_string(),
                    AgentDefinitionDto {
                        id: state.id,
                        name: state.name,
                        description: state.description,
                        icon: state.icon,
                        model_id: state.model_id,
                        template_id: state.template_id,
                        access: state.access,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                self.definitions.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", AgentDefinition::AGGREGATE_TYPE),
        }
    }

    async fn project_template(&self, id: &str) {
        match self.store.try_load::<ConversationTemplate>(id).await {
            Ok(Some(hydrated)) if !hydrated.state.deleted => {
                let state = hydrated.state;

                self.templates.insert(
                    id.to_string(),
                    TemplateDto {
                        id: state.id,
                        name: state.name,
                        description: state.description,
                        agent_starts_first: state.agent_starts_first,
                        item_count: state.items.len(),
                        items: state.items,
                        version: hydrated.version,
                    },
                );
            }
            Ok(Some(_)) => {
                self.templates.remove(id);
            }
            Ok(None) => {}
            Err(err) => log::error!("failed to project {}/{id}: {err}", ConversationTemplate::AGGREGATE_TYPE),
        }
    }

    /// One conversation by id.
    pub fn conversation(&self, id: &str) -> Option<ConversationDto> {
        self.conversations.get(id).map(|entry| entry.clone())
    }

    /// A user's conversations, most recently updated first.
    pub fn conversations_for_user(&self, user_id: &str) -> Vec<ConversationDto> {
        let mut conversations: Vec<_> = self
            .conversations
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations
    }

    /// One definition by id.
    pub fn definition(&self, id: &str) -> Option<AgentDefinitionDto> {
        self.definitions.get(id).map(|entry| entry.clone())
    }

    /// All definitions, id-sorted.
    pub fn definitions(&self) -> Vec<AgentDefinitionDto> {
        let mut definitions: Vec<_> = self.definitions.iter().map(|entry| entry.clone()).collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// One template by id.
    pub fn template(&self, id: &str) -> Option<TemplateDto> {
        self.templates.get(id).map(|entry| entry.clone())
    }

    /// All templates, id-sorted.
    pub fn templates(&self) -> Vec<TemplateDto> {
        let mut templates: Vec<_> = self.templates.iter().map(|entry| entry.clone()).collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        templates
    }
}

#[async_trait]
impl Projection for ConversationReadModel {
    fn name(&self) -> &'static str {
        "conversations"
    }

    async fn apply(&self, envelope: &event_store::EventEnvelope) {
        self.refresh_aggregate(&envelope.aggregate_type, &envelope.aggregate_id, envelope.sequence)
            .await;
    }
}
