//! The `Conversation` aggregate: a per-user thread of messages, tool
//! calls/results, and template progress.

use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::OrchestratorError;

const TITLE_MAX_CHARS: usize = 50;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The definition's system prompt.
    System,
    /// The end user.
    User,
    /// The model.
    Assistant,
    /// A tool result.
    Tool,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still streaming.
    InProgress,
    /// Fully delivered.
    Completed,
    /// Terminated by an error.
    Failed,
}

/// A tool invocation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Call id, echoed by the matching result.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Call arguments.
    pub arguments: Value,
}

/// A tool result attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    /// The call this result answers.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Whether execution completed.
    pub success: bool,
    /// Result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch wall-clock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

/// A widget awaiting a structured client response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientActionRecord {
    /// Widget id the client must answer with.
    pub widget_id: String,
    /// Widget type rendered by the client.
    pub widget_type: String,
    /// Render properties. Never contains grading material.
    pub props: Value,
}

/// A recorded widget answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetResponseRecord {
    /// The answered widget.
    pub widget_id: String,
    /// Template item the widget belonged to.
    pub item_index: usize,
    /// The structured answer.
    pub value: Value,
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message id, stable across streaming.
    pub id: String,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Delivery status.
    pub status: MessageStatus,
    /// Tool calls requested by this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool results attached to this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,
}

/// Structural status of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Created, no user turn yet.
    #[default]
    Pending,
    /// In normal exchange.
    Active,
    /// Suspended on a pending client action.
    AwaitingResponse,
    /// Terminal.
    Completed,
}

/// Aggregate state for a conversation.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Aggregate id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display title; auto-derived from the first user message.
    pub title: Option<String>,
    /// The definition's system prompt at creation time.
    pub system_prompt: Option<String>,
    /// Bound agent definition.
    pub agent_definition_id: Option<String>,
    /// Bound conversation template.
    pub template_id: Option<String>,
    /// Progress through the bound template.
    pub current_item_index: usize,
    /// Ordered messages.
    pub messages: Vec<Message>,
    /// Structural status.
    pub status: ConversationStatus,
    /// The single unresolved client action, present iff status is
    /// `AwaitingResponse`.
    pub pending_action: Option<ClientActionRecord>,
    /// Every recorded widget answer, for mid-flow reloads and scoring.
    pub widget_responses: Vec<WidgetResponseRecord>,
    /// Completion summary.
    pub summary: Option<String>,
    /// Soft-deleted conversations stay replayable but leave the read model.
    pub deleted: bool,
    /// Creation time.
    pub created_at: Option<Timestamp>,
    /// Last mutation time.
    pub updated_at: Option<Timestamp>,
}

/// Events of the `Conversation` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// The conversation was created.
    Created {
        /// Aggregate id.
        id: String,
        /// Owning user.
        user_id: String,
        /// Bound agent definition.
        agent_definition_id: Option<String>,
        /// Bound template.
        template_id: Option<String>,
        /// Initial title.
        title: Option<String>,
        /// System prompt captured from the definition.
        system_prompt: Option<String>,
        /// When.
        created_at: Timestamp,
    },
    /// The title changed.
    TitleUpdated {
        /// The new title.
        new_title: String,
        /// When.
        updated_at: Timestamp,
    },
    /// A message was appended.
    MessageAdded {
        /// Message id.
        message_id: String,
        /// Author role.
        role: MessageRole,
        /// Text content.
        content: String,
        /// Initial status.
        status: MessageStatus,
        /// When.
        created_at: Timestamp,
    },
    /// A message's status changed.
    MessageStatusChanged {
        /// The message.
        message_id: String,
        /// The new status.
        new_status: MessageStatus,
        /// When.
        changed_at: Timestamp,
    },
    /// A tool call was attached to a message.
    ToolCallAdded {
        /// The carrying message.
        message_id: String,
        /// Call id.
        call_id: String,
        /// Tool name.
        tool_name: String,
        /// Call arguments.
        arguments: Value,
        /// When.
        added_at: Timestamp,
    },
    /// A tool result was attached to a message.
    ToolResultAdded {
        /// The carrying message.
        message_id: String,
        /// The answered call.
        call_id: String,
        /// Tool name.
        tool_name: String,
        /// Whether execution completed.
        success: bool,
        /// Result payload.
        result: Option<Value>,
        /// Failure description.
        error: Option<String>,
        /// Dispatch time.
        execution_time_ms: Option<u64>,
        /// When.
        added_at: Timestamp,
    },
    /// A widget now awaits a client response.
    ClientActionRequested {
        /// The pending action.
        action: ClientActionRecord,
        /// When.
        requested_at: Timestamp,
    },
    /// The client answered the pending widget.
    ClientResponseReceived {
        /// The answered widget.
        widget_id: String,
        /// Template item it belonged to.
        item_index: usize,
        /// The structured answer.
        value: Value,
        /// When.
        received_at: Timestamp,
    },
    /// Template progress advanced.
    TemplateAdvanced {
        /// The new item index.
        new_item_index: usize,
        /// When.
        advanced_at: Timestamp,
    },
    /// Messages were cleared.
    Cleared {
        /// Whether the system message survived.
        keep_system: bool,
        /// When.
        cleared_at: Timestamp,
    },
    /// The conversation reached its terminal state.
    Completed {
        /// Optional completion summary.
        summary: Option<String>,
        /// When.
        completed_at: Timestamp,
    },
    /// The conversation was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for Conversation {
    type Event = ConversationEvent;
    const AGGREGATE_TYPE: &'static str = "conversation";

    fn apply(&mut self, event: &ConversationEvent) {
        match event {
            ConversationEvent::Created {
                id,
                user_id,
                agent_definition_id,
                template_id,
                title,
                system_prompt,
                created_at,
            } => {
                self.id = id.clone();
                self.user_id = user_id.clone();
                self.agent_definition_id = agent_definition_id.clone();
                self.template_id = template_id.clone();
                self.title = title.clone();
                self.system_prompt = system_prompt.clone();
                self.status = ConversationStatus::Pending;
                self.created_at = Some(*created_at);
                self.updated_at = Some(*created_at);

                if let Some(prompt) = system_prompt {
                    // Deterministic id so replaying the stream rebuilds
                    // byte-identical state.
                    self.messages.push(Message {
                        id: format!("{id}:system"),
                        role: MessageRole::System,
                        content: prompt.clone(),
                        created_at: *created_at,
                        status: MessageStatus::Completed,
                        tool_calls: Vec::new(),
                        tool_results: Vec::new(),
                    });
                }
            }
            ConversationEvent::TitleUpdated { new_title, updated_at } => {
                self.title = Some(new_title.clone());
                self.updated_at = Some(*updated_at);
            }
            ConversationEvent::MessageAdded {
                message_id,
                role,
                content,
                status,
                created_at,
            } => {
                self.messages.push(Message {
                    id: message_id.clone(),
                    role: *role,
                    content: content.clone(),
                    created_at: *created_at,
                    status: *status,
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                });
                self.updated_at = Some(*created_at);

                if *role == MessageRole::User {
                    if self.status == ConversationStatus::Pending {
                        self.status = ConversationStatus::Active;
                    }
                    if self.title.is_none() {
                        self.title = Some(derive_title(content));
                    }
                }
            }
            ConversationEvent::MessageStatusChanged {
                message_id,
                new_status,
                changed_at,
            } => {
                if let Some(message) = self.messages.iter_mut().find(|message| &message.id == message_id) {
                    message.status = *new_status;
                }
                self.updated_at = Some(*changed_at);
            }
            ConversationEvent::ToolCallAdded {
                message_id,
                call_id,
                tool_name,
                arguments,
                added_at,
            } => {
                if let Some(message) = self.messages.iter_mut().find(|message| &message.id == message_id) {
                    message.tool_calls.push(ToolCallRecord {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: arguments.clone(),
                    });
                }
                self.updated_at = Some(*added_at);
            }
            ConversationEvent::ToolResultAdded {
                message_id,
                call_id,
                tool_name,
                success,
                result,
                error,
                execution_time_ms,
                added_at,
            } => {
                if let Some(message) = self.messages.iter_mut().find(|message| &message.id == message_id) {
                    message.tool_results.push(ToolResultRecord {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        success: *success,
                        result: result.clone(),
                        error: error.clone(),
                        execution_time_ms: *execution_time_ms,
                    });
                }
                self.updated_at = Some(*added_at);
            }
            ConversationEvent::ClientActionRequested { action, requested_at } => {
                self.pending_action = Some(action.clone());
                self.status = ConversationStatus::AwaitingResponse;
                self.updated_at = Some(*requested_at);
            }
            ConversationEvent::ClientResponseReceived {
                widget_id,
                item_index,
                value,
                received_at,
            } => {
                self.widget_responses.push(WidgetResponseRecord {
                    widget_id: widget_id.clone(),
                    item_index: *item_index,
                    value: value.clone(),
                });
                self.pending_action = None;
                self.status = ConversationStatus::Active;
                self.updated_at = Some(*received_at);
            }
            ConversationEvent::TemplateAdvanced {
                new_item_index,
                advanced_at,
            } => {
                self.current_item_index = *new_item_index;
                self.updated_at = Some(*advanced_at);
            }
            ConversationEvent::Cleared { keep_system, cleared_at } => {
                if *keep_system {
                    self.messages.retain(|message| message.role == MessageRole::System);
                } else {
                    self.messages.clear();
                }
                self.updated_at = Some(*cleared_at);
            }
            ConversationEvent::Completed { summary, completed_at } => {
                self.status = ConversationStatus::Completed;
                self.summary = summary.clone();
                self.pending_action = None;
                self.updated_at = Some(*completed_at);
            }
            ConversationEvent::Deleted { deleted_at } => {
                self.deleted = true;
                self.updated_at = Some(*deleted_at);
            }
        }
    }
}

impl Conversation {
    /// Creation command.
    pub fn create(
        id: &str,
        user_id: &str,
        agent_definition_id: Option<String>,
        template_id: Option<String>,
        system_prompt: Option<String>,
    ) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        if user_id.trim().is_empty() {
            return Err(OrchestratorError::validation("user_id", "owner cannot be empty"));
        }

        Ok(vec![ConversationEvent::Created {
            id: id.to_string(),
            user_id: user_id.to_string(),
            agent_definition_id,
            template_id,
            title: None,
            system_prompt,
            created_at: Timestamp::now(),
        }])
    }

    /// Appends a message, returning the event and the new message id.
    pub fn add_message(&self, role: MessageRole, content: &str, status: MessageStatus) -> (String, Vec<ConversationEvent>) {
        let message_id = Uuid::new_v4().to_string();
        let events = self.add_message_with_id(&message_id, role, content, status);
        (message_id, events)
    }

    /// Appends a message under a caller-chosen id, so streamed chunks and
    /// the persisted message share one id.
    pub fn add_message_with_id(
        &self,
        message_id: &str,
        role: MessageRole,
        content: &str,
        status: MessageStatus,
    ) -> Vec<ConversationEvent> {
        vec![ConversationEvent::MessageAdded {
            message_id: message_id.to_string(),
            role,
            content: content.to_string(),
            status,
            created_at: Timestamp::now(),
        }]
    }

    /// Changes a message's status. No event when unchanged or unknown.
    pub fn update_message_status(&self, message_id: &str, new_status: MessageStatus) -> Vec<ConversationEvent> {
        let Some(message) = self.messages.iter().find(|message| message.id == message_id) else {
            return Vec::new();
        };

        if message.status == new_status {
            return Vec::new();
        }

        vec![ConversationEvent::MessageStatusChanged {
            message_id: message_id.to_string(),
            new_status,
            changed_at: Timestamp::now(),
        }]
    }

    /// Attaches a tool call to an existing message.
    pub fn add_tool_call(
        &self,
        message_id: &str,
        call_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        if !self.messages.iter().any(|message| message.id == message_id) {
            return Err(OrchestratorError::validation("message_id", "message does not exist"));
        }

        Ok(vec![ConversationEvent::ToolCallAdded {
            message_id: message_id.to_string(),
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments,
            added_at: Timestamp::now(),
        }])
    }

    /// Attaches a tool result. The matching call must exist on the same or
    /// an earlier message.
    #[allow(clippy::too_many_arguments)]
    pub fn add_tool_result(
        &self,
        message_id: &str,
        call_id: &str,
        tool_name: &str,
        success: bool,
        result: Option<Value>,
        error: Option<String>,
        execution_time_ms: Option<u64>,
    ) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        let carrier_position = self
            .messages
            .iter()
            .position(|message| message.id == message_id)
            .ok_or_else(|| OrchestratorError::validation("message_id", "message does not exist"))?;

        let call_known = self.messages[..=carrier_position]
            .iter()
            .flat_map(|message| &message.tool_calls)
            .any(|call| call.call_id == call_id);

        if !call_known {
            return Err(OrchestratorError::validation(
                "call_id",
                format!("no tool call '{call_id}' precedes message '{message_id}'"),
            ));
        }

        Ok(vec![ConversationEvent::ToolResultAdded {
            message_id: message_id.to_string(),
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            success,
            result,
            error,
            execution_time_ms,
            added_at: Timestamp::now(),
        }])
    }

    /// Renames the conversation. No event when unchanged.
    pub fn rename(&self, new_title: &str) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        let new_title = new_title.trim();
        if new_title.is_empty() {
            return Err(OrchestratorError::validation("title", "title cannot be empty"));
        }
        if self.title.as_deref() == Some(new_title) {
            return Ok(Vec::new());
        }

        Ok(vec![ConversationEvent::TitleUpdated {
            new_title: new_title.to_string(),
            updated_at: Timestamp::now(),
        }])
    }

    /// Requests a client action. Illegal while another action is pending.
    pub fn request_client_action(&self, action: ClientActionRecord) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        if self.pending_action.is_some() {
            return Err(OrchestratorError::validation(
                "widget_id",
                "another client action is already pending",
            ));
        }

        Ok(vec![ConversationEvent::ClientActionRequested {
            action,
            requested_at: Timestamp::now(),
        }])
    }

    /// Records the client's answer to the pending widget.
    pub fn receive_client_response(
        &self,
        widget_id: &str,
        value: Value,
    ) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        let Some(pending) = &self.pending_action else {
            return Err(OrchestratorError::validation("widget_id", "no client action is pending"));
        };

        if pending.widget_id != widget_id {
            return Err(OrchestratorError::validation(
                "widget_id",
                format!("pending widget is '{}', got '{widget_id}'", pending.widget_id),
            ));
        }

        Ok(vec![ConversationEvent::ClientResponseReceived {
            widget_id: widget_id.to_string(),
            item_index: self.current_item_index,
            value,
            received_at: Timestamp::now(),
        }])
    }

    /// Advances template progress. `item_count` bounds the index.
    pub fn advance_template(
        &self,
        new_item_index: usize,
        item_count: usize,
    ) -> Result<Vec<ConversationEvent>, OrchestratorError> {
        if new_item_index > item_count {
            return Err(OrchestratorError::validation(
                "item_index",
                format!("index {new_item_index} exceeds template item count {item_count}"),
            ));
        }

        Ok(vec![ConversationEvent::TemplateAdvanced {
            new_item_index,
            advanced_at: Timestamp::now(),
        }])
    }

    /// Clears messages, keeping the system message by default.
    pub fn clear(&self, keep_system: bool) -> Vec<ConversationEvent> {
        vec![ConversationEvent::Cleared {
            keep_system,
            cleared_at: Timestamp::now(),
        }]
    }

    /// Completes the conversation. No event when already completed.
    pub fn complete(&self, summary: Option<String>) -> Vec<ConversationEvent> {
        if self.status == ConversationStatus::Completed {
            return Vec::new();
        }

        vec![ConversationEvent::Completed {
            summary,
            completed_at: Timestamp::now(),
        }]
    }

    /// Soft-deletes the conversation.
    pub fn delete(&self) -> Vec<ConversationEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![ConversationEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }

    /// Messages for the model context: every system message plus the most
    /// recent others within `max_messages`.
    pub fn context_messages(&self, max_messages: usize) -> Vec<&Message> {
        let system: Vec<&Message> = self
            .messages
            .iter()
            .filter(|message| message.role == MessageRole::System)
            .collect();

        let others: Vec<&Message> = self
            .messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .collect();

        let budget = max_messages.saturating_sub(system.len());
        let recent = &others[others.len().saturating_sub(budget)..];

        system.into_iter().chain(recent.iter().copied()).collect()
    }

    /// Widget answers recorded for one template item.
    pub fn responses_for_item(&self, item_index: usize) -> Vec<&WidgetResponseRecord> {
        self.widget_responses
            .iter()
            .filter(|response| response.item_index == item_index)
            .collect()
    }
}

fn derive_title(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() > TITLE_MAX_CHARS {
        let prefix: String = content.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{prefix}...")
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn conversation_with_prompt() -> Conversation {
        let mut conversation = Conversation::default();
        let events = Conversation::create(
            "c1",
            "user-1",
            Some("d1".into()),
            None,
            Some("You are helpful.".into()),
        )
        .unwrap();
        for event in &events {
            conversation.apply(event);
        }
        conversation
    }

    fn apply(conversation: &mut Conversation, events: &[ConversationEvent]) {
        for event in events {
            conversation.apply(event);
        }
    }

    #[test]
    fn creation_seeds_exactly_one_system_message_first() {
        let conversation = conversation_with_prompt();

        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, MessageRole::System);
        assert_eq!(conversation.status, ConversationStatus::Pending);
    }

    #[test]
    fn first_user_message_activates_and_titles() {
        let mut conversation = conversation_with_prompt();

        let (_, events) = conversation.add_message(MessageRole::User, "What is 2+2?", MessageStatus::Completed);
        apply(&mut conversation, &events);

        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.title.as_deref(), Some("What is 2+2?"));
    }

    #[test]
    fn long_first_messages_truncate_into_the_title() {
        let mut conversation = conversation_with_prompt();
        let long = "x".repeat(80);

        let (_, events) = conversation.add_message(MessageRole::User, &long, MessageStatus::Completed);
        apply(&mut conversation, &events);

        let title = conversation.title.unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn tool_results_require_a_preceding_call() {
        let mut conversation = conversation_with_prompt();

        let (assistant_id, events) = conversation.add_message(MessageRole::Assistant, "", MessageStatus::Completed);
        apply(&mut conversation, &events);

        // No call recorded yet: result is rejected.
        assert!(
            conversation
                .add_tool_result(&assistant_id, "k1", "get_weather", true, None, None, None)
                .is_err()
        );

        let events = conversation
            .add_tool_call(&assistant_id, "k1", "get_weather", json!({"city": "Paris"}))
            .unwrap();
        apply(&mut conversation, &events);

        // Result on a later message referencing the earlier call passes.
        let (tool_msg_id, events) = conversation.add_message(MessageRole::Tool, "", MessageStatus::Completed);
        apply(&mut conversation, &events);

        let events = conversation
            .add_tool_result(&tool_msg_id, "k1", "get_weather", true, Some(json!({"t": 15})), None, Some(40))
            .unwrap();
        apply(&mut conversation, &events);

        let carrier = conversation.messages.iter().find(|m| m.id == tool_msg_id).unwrap();
        assert_eq!(carrier.tool_results.len(), 1);
    }

    #[test]
    fn pending_action_gates_awaiting_response_status() {
        let mut conversation = conversation_with_prompt();

        let events = conversation
            .request_client_action(ClientActionRecord {
                widget_id: "w1".into(),
                widget_type: "multiple_choice".into(),
                props: json!({"options": ["3", "4", "5"]}),
            })
            .unwrap();
        apply(&mut conversation, &events);

        assert_eq!(conversation.status, ConversationStatus::AwaitingResponse);
        assert!(conversation.pending_action.is_some());

        // A second pending action violates the single-action invariant.
        assert!(
            conversation
                .request_client_action(ClientActionRecord {
                    widget_id: "w2".into(),
                    widget_type: "free_text".into(),
                    props: json!({}),
                })
                .is_err()
        );

        // Answering the wrong widget is rejected.
        assert!(conversation.receive_client_response("w2", json!("4")).is_err());

        let events = conversation.receive_client_response("w1", json!("4")).unwrap();
        apply(&mut conversation, &events);

        assert_eq!(conversation.status, ConversationStatus::Active);
        assert!(conversation.pending_action.is_none());
        assert_eq!(conversation.widget_responses.len(), 1);
    }

    #[test]
    fn advance_rejects_indices_past_the_item_count() {
        let conversation = conversation_with_prompt();

        assert!(conversation.advance_template(2, 2).is_ok());
        assert!(conversation.advance_template(3, 2).is_err());
    }

    #[test]
    fn context_messages_retain_system_and_recent() {
        let mut conversation = conversation_with_prompt();

        for i in 0..10 {
            let (_, events) =
                conversation.add_message(MessageRole::User, &format!("msg {i}"), MessageStatus::Completed);
            apply(&mut conversation, &events);
        }

        let context = conversation.context_messages(4);
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].role, MessageRole::System);
        assert_eq!(context[3].content, "msg 9");
        assert_eq!(context[1].content, "msg 7");
    }

    #[test]
    fn clear_keeps_system_messages_by_default() {
        let mut conversation = conversation_with_prompt();

        let (_, events) = conversation.add_message(MessageRole::User, "hello", MessageStatus::Completed);
        apply(&mut conversation, &events);

        let events = conversation.clear(true);
        apply(&mut conversation, &events);
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, MessageRole::System);

        let events = conversation.clear(false);
        apply(&mut conversation, &events);
        assert!(conversation.messages.is_empty());
    }

    #[test]
    fn replay_reconstructs_equal_state() {
        // Build a log by folding as we go, then replay it fresh.
        let mut log: Vec<ConversationEvent> =
            Conversation::create("c1", "user-1", Some("d1".into()), None, Some("You are helpful.".into())).unwrap();

        let mut original = Conversation::default();
        apply(&mut original, &log);

        let (_, events) = original.add_message(MessageRole::User, "hi", MessageStatus::Completed);
        apply(&mut original, &events);
        log.extend(events);

        let (message_id, events) = original.add_message(MessageRole::Assistant, "hello", MessageStatus::InProgress);
        apply(&mut original, &events);
        log.extend(events);

        let events = original.update_message_status(&message_id, MessageStatus::Completed);
        apply(&mut original, &events);
        log.extend(events);

        let mut replayed = Conversation::default();
        for event in &log {
            replayed.apply(event);
        }

        assert_eq!(replayed.messages.len(), original.messages.len());
        assert_eq!(replayed.status, original.status);
        assert_eq!(replayed.title, original.title);
        assert_eq!(
            replayed.messages.last().map(|message| message.status),
            Some(MessageStatus::Completed)
        );
    }
}
