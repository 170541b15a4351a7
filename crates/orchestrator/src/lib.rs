//! The conversation orchestrator: a per-connection state machine that
//! multiplexes streaming LLM output, tool execution, and template-driven
//! widget flows over one client channel.

mod conversation;
mod definition;
mod error;
mod events;
mod read_model;
mod runtime;
mod scoring;
mod session;
mod template;

pub use conversation::{
    ClientActionRecord, Conversation, ConversationEvent, ConversationStatus, Message, MessageRole, MessageStatus,
    ToolCallRecord, ToolResultRecord, WidgetResponseRecord,
};
pub use definition::{AgentAccessRules, AgentDefinition, AgentDefinitionEvent};
pub use error::OrchestratorError;
pub use events::{WireEvent, WireEventType};
pub use read_model::{AgentDefinitionDto, ConversationDto, ConversationReadModel, MessageDto, TemplateDto};
pub use runtime::{Orchestrator, SessionHandle, TurnQuota};
pub use session::SessionPhase;
pub use template::{ConversationTemplate, ItemContent, TemplateEvent, TemplateItem, TemplateSettings, WidgetType};
