//! The `ConversationTemplate` aggregate: a declarative proactive flow of
//! ordered items with renderable content and widgets.

use event_store::Aggregate;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::OrchestratorError;

/// The renderable unit kinds a template item can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    /// Plain assistant text.
    Message,
    /// Single-select question.
    MultipleChoice,
    /// Free-form text answer.
    FreeText,
    /// Code input with syntax highlighting.
    CodeEditor,
    /// Clickable button.
    Button,
    /// Static rich text.
    TextDisplay,
    /// Static image.
    ImageDisplay,
    /// Embedded video.
    Video,
    /// Rendered chart.
    Chart,
    /// Tabular data.
    DataTable,
    /// Embedded document.
    DocumentViewer,
    /// Free-floating note.
    StickyNote,
    /// Graph/topology diagram.
    GraphTopology,
}

impl WidgetType {
    /// Whether the widget collects a client response.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            WidgetType::MultipleChoice | WidgetType::FreeText | WidgetType::CodeEditor | WidgetType::Button
        )
    }

    /// Whether the widget renders as streamed assistant text rather than a
    /// client-side component.
    pub fn is_textual(&self) -> bool {
        matches!(self, WidgetType::Message)
    }
}

/// A single renderable unit within a template item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
    /// Content id; doubles as the widget id on the wire.
    pub id: String,
    /// Render order within the item.
    pub order: u32,
    /// What to render.
    pub widget_type: WidgetType,
    /// When true the stem is a generation prompt resolved by the model.
    #[serde(default)]
    pub is_templated: bool,
    /// Optional skill reference feeding templated generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Whether the item cannot advance until this widget is answered.
    #[serde(default)]
    pub required: bool,
    /// Whether the client may skip this widget.
    #[serde(default)]
    pub skippable: bool,
    /// Score weight for assessments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    /// Static text or generation prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stem: Option<String>,
    /// Choice options for selection widgets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Grading key. Never transmitted to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Grading explanation. Never transmitted to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Pre-filled widget value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<Value>,
}

impl ItemContent {
    /// The client-safe render descriptor. Grading material stays server
    /// side; only the scoring path reads it.
    pub fn client_props(&self) -> Value {
        json!({
            "stem": self.stem,
            "options": self.options,
            "required": self.required,
            "skippable": self.skippable,
            "initial_value": self.initial_value,
        })
    }
}

/// One step of the proactive flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateItem {
    /// Item id.
    pub id: String,
    /// Optional display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Renderable contents, presented in ascending `order`.
    #[serde(default)]
    pub contents: Vec<ItemContent>,
    /// Whether a confirmation button gates advancement.
    #[serde(default)]
    pub require_user_confirmation: bool,
    /// Whether free chat stays enabled while this item is active.
    #[serde(default)]
    pub enable_chat_input: bool,
    /// Optional per-item time limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_seconds: Option<u64>,
}

impl TemplateItem {
    /// Contents in render order.
    pub fn ordered_contents(&self) -> Vec<&ItemContent> {
        let mut contents: Vec<&ItemContent> = self.contents.iter().collect();
        contents.sort_by_key(|content| content.order);
        contents
    }

    /// The widget id of this item's confirmation button.
    pub fn confirmation_widget_id(&self) -> String {
        format!("{}:confirm", self.id)
    }
}

/// Aggregate state for a conversation template.
#[derive(Debug, Clone, Default)]
pub struct ConversationTemplate {
    /// Aggregate id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Purpose description.
    pub description: Option<String>,
    /// When true the agent opens the conversation.
    pub agent_starts_first: bool,
    /// Whether the user may jump between items.
    pub allow_navigation: bool,
    /// Whether chat input starts enabled.
    pub enable_chat_input_initially: bool,
    /// Whether a progress indicator is shown.
    pub display_progress_indicator: bool,
    /// Whether answers receive model feedback.
    pub include_feedback: bool,
    /// Whether a final score report is emitted on completion.
    pub display_final_score_report: bool,
    /// Whether free chat continues after the last item.
    pub continue_after_completion: bool,
    /// Passing threshold for assessments.
    pub passing_score_percent: Option<f64>,
    /// Message streamed before the first item.
    pub introduction_message: Option<String>,
    /// Message streamed after the last item.
    pub completion_message: Option<String>,
    /// Ordered items.
    pub items: Vec<TemplateItem>,
    /// Soft-deleted templates stay replayable but leave the read model.
    pub deleted: bool,
}

/// Flag and message settings carried by template events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// When true the agent opens the conversation.
    #[serde(default)]
    pub agent_starts_first: bool,
    /// Whether the user may jump between items.
    #[serde(default)]
    pub allow_navigation: bool,
    /// Whether chat input starts enabled.
    #[serde(default)]
    pub enable_chat_input_initially: bool,
    /// Whether a progress indicator is shown.
    #[serde(default)]
    pub display_progress_indicator: bool,
    /// Whether answers receive model feedback.
    #[serde(default)]
    pub include_feedback: bool,
    /// Whether a final score report is emitted on completion.
    #[serde(default)]
    pub display_final_score_report: bool,
    /// Whether free chat continues after the last item.
    #[serde(default)]
    pub continue_after_completion: bool,
    /// Passing threshold for assessments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_score_percent: Option<f64>,
    /// Message streamed before the first item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction_message: Option<String>,
    /// Message streamed after the last item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_message: Option<String>,
}

/// Events of the `ConversationTemplate` aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateEvent {
    /// The template was created.
    Created {
        /// Aggregate id.
        id: String,
        /// Display name.
        name: String,
        /// Purpose description.
        description: Option<String>,
        /// Flags and messages.
        settings: TemplateSettings,
        /// Ordered items.
        items: Vec<TemplateItem>,
        /// When.
        created_at: Timestamp,
    },
    /// Name, settings, or items were replaced.
    Updated {
        /// New display name, when changed.
        name: Option<String>,
        /// New description, when changed.
        description: Option<String>,
        /// Replacement flags and messages, when changed.
        settings: Option<TemplateSettings>,
        /// Replacement items, when changed.
        items: Option<Vec<TemplateItem>>,
        /// When.
        updated_at: Timestamp,
    },
    /// The template was soft-deleted.
    Deleted {
        /// When.
        deleted_at: Timestamp,
    },
}

impl Aggregate for ConversationTemplate {
    type Event = TemplateEvent;
    const AGGREGATE_TYPE: &'static str = "conversation_template";

    fn apply(&mut self, event: &TemplateEvent) {
        match event {
            TemplateEvent::Created {
                id,
                name,
                description,
                settings,
                items,
                ..
            } => {
                self.id = id.clone();
                self.name = name.clone();
                self.description = description.clone();
                self.items = items.clone();
                self.apply_settings(settings);
            }
            TemplateEvent::Updated {
                name,
                description,
                settings,
                items,
                ..
            } => {
                if let Some(name) = name {
                    self.name = name.clone();
                }
                if description.is_some() {
                    self.description = description.clone();
                }
                if let Some(settings) = settings {
                    self.apply_settings(settings);
                }
                if let Some(items) = items {
                    self.items = items.clone();
                }
            }
            TemplateEvent::Deleted { .. } => self.deleted = true,
        }
    }
}

impl ConversationTemplate {
    fn apply_settings(&mut self, settings: &TemplateSettings) {
        self.agent_starts_first = settings.agent_starts_first;
        self.allow_navigation = settings.allow_navigation;
        self.enable_chat_input_initially = settings.enable_chat_input_initially;
        self.display_progress_indicator = settings.display_progress_indicator;
        self.include_feedback = settings.include_feedback;
        self.display_final_score_report = settings.display_final_score_report;
        self.continue_after_completion = settings.continue_after_completion;
        self.passing_score_percent = settings.passing_score_percent;
        self.introduction_message = settings.introduction_message.clone();
        self.completion_message = settings.completion_message.clone();
    }

    /// Creation command.
    pub fn create(
        id: &str,
        name: &str,
        description: Option<String>,
        settings: TemplateSettings,
        items: Vec<TemplateItem>,
    ) -> Result<Vec<TemplateEvent>, OrchestratorError> {
        if id.trim().is_empty() {
            return Err(OrchestratorError::validation("id", "template id cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(OrchestratorError::validation("name", "template name cannot be empty"));
        }

        Ok(vec![TemplateEvent::Created {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            description,
            settings,
            items,
            created_at: Timestamp::now(),
        }])
    }

    /// Replaces parts of the template.
    pub fn update(
        &self,
        name: Option<String>,
        description: Option<String>,
        settings: Option<TemplateSettings>,
        items: Option<Vec<TemplateItem>>,
    ) -> Vec<TemplateEvent> {
        if name.is_none() && description.is_none() && settings.is_none() && items.is_none() {
            return Vec::new();
        }

        vec![TemplateEvent::Updated {
            name,
            description,
            settings,
            items,
            updated_at: Timestamp::now(),
        }]
    }

    /// Soft-deletes the template.
    pub fn delete(&self) -> Vec<TemplateEvent> {
        if self.deleted {
            return Vec::new();
        }
        vec![TemplateEvent::Deleted {
            deleted_at: Timestamp::now(),
        }]
    }

    /// Number of items in the flow.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// The item at an index.
    pub fn item(&self, index: usize) -> Option<&TemplateItem> {
        self.items.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_props_never_leak_grading_material() {
        let content = ItemContent {
            id: "w1".into(),
            order: 0,
            widget_type: WidgetType::MultipleChoice,
            is_templated: false,
            source_id: None,
            required: true,
            skippable: false,
            max_score: Some(1.0),
            stem: Some("2+2=?".into()),
            options: Some(vec!["3".into(), "4".into(), "5".into()]),
            correct_answer: Some("4".into()),
            explanation: Some("basic arithmetic".into()),
            initial_value: None,
        };

        let props = serde_json::to_string(&content.client_props()).unwrap();
        assert!(!props.contains("correct_answer"));
        assert!(!props.contains("explanation"));
        assert!(!props.contains("arithmetic"));
        assert!(props.contains("2+2=?"));
    }

    #[test]
    fn contents_render_in_declared_order() {
        let item = TemplateItem {
            id: "item-1".into(),
            title: None,
            contents: vec![
                ItemContent {
                    id: "b".into(),
                    order: 2,
                    widget_type: WidgetType::FreeText,
                    is_templated: false,
                    source_id: None,
                    required: true,
                    skippable: false,
                    max_score: None,
                    stem: None,
                    options: None,
                    correct_answer: None,
                    explanation: None,
                    initial_value: None,
                },
                ItemContent {
                    id: "a".into(),
                    order: 1,
                    widget_type: WidgetType::Message,
                    is_templated: false,
                    source_id: None,
                    required: false,
                    skippable: false,
                    max_score: None,
                    stem: Some("intro".into()),
                    options: None,
                    correct_answer: None,
                    explanation: None,
                    initial_value: None,
                },
            ],
            require_user_confirmation: true,
            enable_chat_input: false,
            time_limit_seconds: None,
        };

        let ordered: Vec<&str> = item.ordered_contents().iter().map(|content| content.id.as_str()).collect();
        assert_eq!(ordered, vec!["a", "b"]);
        assert_eq!(item.confirmation_widget_id(), "item-1:confirm");
    }

    #[test]
    fn interactive_widgets_are_the_answerable_ones() {
        assert!(WidgetType::MultipleChoice.is_interactive());
        assert!(WidgetType::Button.is_interactive());
        assert!(!WidgetType::TextDisplay.is_interactive());
        assert!(!WidgetType::Chart.is_interactive());
        assert!(WidgetType::Message.is_textual());
    }
}
