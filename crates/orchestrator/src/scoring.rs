//! Item scoring and feedback.
//!
//! Feedback is composed by the model against the item's grading key; the
//! key itself never reaches the client except through the model's own
//! prose. When the provider is unavailable, a string-equality fallback
//! grades and produces a terse feedback line.

use llm::{ChatMessage, ChatProvider, ChatRequest};
use serde_json::Value;

use crate::{ItemContent, TemplateItem, WidgetResponseRecord};

/// The grade for one answered widget.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetScore {
    /// The graded widget.
    pub widget_id: String,
    /// Points awarded.
    pub awarded: f64,
    /// Points possible.
    pub possible: f64,
}

/// The outcome of scoring one item.
#[derive(Debug, Clone, Default)]
pub struct ItemScore {
    /// Per-widget grades.
    pub widgets: Vec<WidgetScore>,
    /// Feedback text streamed to the client, when feedback is enabled.
    pub feedback: Option<String>,
}

impl ItemScore {
    /// Total points awarded.
    pub fn awarded(&self) -> f64 {
        self.widgets.iter().map(|score| score.awarded).sum()
    }

    /// Total points possible.
    pub fn possible(&self) -> f64 {
        self.widgets.iter().map(|score| score.possible).sum()
    }
}

/// Grades the recorded answers for one item.
///
/// With a provider, the model composes the feedback; without one (or on
/// provider failure) the fallback compares answers case-insensitively
/// against the grading key.
pub async fn score_item(
    provider: Option<(&dyn ChatProvider, &str)>,
    item: &TemplateItem,
    responses: &[&WidgetResponseRecord],
    include_feedback: bool,
) -> ItemScore {
    let mut score = grade_by_equality(item, responses);

    if !include_feedback {
        return score;
    }

    if let Some((provider, model)) = provider {
        match model_feedback(provider, model, item, responses).await {
            Ok(feedback) => {
                score.feedback = Some(feedback);
                return score;
            }
            Err(err) => {
                log::warn!("feedback generation failed, using fallback grading: {err}");
            }
        }
    }

    score.feedback = Some(fallback_feedback(&score));
    score
}

/// Case-insensitive trimmed equality against each widget's grading key.
fn grade_by_equality(item: &TemplateItem, responses: &[&WidgetResponseRecord]) -> ItemScore {
    let mut widgets = Vec::new();

    for content in &item.contents {
        if !content.widget_type.is_interactive() {
            continue;
        }

        let possible = content.max_score.unwrap_or(1.0);
        let Some(response) = responses.iter().find(|response| response.widget_id == content.id) else {
            continue;
        };

        let awarded = match (&content.correct_answer, answer_text(&response.value)) {
            (Some(expected), Some(actual)) => {
                if expected.trim().eq_ignore_ascii_case(actual.trim()) {
                    possible
                } else {
                    0.0
                }
            }
            // Without a grading key the answer counts as complete.
            _ => possible,
        };

        widgets.push(WidgetScore {
            widget_id: content.id.clone(),
            awarded,
            possible,
        });
    }

    ItemScore {
        widgets,
        feedback: None,
    }
}

async fn model_feedback(
    provider: &dyn ChatProvider,
    model: &str,
    item: &TemplateItem,
    responses: &[&WidgetResponseRecord],
) -> Result<String, llm::LlmError> {
    let mut prompt = String::from(
        "Grade the learner's answers and give short, encouraging feedback. \
         Do not reveal the expected answer verbatim unless the learner got it right.\n",
    );

    for content in &item.contents {
        if !content.widget_type.is_interactive() {
            continue;
        }

        let answer = responses
            .iter()
            .find(|response| response.widget_id == content.id)
            .and_then(|response| answer_text(&response.value))
            .unwrap_or("(no answer)");

        prompt.push_str(&format!(
            "\nQuestion: {}\nLearner answer: {answer}\n",
            content.stem.as_deref().unwrap_or("(untitled)")
        ));

        if let Some(expected) = &content.correct_answer {
            prompt.push_str(&format!("Expected answer: {expected}\n"));
        }
        if let Some(explanation) = &content.explanation {
            prompt.push_str(&format!("Grading notes: {explanation}\n"));
        }
    }

    let response = provider
        .chat(ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system("You are a precise, kind grader."),
                ChatMessage::user(prompt),
            ],
            tools: vec![],
            temperature: Some(0.2),
            max_tokens: None,
        })
        .await?;

    Ok(response.content)
}

fn fallback_feedback(score: &ItemScore) -> String {
    let correct = score.widgets.iter().filter(|widget| widget.awarded > 0.0).count();
    let total = score.widgets.len();

    if total == 0 {
        "Response recorded.".to_string()
    } else {
        format!("{correct} of {total} answers correct.")
    }
}

fn answer_text(value: &Value) -> Option<&str> {
    value.as_str()
}

#[cfg(test)]
mod tests {
    use llm::{MockProvider, MockTurn};
    use serde_json::json;

    use super::*;
    use crate::WidgetType;

    fn choice_item() -> TemplateItem {
        TemplateItem {
            id: "item-1".into(),
            title: Some("Item 1".into()),
            contents: vec![ItemContent {
                id: "w1".into(),
                order: 0,
                widget_type: WidgetType::MultipleChoice,
                is_templated: false,
                source_id: None,
                required: true,
                skippable: false,
                max_score: Some(2.0),
                stem: Some("2+2=?".into()),
                options: Some(vec!["3".into(), "4".into(), "5".into()]),
                correct_answer: Some("4".into()),
                explanation: None,
                initial_value: None,
            }],
            require_user_confirmation: false,
            enable_chat_input: false,
            time_limit_seconds: None,
        }
    }

    fn response(widget_id: &str, value: Value) -> WidgetResponseRecord {
        WidgetResponseRecord {
            widget_id: widget_id.into(),
            item_index: 0,
            value,
        }
    }

    #[tokio::test]
    async fn fallback_grades_case_insensitively() {
        let answer = response("w1", json!(" 4 "));
        let score = score_item(None, &choice_item(), &[&answer], true).await;

        assert_eq!(score.awarded(), 2.0);
        assert_eq!(score.possible(), 2.0);
        assert_eq!(score.feedback.as_deref(), Some("1 of 1 answers correct."));
    }

    #[tokio::test]
    async fn wrong_answers_score_zero() {
        let answer = response("w1", json!("5"));
        let score = score_item(None, &choice_item(), &[&answer], true).await;

        assert_eq!(score.awarded(), 0.0);
        assert_eq!(score.feedback.as_deref(), Some("0 of 1 answers correct."));
    }

    #[tokio::test]
    async fn model_feedback_is_used_when_available() {
        let provider = MockProvider::scripted(vec![MockTurn::text(&["Nice work, that's right!"])]);
        let answer = response("w1", json!("4"));

        let score = score_item(Some((&provider, "llama")), &choice_item(), &[&answer], true).await;
        assert_eq!(score.feedback.as_deref(), Some("Nice work, that's right!"));
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let provider = MockProvider::scripted(vec![MockTurn::failure("down")]);
        let answer = response("w1", json!("4"));

        let score = score_item(Some((&provider, "llama")), &choice_item(), &[&answer], true).await;
        assert_eq!(score.feedback.as_deref(), Some("1 of 1 answers correct."));
    }

    #[tokio::test]
    async fn ungraded_widgets_count_as_complete() {
        let mut item = choice_item();
        item.contents[0].correct_answer = None;

        let answer = response("w1", json!("anything"));
        let score = score_item(None, &item, &[&answer], false).await;

        assert_eq!(score.awarded(), 2.0);
        assert!(score.feedback.is_none());
    }
}
