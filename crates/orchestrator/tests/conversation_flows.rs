//! End-to-end orchestrator flows over the in-memory store with a scripted
//! model provider: reactive turns, tool-call round trips, proactive
//! template flows, and loop bounds.

use std::sync::Arc;
use std::time::Duration;

use catalog::{
    AuthMode, CatalogCaches, CatalogReadModel, CatalogService, ClaimMatcher, ExecutionMode, ExecutionProfile,
    HttpMethod, InputSchema, MatchOperator, RegisterSource, SelectorField, SelectorKind, SourceKind, ToolDefinition,
    ToolSelector,
};
use config::{AgentConfig, CatalogConfig, ExecutorConfig};
use context::{CallerToken, Claims};
use event_store::{EventMetadata, EventStore, InMemoryBackend};
use executor::{PluginTransports, TokenExchanger, ToolExecutor};
use llm::{MockProvider, MockTurn, ProviderRegistry, ToolCall};
use orchestrator::{
    AgentAccessRules, ConversationReadModel, ItemContent, MessageRole, MessageStatus, Orchestrator, SessionHandle,
    TemplateItem, TemplateSettings, WidgetType, WireEvent, WireEventType,
};
use secrecy::SecretString;
use serde_json::json;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    catalog: CatalogService,
}

fn caller(subject: &str, roles: &[&str]) -> CallerToken {
    let claims = Claims {
        issuer: None,
        audience: None,
        subject: Some(subject.to_string()),
        additional: serde_json::from_value(json!({ "roles": roles })).unwrap(),
    };

    CallerToken::new(SecretString::from("caller-token"), jwt_compact::Claims::new(claims))
}

fn harness(provider: MockProvider, agent_config: AgentConfig) -> Harness {
    let store = Arc::new(EventStore::new(Arc::new(InMemoryBackend::new())));

    let catalog_read_model = Arc::new(CatalogReadModel::new(store.clone()));
    let caches = Arc::new(CatalogCaches::new(&CatalogConfig::default()));
    let catalog = CatalogService::new(store.clone(), catalog_read_model.clone(), caches);

    let executor_config = ExecutorConfig::default();
    let exchanger = TokenExchanger::new(
        reqwest::Client::new(),
        "http://127.0.0.1:9/token".parse().unwrap(),
        executor_config.token_cache_ttl,
    );
    let plugins = Arc::new(PluginTransports::new(executor_config.clone()));
    let executor = Arc::new(ToolExecutor::new(
        executor_config,
        catalog_read_model.clone(),
        catalog.resolver().clone(),
        exchanger,
        plugins,
    ));

    let providers = Arc::new(ProviderRegistry::empty(Some("mock/m".into())).with_provider("mock", Arc::new(provider)));

    let read_model = Arc::new(ConversationReadModel::new(store.clone()));
    let orchestrator = Orchestrator::new(
        agent_config,
        store,
        read_model,
        catalog_read_model,
        catalog.resolver().clone(),
        executor,
        providers,
        None,
    );

    Harness { orchestrator, catalog }
}

async fn seed_weather_tool(catalog: &CatalogService) {
    catalog
        .register_source(
            RegisterSource {
                id: "weather".into(),
                name: "Weather API".into(),
                kind: SourceKind::Openapi,
                // Nothing listens here; dispatch fails fast and the loop
                // must still feed the failure back to the model.
                base_url: Some("http://127.0.0.1:9".parse().unwrap()),
                spec_url: None,
                auth_mode: AuthMode::None,
                default_audience: None,
                required_scopes: vec![],
                plugin: None,
            },
            EventMetadata::default(),
        )
        .await
        .unwrap();

    catalog
        .refresh_source(
            "weather",
            Some(vec![ToolDefinition {
                name: "get_weather".into(),
                description: "Current weather for a city".into(),
                input_schema: InputSchema::default(),
                execution: ExecutionProfile {
                    mode: ExecutionMode::Http {
                        method: HttpMethod::Get,
                        path: "/weather".into(),
                    },
                    required_audience: None,
                    timeout_seconds: Some(1),
                    response_pointer: None,
                },
                tags: vec![],
            }]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    catalog
        .create_group(
            "all",
            "All tools",
            "",
            vec![ToolSelector::new(SelectorField::Name, SelectorKind::Wildcard, "*")],
            EventMetadata::default(),
        )
        .await
        .unwrap();

    catalog
        .define_policy(
            "users",
            "Users",
            None,
            vec![ClaimMatcher::new("roles", MatchOperator::Contains, json!("user"))],
            vec!["all".into()],
            0,
            EventMetadata::default(),
        )
        .await
        .unwrap();
}

async fn next_event(handle: &mut SessionHandle) -> WireEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn collect_types(handle: &mut SessionHandle, until: WireEventType) -> Vec<WireEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(handle).await;
        let done = event.r#type == until;
        events.push(event);
        if done {
            return events;
        }
    }
}

async fn submit_with_retry(orchestrator: &Arc<Orchestrator>, request_id: &str, widget_id: &str, value: serde_json::Value) {
    for _ in 0..100 {
        match orchestrator.submit_widget_response(request_id, widget_id, value.clone()).await {
            Ok(()) => return,
            Err(orchestrator::OrchestratorError::InvalidState { .. }) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => panic!("unexpected submit error: {err}"),
        }
    }
    panic!("session never suspended on widget '{widget_id}'");
}

#[tokio::test]
async fn reactive_happy_path_streams_and_persists() {
    let provider = MockProvider::scripted(vec![MockTurn::text(&["The ", "answer ", "is 4."])]);
    let harness = harness(provider, AgentConfig::default());

    harness
        .orchestrator
        .create_definition(
            "d1",
            "Helper",
            Some("You are helpful.".into()),
            Some("mock/m".into()),
            vec![],
            None,
            AgentAccessRules {
                is_public: true,
                ..Default::default()
            },
            "admin",
        )
        .await
        .unwrap();

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, Some("d1".into()), None)
        .await
        .unwrap();

    let started = next_event(&mut handle).await;
    assert_eq!(started.r#type, WireEventType::StreamStarted);
    assert_eq!(started.sequence, 0);

    harness
        .orchestrator
        .send_user_message(&handle.request_id, "What is 2+2?")
        .await
        .unwrap();

    let events = collect_types(&mut handle, WireEventType::ContentComplete).await;

    let deltas: Vec<String> = events
        .iter()
        .filter(|event| event.r#type == WireEventType::ContentChunk)
        .map(|event| event.payload["delta"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(deltas, vec!["The ", "answer ", "is 4."]);

    let complete = events.last().unwrap();
    assert_eq!(complete.payload["full"], "The answer is 4.");

    // Sequence numbers strictly increase in emission order.
    let sequences: Vec<u64> = events.iter().map(|event| event.sequence).collect();
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));

    // Persisted: system, user, assistant (completed).
    let conversation = harness
        .orchestrator
        .read_model()
        .conversation(&handle.conversation_id)
        .unwrap();
    let roles: Vec<MessageRole> = conversation.messages.iter().map(|message| message.role).collect();
    assert_eq!(roles, vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]);
    assert_eq!(conversation.messages[2].status, MessageStatus::Completed);
    assert_eq!(conversation.messages[2].content, "The answer is 4.");
    assert_eq!(conversation.title.as_deref(), Some("What is 2+2?"));
}

#[tokio::test]
async fn tool_call_round_trip_feeds_result_back() {
    let provider = MockProvider::scripted(vec![
        MockTurn::tool_calls(
            &[],
            vec![ToolCall {
                id: "k1".into(),
                name: "weather__get_weather".into(),
                arguments: json!({"city": "Paris"}),
            }],
        ),
        MockTurn::text(&["Could not reach the weather service."]),
    ]);
    let harness = harness(provider, AgentConfig::default());
    seed_weather_tool(&harness.catalog).await;

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, None, None)
        .await
        .unwrap();
    let _ = next_event(&mut handle).await; // stream_started

    harness
        .orchestrator
        .send_user_message(&handle.request_id, "Weather in Paris?")
        .await
        .unwrap();

    let events = collect_types(&mut handle, WireEventType::ContentComplete).await;

    let started_position = events
        .iter()
        .position(|event| event.r#type == WireEventType::ToolCallStarted)
        .expect("tool_call_started missing");
    let completed_position = events
        .iter()
        .position(|event| event.r#type == WireEventType::ToolCallCompleted)
        .expect("tool_call_completed missing");

    assert!(started_position < completed_position);
    assert_eq!(events[started_position].payload["call_id"], "k1");
    assert_eq!(events[started_position].payload["name"], "weather__get_weather");
    assert_eq!(events[completed_position].payload["call_id"], "k1");

    // The second model turn saw the tool result in its context.
    let conversation = harness
        .orchestrator
        .read_model()
        .conversation(&handle.conversation_id)
        .unwrap();

    let assistant_with_calls = conversation
        .messages
        .iter()
        .find(|message| !message.tool_calls.is_empty())
        .expect("assistant message with tool calls");
    assert_eq!(assistant_with_calls.tool_calls[0].call_id, "k1");

    let tool_message = conversation
        .messages
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool result message");
    assert_eq!(tool_message.tool_results[0].call_id, "k1");

    assert_eq!(conversation.messages.last().unwrap().content, "Could not reach the weather service.");
}

fn quiz_template_items() -> Vec<TemplateItem> {
    vec![
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
                max_score: Some(1.0),
                stem: Some("2+2=?".into()),
                options: Some(vec!["3".into(), "4".into(), "5".into()]),
                correct_answer: Some("4".into()),
                explanation: None,
                initial_value: None,
            }],
            require_user_confirmation: false,
            enable_chat_input: false,
            time_limit_seconds: None,
        },
        TemplateItem {
            id: "item-2".into(),
            title: Some("Item 2".into()),
            contents: vec![ItemContent {
                id: "w2".into(),
                order: 0,
                widget_type: WidgetType::FreeText,
                is_templated: false,
                source_id: None,
                required: true,
                skippable: false,
                max_score: Some(1.0),
                stem: Some("Explain".into()),
                options: None,
                correct_answer: None,
                explanation: None,
                initial_value: None,
            }],
            require_user_confirmation: false,
            enable_chat_input: false,
            time_limit_seconds: None,
        },
    ]
}

#[tokio::test]
async fn proactive_template_flow_presents_scores_and_completes() {
    // Two feedback turns, one per scored item.
    let provider = MockProvider::scripted(vec![
        MockTurn::text(&["Correct, well done."]),
        MockTurn::text(&["Thanks for the explanation."]),
    ]);
    let harness = harness(provider, AgentConfig::default());

    harness
        .orchestrator
        .create_template(
            "quiz",
            "Math quiz",
            None,
            TemplateSettings {
                agent_starts_first: true,
                include_feedback: true,
                introduction_message: Some("Welcome to the quiz.".into()),
                ..Default::default()
            },
            quiz_template_items(),
            "admin",
        )
        .await
        .unwrap();

    harness
        .orchestrator
        .create_definition(
            "tutor",
            "Tutor",
            Some("You are a tutor.".into()),
            Some("mock/m".into()),
            vec![],
            Some("quiz".into()),
            AgentAccessRules {
                is_public: true,
                ..Default::default()
            },
            "admin",
        )
        .await
        .unwrap();

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, Some("tutor".into()), None)
        .await
        .unwrap();

    let started = next_event(&mut handle).await;
    assert_eq!(started.r#type, WireEventType::StreamStarted);

    // Everything up to the first widget.
    let opening = collect_types(&mut handle, WireEventType::WidgetRender).await;

    assert!(opening.iter().any(|event| event.r#type == WireEventType::FlowStarted));

    let item_context = opening
        .iter()
        .find(|event| event.r#type == WireEventType::ItemContext)
        .expect("item_context missing");
    assert_eq!(item_context.payload["index"], 0);
    assert_eq!(item_context.payload["total"], 2);
    assert_eq!(item_context.payload["title"], "Item 1");

    let intro = opening
        .iter()
        .find(|event| event.r#type == WireEventType::ContentChunk)
        .expect("introduction missing");
    assert_eq!(intro.payload["delta"], "Welcome to the quiz.");

    let widget = opening.last().unwrap();
    assert_eq!(widget.payload["widget_id"], "w1");
    assert_eq!(widget.payload["widget_type"], "multiple_choice");
    assert_eq!(widget.payload["props"]["options"], json!(["3", "4", "5"]));
    // The grading key never crosses the wire.
    assert!(widget.payload["props"].get("correct_answer").is_none());

    submit_with_retry(&harness.orchestrator, &handle.request_id, "w1", json!("4")).await;

    // The item's chat-input toggle may still sit in the queue ahead of the
    // ack; assert relative order instead of absolute positions.
    let after_first = collect_types(&mut handle, WireEventType::WidgetRender).await;

    let ack_position = after_first
        .iter()
        .position(|event| event.r#type == WireEventType::WidgetResponseAck)
        .expect("widget_response_ack missing");
    assert_eq!(after_first[ack_position].payload["widget_id"], "w1");

    let feedback_position = after_first
        .iter()
        .position(|event| {
            event.r#type == WireEventType::ContentChunk && event.payload["delta"] == "Correct, well done."
        })
        .expect("feedback missing");

    let second_context_position = after_first
        .iter()
        .position(|event| event.r#type == WireEventType::ItemContext)
        .expect("second item_context missing");
    assert_eq!(after_first[second_context_position].payload["index"], 1);

    assert!(ack_position < feedback_position);
    assert!(feedback_position < second_context_position);

    let second_widget = after_first.last().unwrap();
    assert_eq!(second_widget.payload["widget_id"], "w2");
    assert_eq!(second_widget.payload["widget_type"], "free_text");

    submit_with_retry(&harness.orchestrator, &handle.request_id, "w2", json!("two plus two")).await;

    let closing = collect_types(&mut handle, WireEventType::FlowCompleted).await;
    let closing_ack = closing
        .iter()
        .find(|event| event.r#type == WireEventType::WidgetResponseAck)
        .expect("closing widget_response_ack missing");
    assert_eq!(closing_ack.payload["widget_id"], "w2");

    // The conversation completed and recorded both answers.
    let conversation = harness
        .orchestrator
        .read_model()
        .conversation(&handle.conversation_id)
        .unwrap();
    assert_eq!(conversation.current_item_index, 2);
    assert_eq!(conversation.status, orchestrator::ConversationStatus::Completed);
}

#[tokio::test]
async fn empty_proactive_template_completes_immediately() {
    let harness = harness(MockProvider::default(), AgentConfig::default());

    harness
        .orchestrator
        .create_template(
            "empty",
            "Empty",
            None,
            TemplateSettings {
                agent_starts_first: true,
                ..Default::default()
            },
            vec![],
            "admin",
        )
        .await
        .unwrap();

    harness
        .orchestrator
        .create_definition(
            "hollow",
            "Hollow",
            None,
            Some("mock/m".into()),
            vec![],
            Some("empty".into()),
            AgentAccessRules {
                is_public: true,
                ..Default::default()
            },
            "admin",
        )
        .await
        .unwrap();

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, Some("hollow".into()), None)
        .await
        .unwrap();

    let _ = next_event(&mut handle).await; // stream_started
    let completed = next_event(&mut handle).await;
    assert_eq!(completed.r#type, WireEventType::FlowCompleted);

    // The session is terminal: no further messages are accepted.
    let mut rejected = false;
    for _ in 0..100 {
        match harness.orchestrator.send_user_message(&handle.request_id, "hello").await {
            Err(orchestrator::OrchestratorError::InvalidState { .. }) => {
                rejected = true;
                break;
            }
            Ok(()) => panic!("message accepted on a completed session"),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert!(rejected);
}

#[tokio::test]
async fn max_iterations_finalizes_with_a_notice() {
    // The model asks for the same tool forever.
    let looping_call = || {
        MockTurn::tool_calls(
            &[],
            vec![ToolCall {
                id: "k".into(),
                name: "weather__get_weather".into(),
                arguments: json!({}),
            }],
        )
    };
    let provider = MockProvider::scripted(vec![looping_call(), looping_call(), looping_call()]);

    let agent_config = AgentConfig {
        max_iterations: 2,
        ..Default::default()
    };
    let harness = harness(provider, agent_config);
    seed_weather_tool(&harness.catalog).await;

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, None, None)
        .await
        .unwrap();
    let _ = next_event(&mut handle).await;

    harness
        .orchestrator
        .send_user_message(&handle.request_id, "loop forever")
        .await
        .unwrap();

    let events = collect_types(&mut handle, WireEventType::ContentComplete).await;

    let notice = events
        .iter()
        .find(|event| event.r#type == WireEventType::Notice)
        .expect("max_iterations notice missing");
    assert_eq!(notice.payload["kind"], "max_iterations_reached");
    assert_eq!(notice.payload["iterations"], 2);

    // Exactly two iterations of tool calls ran.
    let tool_starts = events
        .iter()
        .filter(|event| event.r#type == WireEventType::ToolCallStarted)
        .count();
    assert_eq!(tool_starts, 2);

    // The turn finalized: a follow-up message is accepted again.
    let mut accepted = false;
    for _ in 0..100 {
        match harness.orchestrator.send_user_message(&handle.request_id, "ok").await {
            Ok(()) => {
                accepted = true;
                break;
            }
            Err(orchestrator::OrchestratorError::InvalidState { .. }) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert!(accepted);
}

#[tokio::test]
async fn widget_response_outside_suspended_is_invalid_state() {
    let harness = harness(MockProvider::default(), AgentConfig::default());

    let handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, None, None)
        .await
        .unwrap();

    let result = harness
        .orchestrator
        .submit_widget_response(&handle.request_id, "w1", json!("4"))
        .await;

    assert!(matches!(result, Err(orchestrator::OrchestratorError::InvalidState { .. })));
}

#[tokio::test]
async fn cancelled_turn_emits_terminal_cancelled_event() {
    let provider = MockProvider::scripted(vec![MockTurn::text(&["never ", "delivered"])]);
    let harness = harness(provider, AgentConfig::default());

    let mut handle = harness
        .orchestrator
        .open_session(caller("user-1", &["user"]), None, None, None)
        .await
        .unwrap();
    let _ = next_event(&mut handle).await;

    // Cancel before the turn starts: the loop observes the flag at its
    // first suspension point and emits the terminal event.
    harness.orchestrator.cancel(&handle.request_id).unwrap();

    harness
        .orchestrator
        .send_user_message(&handle.request_id, "talk a lot")
        .await
        .unwrap();

    let event = next_event(&mut handle).await;
    assert_eq!(event.r#type, WireEventType::Cancelled);
    assert_eq!(event.payload["request_id"], handle.request_id);
}
