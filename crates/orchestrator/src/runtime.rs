//! The orchestrator runtime: session lifecycle, the reactive reason/act
//! loop, and proactive template flows.

use std::collections::HashMap;
use std::sync::Arc;

use catalog::{AccessResolver, CatalogReadModel, ToolId};
use config::AgentConfig;
use context::CallerToken;
use dashmap::DashMap;
use event_store::{Aggregate, EventMetadata, EventStore, StoreError, Versioned};
use executor::{ExecuteOptions, ToolExecutor};
use futures::StreamExt;
use llm::{ChatMessage, ChatRequest, ProviderRegistry, ToolSpec};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    AgentDefinition, ClientActionRecord, Conversation, ConversationTemplate, ItemContent, Message, MessageRole,
    MessageStatus, OrchestratorError, SessionPhase, TemplateItem, WireEvent,
    scoring,
    session::{ItemExecution, Session},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-user quota consulted between reason/act iterations. A breach lets
/// the in-flight iteration complete but starts no new one.
pub trait TurnQuota: Send + Sync {
    /// Whether the user may start another model iteration.
    fn check(&self, user_id: &str) -> bool;
}

/// A freshly opened session: the ids the client needs and the event
/// receiver the transport drains onto the wire.
pub struct SessionHandle {
    /// Stream request id, accepted by `cancel`.
    pub request_id: String,
    /// The conversation the session drives.
    pub conversation_id: String,
    /// The outbound event queue. Events arrive in emission order.
    pub events: mpsc::Receiver<WireEvent>,
}

/// The conversation runtime.
pub struct Orchestrator {
    config: AgentConfig,
    store: Arc<EventStore>,
    read_model: Arc<crate::ConversationReadModel>,
    catalog: Arc<CatalogReadModel>,
    resolver: AccessResolver,
    executor: Arc<ToolExecutor>,
    providers: Arc<ProviderRegistry>,
    quota: Option<Arc<dyn TurnQuota>>,
    sessions: DashMap<String, Arc<Session>>,
}

impl Orchestrator {
    /// Creates the runtime over its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        store: Arc<EventStore>,
        read_model: Arc<crate::ConversationReadModel>,
        catalog: Arc<CatalogReadModel>,
        resolver: AccessResolver,
        executor: Arc<ToolExecutor>,
        providers: Arc<ProviderRegistry>,
        quota: Option<Arc<dyn TurnQuota>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            read_model,
            catalog,
            resolver,
            executor,
            providers,
            quota,
            sessions: DashMap::new(),
        })
    }

    /// The conversation-side read model.
    pub fn read_model(&self) -> &Arc<crate::ConversationReadModel> {
        &self.read_model
    }

    /// The event store, for definition/template administration.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    // --- session lifecycle ------------------------------------------------

    /// Opens a streaming session: loads or creates the conversation,
    /// resolves the caller's tools, and (for proactive templates) starts
    /// the flow.
    pub async fn open_session(
        self: &Arc<Self>,
        caller: CallerToken,
        conversation_id: Option<String>,
        agent_definition_id: Option<String>,
        model_override: Option<String>,
    ) -> Result<SessionHandle, OrchestratorError> {
        let claims = caller.claims().clone();
        let user_id = claims
            .subject
            .clone()
            .ok_or_else(|| OrchestratorError::validation("token", "caller token has no subject"))?;

        let definition = match &agent_definition_id {
            Some(id) => {
                let hydrated = self
                    .store
                    .try_load::<AgentDefinition>(id)
                    .await?
                    .filter(|hydrated| !hydrated.state.deleted)
                    .ok_or_else(|| OrchestratorError::not_found("agent definition", id))?;

                if !hydrated.state.allows(&claims) {
                    return Err(OrchestratorError::Forbidden(id.clone()));
                }

                Some(hydrated.state)
            }
            None => None,
        };

        let template = match definition.as_ref().and_then(|definition| definition.template_id.clone()) {
            Some(template_id) => Some(
                self.store
                    .try_load::<ConversationTemplate>(&template_id)
                    .await?
                    .filter(|hydrated| !hydrated.state.deleted)
                    .ok_or_else(|| OrchestratorError::not_found("conversation template", &template_id))?
                    .state,
            ),
            None => None,
        };

        let conversation = match &conversation_id {
            Some(id) => {
                let hydrated = self
                    .store
                    .try_load::<Conversation>(id)
                    .await?
                    .filter(|hydrated| !hydrated.state.deleted)
                    .ok_or_else(|| OrchestratorError::not_found("conversation", id))?;

                if hydrated.state.user_id != user_id {
                    // Do not leak other users' conversation ids.
                    return Err(OrchestratorError::not_found("conversation", id));
                }

                hydrated
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let events = Conversation::create(
                    &id,
                    &user_id,
                    definition.as_ref().map(|definition| definition.id.clone()),
                    template.as_ref().map(|template| template.id.clone()),
                    definition.as_ref().and_then(|definition| definition.system_prompt.clone()),
                )?;

                let _guard = self.store.lock_aggregate::<Conversation>(&id).await;
                let version = self
                    .store
                    .commit::<Conversation>(&id, 0, &events, EventMetadata::for_user(&user_id))
                    .await?;
                self.read_model
                    .refresh_aggregate(Conversation::AGGREGATE_TYPE, &id, version)
                    .await;

                let mut hydrated = Versioned::<Conversation>::empty();
                hydrated.apply_all(&events);
                hydrated
            }
        };

        let (tools, tool_ids) = self.resolve_session_tools(&claims, definition.as_ref());

        let model_id = model_override.or_else(|| definition.as_ref().and_then(|definition| definition.model_id.clone()));

        let request_id = Uuid::new_v4().to_string();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let session = Arc::new(Session::new(
            request_id.clone(),
            conversation.state.id.clone(),
            caller,
            definition.as_ref().map(|definition| definition.id.clone()),
            tools,
            tool_ids,
            model_id,
            events_tx,
        ));

        self.sessions.insert(request_id.clone(), session.clone());
        session
            .emit(WireEvent::stream_started(&session.conversation_id, &request_id))
            .await;

        match template {
            Some(template) if template.agent_starts_first => {
                let orchestrator = self.clone();
                let flow_session = session.clone();

                tokio::spawn(async move {
                    orchestrator.run_proactive(flow_session, template).await;
                });
            }
            _ => {
                session.transition(SessionPhase::Ready)?;
            }
        }

        Ok(SessionHandle {
            request_id,
            conversation_id: session.conversation_id.clone(),
            events: events_rx,
        })
    }

    /// Accepts a user message and runs the reactive loop on a background
    /// task; events stream through the session channel.
    pub async fn send_user_message(self: &Arc<Self>, request_id: &str, text: &str) -> Result<(), OrchestratorError> {
        let session = self.session(request_id)?;

        if text.trim().is_empty() {
            return Err(OrchestratorError::validation("message", "message cannot be empty"));
        }

        session.transition(SessionPhase::Processing).map_err(|_| {
            OrchestratorError::InvalidState {
                action: "send a message",
                phase: session.phase(),
            }
        })?;

        let user_id = self.session_user(&session);
        let persisted = self
            .mutate_conversation(&session.conversation_id, &user_id, |conversation| {
                let (_, events) = conversation.add_message(MessageRole::User, text, MessageStatus::Completed);
                Ok(events)
            })
            .await;

        if let Err(err) = persisted {
            // The turn never started; hand the session back.
            let _ = session.transition(SessionPhase::Ready);
            return Err(err);
        }

        let orchestrator = self.clone();
        let turn_session = session.clone();

        tokio::spawn(async move {
            orchestrator.run_reactive_turn(turn_session).await;
        });

        Ok(())
    }

    /// Accepts a widget response for the pending widget. Rejected unless
    /// the session is `SUSPENDED` and the widget matches.
    pub async fn submit_widget_response(
        self: &Arc<Self>,
        request_id: &str,
        widget_id: &str,
        value: Value,
    ) -> Result<(), OrchestratorError> {
        let session = self.session(request_id)?;

        if session.phase() != SessionPhase::Suspended {
            return Err(OrchestratorError::InvalidState {
                action: "submit a widget response",
                phase: session.phase(),
            });
        }

        let user_id = self.session_user(&session);
        let conversation = self
            .mutate_conversation(&session.conversation_id, &user_id, |conversation| {
                conversation.receive_client_response(widget_id, value.clone())
            })
            .await?;

        session
            .emit(WireEvent::widget_response_ack(&session.conversation_id, widget_id))
            .await;

        let Some(template_id) = conversation.state.template_id.clone() else {
            return Ok(());
        };
        let template = self
            .store
            .try_load::<ConversationTemplate>(&template_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("conversation template", &template_id))?
            .state;

        let item_index = conversation.state.current_item_index;
        let Some(item) = template.item(item_index).cloned() else {
            return Ok(());
        };

        let satisfied = session
            .with_item(|execution| {
                if widget_id == item.confirmation_widget_id() {
                    execution.confirmed = true;
                } else {
                    execution.answered_widgets.insert(widget_id.to_string());
                }
                execution.is_satisfied()
            })
            .unwrap_or(true);

        if !satisfied {
            // More widgets to answer: surface the next one as the pending
            // client action.
            if let Some(next) = self.next_pending_widget(&session, &item) {
                self.persist_pending_widget(&session, &user_id, &next).await?;
            }
            return Ok(());
        }

        session.clear_item();

        match self.finish_item(&session, &template, &item, item_index).await? {
            Some(next_index) => {
                session.transition(SessionPhase::Presenting)?;
                self.present_from(&session, &template, next_index).await
            }
            None => Ok(()),
        }
    }

    /// Marks the in-flight turn cancelled. The streaming loop observes the
    /// flag at its next suspension point.
    pub fn cancel(&self, request_id: &str) -> Result<(), OrchestratorError> {
        let session = self.session(request_id)?;
        session.cancel();
        Ok(())
    }

    /// Releases the session's in-memory state, cancelling any active turn.
    pub fn close_session(&self, request_id: &str) {
        if let Some((_, session)) = self.sessions.remove(request_id) {
            session.cancel();
        }
    }

    fn session(&self, request_id: &str) -> Result<Arc<Session>, OrchestratorError> {
        self.sessions
            .get(request_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| OrchestratorError::not_found("session", request_id))
    }

    fn session_user(&self, session: &Session) -> String {
        session.caller.subject().unwrap_or_default().to_string()
    }

    // --- reactive loop ----------------------------------------------------

    async fn run_reactive_turn(self: Arc<Self>, session: Arc<Session>) {
        let outcome = tokio::time::timeout(self.config.turn_timeout, self.reactive_iterations(&session)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(OrchestratorError::Cancelled)) => {
                session
                    .emit(WireEvent::cancelled(&session.conversation_id, &session.request_id))
                    .await;
                let _ = session.transition(SessionPhase::Ready);
            }
            Ok(Err(err)) => {
                session
                    .emit(WireEvent::error(
                        &session.conversation_id,
                        err.kind(),
                        &err.to_string(),
                        err.is_retryable(),
                    ))
                    .await;

                // A concurrency conflict reflects a racing writer, not a
                // broken session; the aggregate is unchanged and the caller
                // may retry.
                if err.is_retryable() {
                    let _ = session.transition(SessionPhase::Ready);
                } else {
                    let _ = session.transition(SessionPhase::Error);
                }
            }
            Err(_) => {
                let err = OrchestratorError::TurnTimeout(self.config.turn_timeout);
                session
                    .emit(WireEvent::error(&session.conversation_id, err.kind(), &err.to_string(), true))
                    .await;
                let _ = session.transition(SessionPhase::Error);
            }
        }
    }

    async fn reactive_iterations(&self, session: &Arc<Session>) -> Result<(), OrchestratorError> {
        let user_id = self.session_user(session);
        let (provider, model) = self.providers.resolve(session.model_id.as_deref())?;

        let mut last_message_id = String::new();
        let mut last_content = String::new();

        for iteration in 1..=self.config.max_iterations {
            if session.cancellation().is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            // The request-level quota covered the first iteration; further
            // iterations each consume their own slot. On breach the turn
            // finalizes without starting a new model call.
            if iteration > 1
                && let Some(quota) = &self.quota
                && !quota.check(&user_id)
            {
                session
                    .emit(WireEvent::error(
                        &session.conversation_id,
                        "rate_limited",
                        "request quota exceeded mid-turn",
                        true,
                    ))
                    .await;
                let _ = session.transition(SessionPhase::Ready);
                return Ok(());
            }

            let conversation = self.store.load::<Conversation>(&session.conversation_id).await?;
            let context = self.build_context(&conversation.state);

            log::debug!(
                "session {}: iteration {iteration}/{} with {} context message(s)",
                session.request_id,
                self.config.max_iterations,
                context.len()
            );

            let mut stream = provider
                .chat_stream(ChatRequest {
                    model: model.clone(),
                    messages: context,
                    tools: session.tools.clone(),
                    temperature: None,
                    max_tokens: None,
                })
                .await?;

            let message_id = Uuid::new_v4().to_string();
            let mut content = String::new();
            let mut tool_calls = Vec::new();

            while let Some(chunk) = stream.next().await {
                if session.cancellation().is_cancelled() {
                    self.persist_assistant(session, &user_id, &message_id, &content, MessageStatus::Failed)
                        .await?;
                    return Err(OrchestratorError::Cancelled);
                }

                let chunk = chunk?;

                if let Some(delta) = &chunk.delta {
                    content.push_str(delta);
                    session
                        .emit(
                            WireEvent::content_chunk(&session.conversation_id, &message_id, delta)
                                .with_iteration(iteration),
                        )
                        .await;
                }

                if chunk.done {
                    tool_calls = chunk.tool_calls;
                    break;
                }
            }

            last_message_id = message_id.clone();
            last_content = content.clone();

            if tool_calls.is_empty() {
                self.persist_assistant(session, &user_id, &message_id, &content, MessageStatus::Completed)
                    .await?;
                session
                    .emit(WireEvent::content_complete(&session.conversation_id, &message_id, &content))
                    .await;
                let _ = session.transition(SessionPhase::Ready);
                return Ok(());
            }

            if tool_calls.len() > self.config.max_tool_calls_per_iteration {
                log::warn!(
                    "session {}: model requested {} tool calls, capping at {}",
                    session.request_id,
                    tool_calls.len(),
                    self.config.max_tool_calls_per_iteration
                );
                tool_calls.truncate(self.config.max_tool_calls_per_iteration);
            }

            self.persist_assistant_with_calls(session, &user_id, &message_id, &content, &tool_calls)
                .await?;

            for call in &tool_calls {
                if session.cancellation().is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }

                session
                    .emit(
                        WireEvent::tool_call_started(&session.conversation_id, &call.id, &call.name, &call.arguments)
                            .with_iteration(iteration),
                    )
                    .await;

                let (success, result, error, execution_time_ms) = self.dispatch_tool(session, call).await;

                session
                    .emit(
                        WireEvent::tool_call_completed(
                            &session.conversation_id,
                            &call.id,
                            success,
                            &result,
                            error.as_deref(),
                        )
                        .with_iteration(iteration),
                    )
                    .await;

                self.persist_tool_result(session, &user_id, call, success, &result, error.clone(), execution_time_ms)
                    .await?;

                if !success && self.config.stop_on_error {
                    session
                        .emit(WireEvent::error(
                            &session.conversation_id,
                            "upstream_error",
                            error.as_deref().unwrap_or("tool execution failed"),
                            false,
                        ))
                        .await;
                    let _ = session.transition(SessionPhase::Error);
                    return Ok(());
                }
            }
        }

        // Iteration cap reached: finalize with what the model produced.
        session
            .emit(WireEvent::max_iterations_reached(
                &session.conversation_id,
                self.config.max_iterations,
            ))
            .await;
        session
            .emit(WireEvent::content_complete(
                &session.conversation_id,
                &last_message_id,
                &last_content,
            ))
            .await;
        let _ = session.transition(SessionPhase::Ready);

        Ok(())
    }

    /// Routes one model tool call through the execution pipeline, shaping
    /// every failure into a result the next iteration can read.
    async fn dispatch_tool(&self, session: &Arc<Session>, call: &llm::ToolCall) -> (bool, Value, Option<String>, Option<u64>) {
        let Some(tool_id) = session.tool_ids.get(&call.name) else {
            return (
                false,
                Value::Null,
                Some(format!("unknown tool '{}'", call.name)),
                None,
            );
        };

        match self
            .executor
            .execute(tool_id, &call.arguments, &session.caller, ExecuteOptions::default())
            .await
        {
            Ok(outcome) => {
                let success = outcome.is_success();
                (
                    success,
                    outcome.result.unwrap_or(Value::Null),
                    outcome.error,
                    Some(outcome.execution_time_ms),
                )
            }
            Err(err) => (false, Value::Null, Some(err.to_string()), None),
        }
    }

    fn build_context(&self, conversation: &Conversation) -> Vec<ChatMessage> {
        conversation
            .context_messages(self.config.max_context_messages)
            .into_iter()
            .map(message_to_chat)
            .collect()
    }

    // --- proactive flow ---------------------------------------------------

    async fn run_proactive(self: Arc<Self>, session: Arc<Session>, template: ConversationTemplate) {
        if let Err(err) = self.proactive_flow(&session, &template).await {
            log::error!("session {}: proactive flow failed: {err}", session.request_id);
            session
                .emit(WireEvent::error(
                    &session.conversation_id,
                    err.kind(),
                    &err.to_string(),
                    err.is_retryable(),
                ))
                .await;
            let _ = session.transition(SessionPhase::Error);
        }
    }

    async fn proactive_flow(
        &self,
        session: &Arc<Session>,
        template: &ConversationTemplate,
    ) -> Result<(), OrchestratorError> {
        let user_id = self.session_user(session);

        // An empty template has nothing to present.
        if template.item_count() == 0 {
            session.transition(SessionPhase::Completed)?;
            session
                .emit(WireEvent::flow_completed(&session.conversation_id, None))
                .await;
            return Ok(());
        }

        let conversation = self.store.load::<Conversation>(&session.conversation_id).await?;
        let current_index = conversation.state.current_item_index;

        if current_index >= template.item_count() {
            // Reopened after the flow already finished.
            return self.complete_flow(session, template, &user_id).await;
        }

        session.transition(SessionPhase::Presenting)?;
        session
            .emit(WireEvent::flow_started(&session.conversation_id, &template.id))
            .await;
        session
            .emit(WireEvent::chat_input_enabled(
                &session.conversation_id,
                template.enable_chat_input_initially,
            ))
            .await;

        // The introduction runs once; a mid-flow reload goes straight back
        // to the in-progress item.
        if current_index == 0 && conversation.state.widget_responses.is_empty()
            && let Some(intro) = template.introduction_message.clone()
        {
            self.stream_virtual_message(session, &user_id, &intro).await?;
        }

        self.present_from(session, template, current_index).await
    }

    /// Presents items starting at `index`, chaining through display-only
    /// items that need no response, until a widget suspends the flow or the
    /// template runs out.
    async fn present_from(
        &self,
        session: &Arc<Session>,
        template: &ConversationTemplate,
        mut index: usize,
    ) -> Result<(), OrchestratorError> {
        loop {
            let waiting = self.present_item(session, template, index).await?;
            if waiting {
                return Ok(());
            }

            let item = template
                .item(index)
                .ok_or_else(|| OrchestratorError::Internal(format!("template has no item {index}")))?
                .clone();
            session.clear_item();

            match self.finish_item(session, template, &item, index).await? {
                Some(next_index) => index = next_index,
                None => return Ok(()),
            }
        }
    }

    /// Presents one item. Returns `true` when the flow suspended on a
    /// widget, `false` when the item needs no response.
    async fn present_item(
        &self,
        session: &Arc<Session>,
        template: &ConversationTemplate,
        index: usize,
    ) -> Result<bool, OrchestratorError> {
        let user_id = self.session_user(session);
        let item = template
            .item(index)
            .ok_or_else(|| OrchestratorError::Internal(format!("template has no item {index}")))?
            .clone();

        session
            .emit(WireEvent::item_context(
                &session.conversation_id,
                index,
                template.item_count(),
                item.title.as_deref(),
            ))
            .await;

        let conversation = self.store.load::<Conversation>(&session.conversation_id).await?;
        let answered: std::collections::BTreeSet<String> = conversation
            .state
            .responses_for_item(index)
            .into_iter()
            .map(|response| response.widget_id.clone())
            .collect();

        let mut execution = ItemExecution {
            confirmation_required: item.require_user_confirmation,
            confirmed: answered.contains(&item.confirmation_widget_id()),
            answered_widgets: answered,
            started_at: Some(jiff::Timestamp::now()),
            ..Default::default()
        };

        for content in item.ordered_contents() {
            if session.cancellation().is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            if content.widget_type.is_textual() {
                self.render_text_content(session, &user_id, content).await?;
                continue;
            }

            session
                .emit(WireEvent::widget_render(
                    &session.conversation_id,
                    &content.id,
                    &widget_type_name(content),
                    content.client_props(),
                ))
                .await;

            if content.required && content.widget_type.is_interactive() {
                execution.required_widgets.insert(content.id.clone());
            }
        }

        if item.require_user_confirmation {
            session
                .emit(WireEvent::widget_render(
                    &session.conversation_id,
                    &item.confirmation_widget_id(),
                    "button",
                    json!({ "label": "Continue", "role": "confirmation" }),
                ))
                .await;
        }

        session
            .emit(WireEvent::chat_input_enabled(
                &session.conversation_id,
                item.enable_chat_input,
            ))
            .await;

        let satisfied = execution.is_satisfied();
        session.begin_item(execution);

        if satisfied {
            // Display-only item: nothing to wait for.
            session.clear_item();
            return Ok(false);
        }

        if let Some(widget) = self.next_pending_widget(session, &item) {
            self.persist_pending_widget(session, &user_id, &widget).await?;
        }

        session.transition(SessionPhase::Suspended)?;
        Ok(true)
    }

    /// Scores the finished item and advances the template cursor. Returns
    /// the next item index, or `None` once the flow completed.
    async fn finish_item(
        &self,
        session: &Arc<Session>,
        template: &ConversationTemplate,
        item: &TemplateItem,
        index: usize,
    ) -> Result<Option<usize>, OrchestratorError> {
        let user_id = self.session_user(session);

        let has_answerable = item
            .contents
            .iter()
            .any(|content| content.widget_type.is_interactive());

        if has_answerable {
            let conversation = self.store.load::<Conversation>(&session.conversation_id).await?;
            let responses = conversation.state.responses_for_item(index);

            let provider = self.providers.resolve(session.model_id.as_deref()).ok();
            let score = scoring::score_item(
                provider
                    .as_ref()
                    .map(|(provider, model)| (provider.as_ref(), model.as_str())),
                item,
                &responses,
                template.include_feedback,
            )
            .await;

            session.record_score(index, score.awarded(), score.possible());

            if let Some(feedback) = &score.feedback {
                self.stream_virtual_message(session, &user_id, feedback).await?;
            }
        }

        let next_index = index + 1;
        self.mutate_conversation(&session.conversation_id, &user_id, |conversation| {
            conversation.advance_template(next_index, template.item_count())
        })
        .await?;

        if next_index < template.item_count() {
            return Ok(Some(next_index));
        }

        self.complete_flow(session, template, &user_id).await?;
        Ok(None)
    }

    async fn complete_flow(
        &self,
        session: &Arc<Session>,
        template: &ConversationTemplate,
        user_id: &str,
    ) -> Result<(), OrchestratorError> {
        if let Some(completion) = template.completion_message.clone() {
            self.stream_virtual_message(session, user_id, &completion).await?;
        }

        // The report is emitted whenever configured, also when free chat
        // continues afterwards.
        let score_report = template.display_final_score_report.then(|| {
            let scores = session.scores();
            let awarded: f64 = scores.iter().map(|(_, awarded, _)| awarded).sum();
            let possible: f64 = scores.iter().map(|(_, _, possible)| possible).sum();
            let percent = if possible > 0.0 { awarded / possible * 100.0 } else { 100.0 };

            json!({
                "items": scores
                    .iter()
                    .map(|(index, awarded, possible)| json!({
                        "index": index,
                        "awarded": awarded,
                        "possible": possible,
                    }))
                    .collect::<Vec<_>>(),
                "total_awarded": awarded,
                "total_possible": possible,
                "percent": percent,
                "passed": template.passing_score_percent.map(|threshold| percent >= threshold),
            })
        });

        session
            .emit(WireEvent::flow_completed(&session.conversation_id, score_report))
            .await;

        if template.continue_after_completion {
            session
                .emit(WireEvent::chat_input_enabled(&session.conversation_id, true))
                .await;
            session.transition(SessionPhase::Ready)?;
        } else {
            self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
                Ok(conversation.complete(None))
            })
            .await?;
            session.transition(SessionPhase::Completed)?;
        }

        Ok(())
    }

    async fn render_text_content(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        content: &ItemContent,
    ) -> Result<(), OrchestratorError> {
        let stem = content.stem.clone().unwrap_or_default();
        if stem.is_empty() {
            return Ok(());
        }

        if !content.is_templated {
            return self.stream_virtual_message(session, user_id, &stem).await;
        }

        // Templated stem: the stem is a generation prompt.
        let (provider, model) = self.providers.resolve(session.model_id.as_deref())?;
        let message_id = Uuid::new_v4().to_string();
        let mut generated = String::new();

        let mut stream = provider
            .chat_stream(ChatRequest {
                model,
                messages: vec![ChatMessage::user(stem)],
                tools: vec![],
                temperature: None,
                max_tokens: None,
            })
            .await?;

        while let Some(chunk) = stream.next().await {
            if session.cancellation().is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let chunk = chunk?;
            if let Some(delta) = &chunk.delta {
                generated.push_str(delta);
                session
                    .emit(WireEvent::content_chunk(&session.conversation_id, &message_id, delta))
                    .await;
            }
            if chunk.done {
                break;
            }
        }

        self.persist_assistant(session, user_id, &message_id, &generated, MessageStatus::Completed)
            .await?;
        session
            .emit(WireEvent::content_complete(&session.conversation_id, &message_id, &generated))
            .await;

        Ok(())
    }

    /// Streams pre-resolved text as an assistant message: persisted, then
    /// emitted as one chunk plus a completion marker.
    async fn stream_virtual_message(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        text: &str,
    ) -> Result<(), OrchestratorError> {
        let message_id = Uuid::new_v4().to_string();

        self.persist_assistant(session, user_id, &message_id, text, MessageStatus::Completed)
            .await?;

        session
            .emit(WireEvent::content_chunk(&session.conversation_id, &message_id, text))
            .await;
        session
            .emit(WireEvent::content_complete(&session.conversation_id, &message_id, text))
            .await;

        Ok(())
    }

    fn next_pending_widget(&self, session: &Arc<Session>, item: &TemplateItem) -> Option<PendingWidget> {
        session
            .with_item(|execution| {
                for content in item.ordered_contents() {
                    if content.required
                        && content.widget_type.is_interactive()
                        && !execution.answered_widgets.contains(&content.id)
                    {
                        return Some(PendingWidget {
                            widget_id: content.id.clone(),
                            widget_type: widget_type_name(content),
                            props: content.client_props(),
                        });
                    }
                }

                if execution.confirmation_required && !execution.confirmed {
                    return Some(PendingWidget {
                        widget_id: item.confirmation_widget_id(),
                        widget_type: "button".to_string(),
                        props: json!({ "label": "Continue", "role": "confirmation" }),
                    });
                }

                None
            })
            .flatten()
    }

    async fn persist_pending_widget(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        widget: &PendingWidget,
    ) -> Result<(), OrchestratorError> {
        self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
            conversation.request_client_action(ClientActionRecord {
                widget_id: widget.widget_id.clone(),
                widget_type: widget.widget_type.clone(),
                props: widget.props.clone(),
            })
        })
        .await?;

        Ok(())
    }

    // --- persistence helpers ----------------------------------------------

    async fn persist_assistant(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        message_id: &str,
        content: &str,
        status: MessageStatus,
    ) -> Result<(), OrchestratorError> {
        self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
            Ok(conversation.add_message_with_id(message_id, MessageRole::Assistant, content, status))
        })
        .await?;
        Ok(())
    }

    async fn persist_assistant_with_calls(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        message_id: &str,
        content: &str,
        tool_calls: &[llm::ToolCall],
    ) -> Result<(), OrchestratorError> {
        self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
            Ok(conversation.add_message_with_id(message_id, MessageRole::Assistant, content, MessageStatus::Completed))
        })
        .await?;

        for call in tool_calls {
            self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
                conversation.add_tool_call(message_id, &call.id, &call.name, call.arguments.clone())
            })
            .await?;
        }

        Ok(())
    }

    async fn persist_tool_result(
        &self,
        session: &Arc<Session>,
        user_id: &str,
        call: &llm::ToolCall,
        success: bool,
        result: &Value,
        error: Option<String>,
        execution_time_ms: Option<u64>,
    ) -> Result<(), OrchestratorError> {
        let content = if success {
            result.to_string()
        } else {
            error.clone().unwrap_or_else(|| "tool execution failed".to_string())
        };

        let message_id = Uuid::new_v4().to_string();

        self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
            Ok(conversation.add_message_with_id(&message_id, MessageRole::Tool, &content, MessageStatus::Completed))
        })
        .await?;

        self.mutate_conversation(&session.conversation_id, user_id, |conversation| {
            conversation.add_tool_result(
                &message_id,
                &call.id,
                &call.name,
                success,
                Some(result.clone()),
                error,
                execution_time_ms,
            )
        })
        .await?;

        Ok(())
    }

    /// Load → execute → commit one conversation mutation under the
    /// in-process aggregate lock, returning the post-commit state.
    async fn mutate_conversation<F>(
        &self,
        conversation_id: &str,
        user_id: &str,
        command: F,
    ) -> Result<Versioned<Conversation>, OrchestratorError>
    where
        F: FnOnce(&Conversation) -> Result<Vec<crate::ConversationEvent>, OrchestratorError>,
    {
        let _guard = self.store.lock_aggregate::<Conversation>(conversation_id).await;

        let mut hydrated = self
            .store
            .load::<Conversation>(conversation_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => OrchestratorError::not_found("conversation", conversation_id),
                other => OrchestratorError::Store(other),
            })?;

        let events = command(&hydrated.state)?;
        let version = self
            .store
            .commit::<Conversation>(conversation_id, hydrated.version, &events, EventMetadata::for_user(user_id))
            .await?;

        hydrated.apply_all(&events);
        debug_assert_eq!(hydrated.version, version);

        self.read_model
            .refresh_aggregate(Conversation::AGGREGATE_TYPE, conversation_id, version)
            .await;

        Ok(hydrated)
    }

    // --- tool resolution --------------------------------------------------

    /// Resolves the caller's accessible tools, filtered by the definition's
    /// allow-list, into the model-facing tool list plus the wire-name map.
    fn resolve_session_tools(
        &self,
        claims: &context::Claims,
        definition: Option<&AgentDefinition>,
    ) -> (Vec<ToolSpec>, HashMap<String, ToolId>) {
        let accessible = self.resolver.resolve_accessible_tools(claims);

        let mut specs = Vec::new();
        let mut tool_ids = HashMap::new();

        for tool_id in accessible {
            if let Some(definition) = definition
                && !definition.permits_tool(&tool_id)
            {
                continue;
            }

            let Some(tool) = self.catalog.tool(&tool_id) else { continue };

            let wire_name = wire_tool_name(&tool_id);
            specs.push(ToolSpec {
                name: wire_name.clone(),
                description: tool.description.clone(),
                parameters: input_schema_json(&tool.definition.input_schema),
            });
            tool_ids.insert(wire_name, tool_id);
        }

        (specs, tool_ids)
    }
}

impl Orchestrator {
    // --- administration ---------------------------------------------------

    async fn admin_mutate<A, F>(&self, id: &str, user_id: &str, command: F) -> Result<(), OrchestratorError>
    where
        A: Aggregate,
        F: FnOnce(&A) -> Result<Vec<A::Event>, OrchestratorError>,
    {
        let _guard = self.store.lock_aggregate::<A>(id).await;

        let hydrated = self.store.load::<A>(id).await.map_err(|err| match err {
            StoreError::NotFound { .. } => OrchestratorError::not_found(A::AGGREGATE_TYPE, id),
            other => OrchestratorError::Store(other),
        })?;

        let events = command(&hydrated.state)?;
        let version = self
            .store
            .commit::<A>(id, hydrated.version, &events, EventMetadata::for_user(user_id))
            .await?;

        self.read_model.refresh_aggregate(A::AGGREGATE_TYPE, id, version).await;
        Ok(())
    }

    async fn admin_create<A, F>(&self, id: &str, user_id: &str, command: F) -> Result<(), OrchestratorError>
    where
        A: Aggregate,
        F: FnOnce() -> Result<Vec<A::Event>, OrchestratorError>,
    {
        let _guard = self.store.lock_aggregate::<A>(id).await;

        if self.store.try_load::<A>(id).await?.is_some() {
            return Err(OrchestratorError::validation(
                "id",
                format!("{} '{id}' already exists", A::AGGREGATE_TYPE),
            ));
        }

        let events = command()?;
        let version = self.store.commit::<A>(id, 0, &events, EventMetadata::for_user(user_id)).await?;

        self.read_model.refresh_aggregate(A::AGGREGATE_TYPE, id, version).await;
        Ok(())
    }

    /// Creates an agent definition.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_definition(
        &self,
        id: &str,
        name: &str,
        system_prompt: Option<String>,
        model_id: Option<String>,
        allowed_tools: Vec<ToolId>,
        template_id: Option<String>,
        access: crate::AgentAccessRules,
        user_id: &str,
    ) -> Result<(), OrchestratorError> {
        if let Some(template_id) = &template_id
            && self.read_model.template(template_id).is_none()
        {
            // Dangling template references are reported, not rejected; the
            // template may arrive later.
            log::warn!("definition '{id}' references unknown template '{template_id}'");
        }

        self.admin_create::<AgentDefinition, _>(id, user_id, || {
            AgentDefinition::create(
                id,
                name,
                system_prompt,
                model_id,
                allowed_tools,
                template_id,
                Some(user_id.to_string()),
                access,
            )
        })
        .await
    }

    /// Soft-deletes an agent definition.
    pub async fn delete_definition(&self, id: &str, user_id: &str) -> Result<(), OrchestratorError> {
        self.admin_mutate::<AgentDefinition, _>(id, user_id, |definition| Ok(definition.delete()))
            .await
    }

    /// Creates a conversation template.
    pub async fn create_template(
        &self,
        id: &str,
        name: &str,
        description: Option<String>,
        settings: crate::TemplateSettings,
        items: Vec<TemplateItem>,
        user_id: &str,
    ) -> Result<(), OrchestratorError> {
        self.admin_create::<ConversationTemplate, _>(id, user_id, || {
            ConversationTemplate::create(id, name, description, settings, items)
        })
        .await
    }

    /// Soft-deletes a conversation template. Definitions referencing it
    /// keep their binding; opening them reports the dangling reference.
    pub async fn delete_template(&self, id: &str, user_id: &str) -> Result<(), OrchestratorError> {
        self.admin_mutate::<ConversationTemplate, _>(id, user_id, |template| Ok(template.delete()))
            .await
    }

    /// Renames a conversation after an ownership check.
    pub async fn rename_conversation(&self, id: &str, user_id: &str, title: &str) -> Result<(), OrchestratorError> {
        self.admin_mutate::<Conversation, _>(id, user_id, |conversation| {
            if conversation.user_id != user_id {
                return Err(OrchestratorError::not_found("conversation", id));
            }
            conversation.rename(title)
        })
        .await
    }

    /// Clears a conversation's messages, keeping the system prompt.
    pub async fn clear_conversation(&self, id: &str, user_id: &str) -> Result<(), OrchestratorError> {
        self.admin_mutate::<Conversation, _>(id, user_id, |conversation| {
            if conversation.user_id != user_id {
                return Err(OrchestratorError::not_found("conversation", id));
            }
            Ok(conversation.clear(true))
        })
        .await
    }

    /// Soft-deletes a conversation: a terminal event is appended and the
    /// record leaves the read model; the stream is retained for audit.
    pub async fn delete_conversation(&self, id: &str, user_id: &str) -> Result<(), OrchestratorError> {
        self.admin_mutate::<Conversation, _>(id, user_id, |conversation| {
            if conversation.user_id != user_id {
                return Err(OrchestratorError::not_found("conversation", id));
            }
            Ok(conversation.delete())
        })
        .await
    }
}

struct PendingWidget {
    widget_id: String,
    widget_type: String,
    props: Value,
}

fn message_to_chat(message: &Message) -> ChatMessage {
    match message.role {
        MessageRole::System => ChatMessage::system(&message.content),
        MessageRole::User => ChatMessage::user(&message.content),
        MessageRole::Assistant => ChatMessage::assistant(
            &message.content,
            message
                .tool_calls
                .iter()
                .map(|call| llm::ToolCall {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .collect(),
        ),
        MessageRole::Tool => {
            let call_id = message
                .tool_results
                .first()
                .map(|result| result.call_id.clone())
                .unwrap_or_default();
            ChatMessage::tool_result(call_id, &message.content)
        }
    }
}

/// Model-facing tool name. Providers reject ':' in function names, so the
/// composite id flattens to `{source}__{operation}` with the catalog id
/// kept in the session's reverse map.
fn wire_tool_name(tool_id: &ToolId) -> String {
    let flattened = format!("{}__{}", tool_id.source_id(), tool_id.operation_id());
    flattened
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn input_schema_json(schema: &catalog::InputSchema) -> Value {
    let properties: serde_json::Map<String, Value> = schema
        .properties
        .iter()
        .map(|(name, property)| {
            let mut spec = serde_json::Map::new();
            if let Some(r#type) = &property.r#type {
                spec.insert("type".to_string(), json!(r#type));
            }
            if let Some(description) = &property.description {
                spec.insert("description".to_string(), json!(description));
            }
            if let Some(r#enum) = &property.r#enum {
                spec.insert("enum".to_string(), json!(r#enum));
            }
            (name.clone(), Value::Object(spec))
        })
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": schema.required,
    })
}

fn widget_type_name(content: &ItemContent) -> String {
    serde_json::to_value(content.widget_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "message".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_flatten_composite_ids() {
        assert_eq!(wire_tool_name(&ToolId::new("weather", "get_forecast")), "weather__get_forecast");
        assert_eq!(wire_tool_name(&ToolId::new("svc", "ns:op")), "svc__ns_op");
    }

    #[test]
    fn input_schema_serializes_to_openai_shape() {
        use catalog::{InputSchema, PropertySchema};
        use indexmap::IndexMap;

        let mut properties = IndexMap::new();
        properties.insert(
            "city".to_string(),
            PropertySchema {
                r#type: Some("string".into()),
                description: Some("city name".into()),
                ..Default::default()
            },
        );

        let schema = InputSchema {
            properties,
            required: vec!["city".to_string()],
        };

        let value = input_schema_json(&schema);
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["city"]["type"], "string");
        assert_eq!(value["required"][0], "city");
    }
}
