//! The chat streaming channel and its control endpoints.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Sse,
        sse::Event,
    },
    routing::post,
};
use context::Authentication;
use futures::Stream;
use orchestrator::{Orchestrator, WireEvent};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::ApiError,
    rate_limit::StreamPermit,
    routes::{caller, subject},
    state::AppState,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/chat/send", post(send))
        .route("/chat/cancel/{request_id}", post(cancel))
        .route("/chat/respond/{request_id}", post(respond))
}

#[derive(Deserialize)]
struct SendRequest {
    /// The user message. Optional: opening a proactive definition streams
    /// the template flow without one.
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    agent_definition_id: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
}

async fn send(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<SendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = subject(&auth);

    let Some(permit) = state.limits.acquire_stream(&user) else {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "concurrent stream quota exceeded",
        ));
    };

    let handle = state
        .orchestrator
        .open_session(
            caller(&auth),
            request.conversation_id,
            request.agent_definition_id,
            request.model_id,
        )
        .await?;

    if let Some(message) = request.message.as_deref() {
        state.orchestrator.send_user_message(&handle.request_id, message).await?;
    }

    log::debug!("opened chat stream {} for {user}", handle.request_id);

    let stream = EventStream {
        events: handle.events,
        orchestrator: state.orchestrator.clone(),
        request_id: handle.request_id,
        _permit: permit,
    };

    Ok(Sse::new(stream).into_response())
}

async fn cancel(
    State(state): State<AppState>,
    Extension(_auth): Extension<Authentication>,
    Path(request_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.cancel(&request_id)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct WidgetResponse {
    widget_id: String,
    value: Value,
}

async fn respond(
    State(state): State<AppState>,
    Extension(_auth): Extension<Authentication>,
    Path(request_id): Path<String>,
    Json(response): Json<WidgetResponse>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .submit_widget_response(&request_id, &response.widget_id, response.value)
        .await?;

    Ok(StatusCode::ACCEPTED)
}

/// The outbound SSE stream: serializes wire events in emission order and
/// releases the session (and its stream permit) when the client goes away.
struct EventStream {
    events: tokio::sync::mpsc::Receiver<WireEvent>,
    orchestrator: Arc<Orchestrator>,
    request_id: String,
    _permit: StreamPermit,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let payload = serde_json::to_string(&event).unwrap_or_else(|err| {
                    log::error!("failed to serialize wire event: {err}");
                    r#"{"type":"error","payload":{"kind":"internal_error"}}"#.to_string()
                });

                Poll::Ready(Some(Ok(Event::default().data(payload))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.orchestrator.close_session(&self.request_id);
    }
}
