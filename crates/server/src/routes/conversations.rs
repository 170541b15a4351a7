//! Conversation queries and management.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use context::Authentication;
use orchestrator::ConversationDto;
use serde::Deserialize;

use crate::{error::ApiError, routes::subject, state::AppState};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list))
        .route("/conversations/{id}", get(get_one))
        .route("/conversations/{id}", delete(remove))
        .route("/conversations/{id}/rename", put(rename))
        .route("/conversations/{id}/clear", post(clear))
}

async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
) -> Json<Vec<ConversationDto>> {
    Json(state.orchestrator.read_model().conversations_for_user(&subject(&auth)))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDto>, ApiError> {
    let user = subject(&auth);

    state
        .orchestrator
        .read_model()
        .conversation(&id)
        .filter(|conversation| conversation.user_id == user)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("conversation '{id}' not found")))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_conversation(&id, &subject(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .rename_conversation(&id, &subject(&auth), &request.title)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.clear_conversation(&id, &subject(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
