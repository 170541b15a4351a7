//! Tool catalog queries and administration.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use catalog::SourceToolDto;
use context::Authentication;
use serde::Deserialize;

use crate::{
    error::ApiError,
    routes::{metadata, parse_tool_id},
    state::AppState,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/tools", get(list))
        .route("/tools/search", get(search))
        .route("/tools/{id}", get(get_one))
        .route("/tools/{id}", delete(remove))
        .route("/tools/{id}/enable", post(enable))
        .route("/tools/{id}/disable", post(disable))
}

async fn list(State(state): State<AppState>) -> Json<Vec<SourceToolDto>> {
    Json(state.catalog.read_model().tools())
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    source_id: Option<String>,
    /// Comma-separated tag filter; every tag must match.
    #[serde(default)]
    tags: Option<String>,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<Vec<SourceToolDto>> {
    let tags: Vec<String> = params
        .tags
        .as_deref()
        .map(|tags| tags.split(',').map(|tag| tag.trim().to_string()).filter(|tag| !tag.is_empty()).collect())
        .unwrap_or_default();

    Json(
        state
            .catalog
            .read_model()
            .search_tools(params.q.as_deref(), params.source_id.as_deref(), &tags),
    )
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SourceToolDto>, ApiError> {
    let tool_id = parse_tool_id(&id)?;

    state
        .catalog
        .read_model()
        .tool(&tool_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("tool '{id}' not found")))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&id)?;
    state.catalog.delete_tool(&tool_id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&id)?;
    state.catalog.enable_tool(&tool_id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct DisableRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn disable(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    body: Option<Json<DisableRequest>>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&id)?;
    let reason = body.and_then(|Json(request)| request.reason);

    state.catalog.disable_tool(&tool_id, reason, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
