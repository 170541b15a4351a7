//! Tool group administration.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use catalog::{SelectorField, SelectorKind, ToolGroupDto, ToolSelector};
use context::Authentication;
use serde::Deserialize;

use crate::{
    error::ApiError,
    routes::{metadata, parse_tool_id},
    state::AppState,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", post(create))
        .route("/groups", get(list))
        .route("/groups/{id}", get(get_one))
        .route("/groups/{id}", put(update))
        .route("/groups/{id}", delete(remove))
        .route("/groups/{id}/selectors", post(add_selector))
        .route("/groups/{id}/selectors/{selector_id}", delete(remove_selector))
        .route("/groups/{id}/include/{tool_id}", post(include_tool))
        .route("/groups/{id}/include/{tool_id}", delete(remove_included))
        .route("/groups/{id}/exclude/{tool_id}", post(exclude_tool))
        .route("/groups/{id}/exclude/{tool_id}", delete(unexclude_tool))
}

#[derive(Deserialize)]
struct SelectorRequest {
    field: SelectorField,
    #[serde(default)]
    kind: SelectorKind,
    pattern: String,
}

impl From<SelectorRequest> for ToolSelector {
    fn from(request: SelectorRequest) -> Self {
        ToolSelector::new(request.field, request.kind, request.pattern)
    }
}

#[derive(Deserialize)]
struct CreateRequest {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    selectors: Vec<SelectorRequest>,
}

async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<CreateRequest>,
) -> Result<StatusCode, ApiError> {
    let selectors = request.selectors.into_iter().map(ToolSelector::from).collect();

    state
        .catalog
        .create_group(&request.id, &request.name, &request.description, selectors, metadata(&auth))
        .await?;

    Ok(StatusCode::CREATED)
}

async fn list(State(state): State<AppState>) -> Json<Vec<ToolGroupDto>> {
    Json(state.catalog.read_model().groups())
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ToolGroupDto>, ApiError> {
    state
        .catalog
        .read_model()
        .group(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("group '{id}' not found")))
}

#[derive(Deserialize)]
struct UpdateRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .update_group(&id, request.name.as_deref(), request.description.as_deref(), metadata(&auth))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_group(&id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_selector(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(request): Json<SelectorRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .add_group_selector(&id, request.into(), metadata(&auth))
        .await?;
    Ok(StatusCode::CREATED)
}

async fn remove_selector(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path((id, selector_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .remove_group_selector(&id, &selector_id, metadata(&auth))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn include_tool(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path((id, tool_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&tool_id)?;
    state.catalog.include_group_tool(&id, tool_id, metadata(&auth)).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_included(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path((id, tool_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&tool_id)?;
    state.catalog.remove_group_tool(&id, &tool_id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn exclude_tool(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path((id, tool_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&tool_id)?;
    state.catalog.exclude_group_tool(&id, tool_id, metadata(&auth)).await?;
    Ok(StatusCode::CREATED)
}

async fn unexclude_tool(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path((id, tool_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tool_id = parse_tool_id(&tool_id)?;
    state.catalog.unexclude_group_tool(&id, &tool_id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
