//! Agent definition and conversation template administration.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use catalog::ToolId;
use context::Authentication;
use orchestrator::{AgentAccessRules, AgentDefinitionDto, TemplateDto, TemplateItem, TemplateSettings};
use serde::Deserialize;

use crate::{error::ApiError, routes::subject, state::AppState};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/definitions", post(create_definition))
        .route("/definitions", get(list_definitions))
        .route("/definitions/{id}", delete(remove_definition))
        .route("/templates", post(create_template))
        .route("/templates", get(list_templates))
        .route("/templates/{id}", delete(remove_template))
}

#[derive(Deserialize)]
struct CreateDefinitionRequest {
    id: String,
    name: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    allowed_tools: Vec<ToolId>,
    #[serde(default)]
    template_id: Option<String>,
    #[serde(default)]
    access: AgentAccessRules,
}

async fn create_definition(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<CreateDefinitionRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .create_definition(
            &request.id,
            &request.name,
            request.system_prompt,
            request.model_id,
            request.allowed_tools,
            request.template_id,
            request.access,
            &subject(&auth),
        )
        .await?;

    Ok(StatusCode::CREATED)
}

async fn list_definitions(State(state): State<AppState>) -> Json<Vec<AgentDefinitionDto>> {
    Json(state.orchestrator.read_model().definitions())
}

async fn remove_definition(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_definition(&id, &subject(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateTemplateRequest {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    settings: TemplateSettings,
    #[serde(default)]
    items: Vec<TemplateItem>,
}

async fn create_template(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .create_template(
            &request.id,
            &request.name,
            request.description,
            request.settings,
            request.items,
            &subject(&auth),
        )
        .await?;

    Ok(StatusCode::CREATED)
}

async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateDto>> {
    Json(state.orchestrator.read_model().templates())
}

async fn remove_template(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete_template(&id, &subject(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
