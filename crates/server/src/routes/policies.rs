//! Access policy administration.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use catalog::{AccessPolicyDto, ClaimMatcher, MatchOperator};
use context::Authentication;
use serde::Deserialize;
use serde_json::Value;

use crate::{error::ApiError, routes::metadata, state::AppState};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/policies", post(create))
        .route("/policies", get(list))
        .route("/policies/{id}", get(get_one))
        .route("/policies/{id}", delete(remove))
        .route("/policies/{id}/matchers", put(update_matchers))
        .route("/policies/{id}/groups", put(update_groups))
        .route("/policies/{id}/priority", put(update_priority))
        .route("/policies/{id}/activate", post(activate))
        .route("/policies/{id}/deactivate", post(deactivate))
}

#[derive(Deserialize)]
struct MatcherRequest {
    claim_path: String,
    operator: MatchOperator,
    expected: Value,
}

impl From<MatcherRequest> for ClaimMatcher {
    fn from(request: MatcherRequest) -> Self {
        ClaimMatcher::new(request.claim_path, request.operator, request.expected)
    }
}

#[derive(Deserialize)]
struct CreateRequest {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    matchers: Vec<MatcherRequest>,
    allowed_group_ids: Vec<String>,
    #[serde(default)]
    priority: i32,
}

async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<CreateRequest>,
) -> Result<StatusCode, ApiError> {
    let matchers = request.matchers.into_iter().map(ClaimMatcher::from).collect();

    state
        .catalog
        .define_policy(
            &request.id,
            &request.name,
            request.description,
            matchers,
            request.allowed_group_ids,
            request.priority,
            metadata(&auth),
        )
        .await?;

    Ok(StatusCode::CREATED)
}

async fn list(State(state): State<AppState>) -> Json<Vec<AccessPolicyDto>> {
    Json(state.catalog.read_model().policies())
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AccessPolicyDto>, ApiError> {
    state
        .catalog
        .read_model()
        .policy(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("policy '{id}' not found")))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_policy(&id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_matchers(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(matchers): Json<Vec<MatcherRequest>>,
) -> Result<StatusCode, ApiError> {
    let matchers = matchers.into_iter().map(ClaimMatcher::from).collect();
    state.catalog.update_policy_matchers(&id, matchers, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_groups(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(groups): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    state.catalog.update_policy_groups(&id, groups, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct PriorityRequest {
    priority: i32,
}

async fn update_priority(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    Json(request): Json<PriorityRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .set_policy_priority(&id, request.priority, metadata(&auth))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.activate_policy(&id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct DeactivateRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn deactivate(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
    body: Option<Json<DeactivateRequest>>,
) -> Result<StatusCode, ApiError> {
    let reason = body.and_then(|Json(request)| request.reason);
    state.catalog.deactivate_policy(&id, reason, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
