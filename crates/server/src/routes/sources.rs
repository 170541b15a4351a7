//! Upstream source registration and inventory refresh.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use catalog::{AuthMode, PluginLaunchConfig, RefreshOutcome, RegisterSource, SourceDto, SourceKind};
use context::Authentication;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::ApiError, routes::metadata, state::AppState};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/sources", post(register))
        .route("/sources", get(list))
        .route("/sources/{id}", get(get_one))
        .route("/sources/{id}", delete(remove))
        .route("/sources/{id}/refresh", post(refresh))
        .route("/sources/{id}/enable", post(enable))
        .route("/sources/{id}/disable", post(disable))
}

#[derive(Deserialize)]
struct RegisterRequest {
    id: String,
    name: String,
    kind: SourceKind,
    #[serde(default)]
    base_url: Option<Url>,
    #[serde(default)]
    spec_url: Option<Url>,
    #[serde(default)]
    auth_mode: AuthMode,
    #[serde(default)]
    default_audience: Option<String>,
    #[serde(default)]
    required_scopes: Vec<String>,
    #[serde(default)]
    plugin: Option<PluginLaunchConfig>,
}

async fn register(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Json(request): Json<RegisterRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .catalog
        .register_source(
            RegisterSource {
                id: request.id,
                name: request.name,
                kind: request.kind,
                base_url: request.base_url,
                spec_url: request.spec_url,
                auth_mode: request.auth_mode,
                default_audience: request.default_audience,
                required_scopes: request.required_scopes,
                plugin: request.plugin,
            },
            metadata(&auth),
        )
        .await?;

    Ok(StatusCode::CREATED)
}

async fn list(State(state): State<AppState>) -> Json<Vec<SourceDto>> {
    Json(state.catalog.read_model().sources())
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SourceDto>, ApiError> {
    state
        .catalog
        .read_model()
        .source(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("source '{id}' not found")))
}

#[derive(Serialize)]
struct RefreshResponse {
    discovered: Vec<String>,
    updated: Vec<String>,
    deprecated: Vec<String>,
    restored: Vec<String>,
    unchanged: usize,
    inventory_hash: String,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        let ids = |tools: Vec<catalog::ToolId>| tools.into_iter().map(|id| id.to_string()).collect();

        Self {
            discovered: ids(outcome.discovered),
            updated: ids(outcome.updated),
            deprecated: ids(outcome.deprecated),
            restored: ids(outcome.restored),
            unchanged: outcome.unchanged,
            inventory_hash: outcome.inventory_hash,
        }
    }
}

async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let source = state
        .catalog
        .read_model()
        .source(&id)
        .ok_or_else(|| ApiError::not_found(format!("source '{id}' not found")))?;

    // Plugin inventories come from the live transport; HTTP inventories are
    // fetched from the spec URL by the catalog itself.
    let provided = if source.kind.uses_plugin_transport() {
        let descriptors = state.executor.plugins().list_tools(&source).await?;
        Some(catalog::normalize_plugin_tools(&descriptors))
    } else {
        None
    };

    let outcome = state.catalog.refresh_source(&id, provided, metadata(&auth)).await?;
    Ok(Json(outcome.into()))
}

async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete_source(&id, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.enable_source(&id, metadata(&auth)).await?;
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
    let reason = body.and_then(|Json(request)| request.reason);
    state.catalog.disable_source(&id, reason, metadata(&auth)).await?;
    Ok(StatusCode::NO_CONTENT)
}
