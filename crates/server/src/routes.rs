//! Control-plane routes.

mod agents;
mod chat;
mod conversations;
mod groups;
mod policies;
mod sources;
mod tools;

use axum::Router;
use context::{Authentication, CallerToken, Claims};
use event_store::EventMetadata;
use secrecy::SecretString;

use crate::{error::ApiError, state::AppState};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .merge(chat::router())
        .merge(conversations::router())
        .merge(tools::router())
        .merge(sources::router())
        .merge(groups::router())
        .merge(policies::router())
        .merge(agents::router())
}

/// The verified caller, or a synthetic anonymous identity when no OIDC
/// provider is configured (the auth layer rejects bad tokens before this).
pub(crate) fn caller(auth: &Authentication) -> CallerToken {
    match &auth.caller {
        Some(caller) => caller.clone(),
        None => CallerToken::new(
            SecretString::from(String::new()),
            jwt_compact::Claims::new(Claims {
                issuer: None,
                audience: None,
                subject: Some("anonymous".to_string()),
                additional: Default::default(),
            }),
        ),
    }
}

/// The caller's subject for event attribution.
pub(crate) fn subject(auth: &Authentication) -> String {
    auth.subject().unwrap_or("anonymous").to_string()
}

/// Event metadata attributed to the caller.
pub(crate) fn metadata(auth: &Authentication) -> EventMetadata {
    EventMetadata::for_user(subject(auth)).with_correlation(uuid::Uuid::new_v4().to_string())
}

/// Parses a composite tool id out of a path segment.
pub(crate) fn parse_tool_id(raw: &str) -> Result<catalog::ToolId, ApiError> {
    raw.parse().map_err(|message: String| ApiError::bad_request(message))
}
