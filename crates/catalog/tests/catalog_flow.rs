//! End-to-end catalog flows: inventory refresh deltas and claim-based
//! access resolution over the event store.

use std::sync::Arc;

use catalog::{
    AuthMode, CatalogCaches, CatalogReadModel, CatalogService, ClaimMatcher, ExecutionMode, ExecutionProfile,
    HttpMethod, InputSchema, MatchOperator, RegisterSource, SelectorField, SelectorKind, SourceKind, ToolDefinition,
    ToolId, ToolSelector, ToolStatus,
};
use context::Claims;
use event_store::{EventMetadata, EventStore, InMemoryBackend};
use serde_json::json;

fn definition(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: InputSchema::default(),
        execution: ExecutionProfile {
            mode: ExecutionMode::Http {
                method: HttpMethod::Get,
                path: format!("/{name}"),
            },
            required_audience: None,
            timeout_seconds: None,
            response_pointer: None,
        },
        tags: vec!["test".to_string()],
    }
}

fn service() -> CatalogService {
    let store = Arc::new(EventStore::new(Arc::new(InMemoryBackend::new())));
    let read_model = Arc::new(CatalogReadModel::new(store.clone()));
    let caches = Arc::new(CatalogCaches::new(&config::CatalogConfig::default()));
    CatalogService::new(store, read_model, caches)
}

async fn register_weather(service: &CatalogService) {
    service
        .register_source(
            RegisterSource {
                id: "weather".into(),
                name: "Weather API".into(),
                kind: SourceKind::Openapi,
                base_url: Some("https://weather.internal".parse().unwrap()),
                spec_url: None,
                auth_mode: AuthMode::TokenExchange,
                default_audience: Some("weather-api".into()),
                required_scopes: vec![],
                plugin: None,
            },
            EventMetadata::default(),
        )
        .await
        .unwrap();
}

fn claims(additional: serde_json::Value) -> Claims {
    Claims {
        issuer: None,
        audience: None,
        subject: Some("user-1".into()),
        additional: serde_json::from_value(additional).unwrap(),
    }
}

#[tokio::test]
async fn refresh_delta_produces_expected_tool_lifecycles() {
    let service = service();
    register_weather(&service).await;

    // First sync: a, b, c.
    let outcome = service
        .refresh_source(
            "weather",
            Some(vec![
                definition("a", "v1"),
                definition("b", "v1"),
                definition("c", "v1"),
            ]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.discovered.len(), 3);
    assert!(outcome.updated.is_empty());
    assert!(outcome.deprecated.is_empty());

    // Second sync: a changed, b gone, c unchanged, d new.
    let outcome = service
        .refresh_source(
            "weather",
            Some(vec![
                definition("a", "v2"),
                definition("c", "v1"),
                definition("d", "v1"),
            ]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.updated, vec![ToolId::new("weather", "a")]);
    assert_eq!(outcome.deprecated, vec![ToolId::new("weather", "b")]);
    assert_eq!(outcome.discovered, vec![ToolId::new("weather", "d")]);
    assert_eq!(outcome.unchanged, 1);

    let read_model = service.read_model();
    assert_eq!(read_model.tool(&ToolId::new("weather", "b")).unwrap().status, ToolStatus::Deprecated);
    assert_eq!(read_model.tool(&ToolId::new("weather", "a")).unwrap().status, ToolStatus::Active);

    // Third sync: b reappears and is restored.
    let outcome = service
        .refresh_source(
            "weather",
            Some(vec![
                definition("a", "v2"),
                definition("b", "v1"),
                definition("c", "v1"),
                definition("d", "v1"),
            ]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.restored, vec![ToolId::new("weather", "b")]);
    assert_eq!(read_model.tool(&ToolId::new("weather", "b")).unwrap().status, ToolStatus::Active);
    assert_eq!(read_model.source("weather").unwrap().tool_count, 4);
}

#[tokio::test]
async fn access_resolution_honors_policies_groups_and_enablement() {
    let service = service();
    register_weather(&service).await;

    service
        .refresh_source(
            "weather",
            Some(vec![definition("get_forecast", "v1"), definition("list_users", "v1")]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    service
        .create_group(
            "ops",
            "Ops",
            "forecast tools",
            vec![ToolSelector::new(SelectorField::Name, SelectorKind::Wildcard, "get_*")],
            EventMetadata::default(),
        )
        .await
        .unwrap();

    service
        .define_policy(
            "admins",
            "Admins",
            None,
            vec![ClaimMatcher::new("roles", MatchOperator::Contains, json!("admin"))],
            vec!["ops".into()],
            10,
            EventMetadata::default(),
        )
        .await
        .unwrap();

    let resolver = service.resolver();
    let forecast = ToolId::new("weather", "get_forecast");

    // Viewer matches no policy: empty set, explicit request denied.
    let viewer = claims(json!({"roles": ["viewer"]}));
    assert!(resolver.resolve_accessible_tools(&viewer).is_empty());
    assert!(!resolver.can_access(&viewer, &forecast));

    // Admin resolves the selector-matched tool but not the unselected one.
    let admin = claims(json!({"roles": ["admin"]}));
    let accessible = resolver.resolve_accessible_tools(&admin);
    assert!(accessible.contains(&forecast));
    assert!(!accessible.contains(&ToolId::new("weather", "list_users")));

    // Disabling the tool removes it from resolution immediately.
    service
        .disable_tool(&forecast, None, EventMetadata::default())
        .await
        .unwrap();
    assert!(!resolver.can_access(&admin, &forecast));

    // Re-enabling restores access.
    service.enable_tool(&forecast, EventMetadata::default()).await.unwrap();
    assert!(resolver.can_access(&admin, &forecast));

    // Disabling the whole source removes access without touching the tool.
    service
        .disable_source("weather", Some("maintenance".into()), EventMetadata::default())
        .await
        .unwrap();
    assert!(resolver.resolve_accessible_tools(&admin).is_empty());
}

#[tokio::test]
async fn excludes_win_over_selectors_and_includes() {
    let service = service();
    register_weather(&service).await;

    service
        .refresh_source(
            "weather",
            Some(vec![definition("get_forecast", "v1"), definition("get_alerts", "v1")]),
            EventMetadata::default(),
        )
        .await
        .unwrap();

    service
        .create_group(
            "all-get",
            "All getters",
            "",
            vec![ToolSelector::new(SelectorField::Name, SelectorKind::Wildcard, "get_*")],
            EventMetadata::default(),
        )
        .await
        .unwrap();

    service
        .exclude_group_tool("all-get", ToolId::new("weather", "get_alerts"), EventMetadata::default())
        .await
        .unwrap();

    service
        .define_policy(
            "everyone",
            "Everyone",
            None,
            vec![ClaimMatcher::new("sub", MatchOperator::StartsWith, json!("user-"))],
            vec!["all-get".into()],
            0,
            EventMetadata::default(),
        )
        .await
        .unwrap();

    let accessible = service.resolver().resolve_accessible_tools(&claims(json!({})));
    assert!(accessible.contains(&ToolId::new("weather", "get_forecast")));
    assert!(!accessible.contains(&ToolId::new("weather", "get_alerts")));
}

#[tokio::test]
async fn deleting_a_source_deprecates_owned_tools() {
    let service = service();
    register_weather(&service).await;

    service
        .refresh_source("weather", Some(vec![definition("a", "v1")]), EventMetadata::default())
        .await
        .unwrap();

    service.delete_source("weather", EventMetadata::default()).await.unwrap();

    let read_model = service.read_model();
    assert!(read_model.source("weather").is_none());
    assert_eq!(read_model.tool(&ToolId::new("weather", "a")).unwrap().status, ToolStatus::Deprecated);
}
