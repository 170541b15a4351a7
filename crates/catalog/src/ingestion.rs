//! Inventory ingestion: fetching source descriptors and normalizing each
//! operation into a [`ToolDefinition`].

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    CatalogError, ExecutionMode, ExecutionProfile, HttpMethod, InputSchema, PropertySchema, ToolDefinition, ToolId,
    definition::ParameterLocation,
};

/// A tool as reported by a plugin's `tools/list`, before normalization.
#[derive(Debug, Clone)]
pub struct PluginToolDescriptor {
    /// Plugin-local tool name.
    pub name: String,
    /// Tool description.
    pub description: Option<String>,
    /// JSON-Schema input object.
    pub input_schema: Value,
}

/// What one refresh did, per tool.
#[derive(Debug, Default, Clone)]
pub struct RefreshOutcome {
    /// Tools seen for the first time.
    pub discovered: Vec<ToolId>,
    /// Tools whose definitions changed.
    pub updated: Vec<ToolId>,
    /// Tools missing from the new inventory.
    pub deprecated: Vec<ToolId>,
    /// Previously deprecated tools that reappeared.
    pub restored: Vec<ToolId>,
    /// Tools present with unchanged definitions.
    pub unchanged: usize,
    /// Hash over the whole normalized inventory.
    pub inventory_hash: String,
}

/// Fetches and parses an OpenAPI document.
pub async fn fetch_openapi_document(client: &reqwest::Client, url: &Url) -> Result<Value, String> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| format!("fetching {url}: {err}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("fetching {url}: upstream returned {status}"));
    }

    response.json().await.map_err(|err| format!("parsing {url}: {err}"))
}

/// Normalizes every operation of an OpenAPI document into tool definitions.
///
/// `tool_name` prefers `operationId` and falls back to a deterministic hash
/// of method+path so names stay stable across refreshes. The input schema
/// merges path and query parameters with the JSON request body; `required`
/// reflects the document's required flags.
pub fn normalize_openapi(document: &Value) -> Result<Vec<ToolDefinition>, String> {
    let paths = document
        .get("paths")
        .and_then(Value::as_object)
        .ok_or_else(|| "document has no 'paths' object".to_string())?;

    let mut definitions = Vec::new();

    for (path, item) in paths {
        let Some(item) = item.as_object() else { continue };

        for (method_key, method) in HttpMethod::openapi_keys() {
            let Some(operation) = item.get(method_key).and_then(Value::as_object) else {
                continue;
            };

            let name = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| fallback_operation_name(method, path));

            let summary = operation.get("summary").and_then(Value::as_str).unwrap_or_default();
            let doc = operation.get("description").and_then(Value::as_str).unwrap_or_default();
            let description = match (summary.is_empty(), doc.is_empty()) {
                (false, false) => format!("{summary}\n\n{doc}"),
                (false, true) => summary.to_string(),
                (true, false) => doc.to_string(),
                (true, true) => String::new(),
            };

            let mut properties = IndexMap::new();
            let mut required = Vec::new();

            // Path-item level parameters apply to every operation under it.
            for source in [item.get("parameters"), operation.get("parameters")] {
                let Some(parameters) = source.and_then(Value::as_array) else {
                    continue;
                };

                for parameter in parameters {
                    let Some(name) = parameter.get("name").and_then(Value::as_str) else {
                        continue;
                    };

                    let location = match parameter.get("in").and_then(Value::as_str) {
                        Some("path") => ParameterLocation::Path,
                        Some("query") => ParameterLocation::Query,
                        // Headers and cookies are not forwarded to tools.
                        _ => continue,
                    };

                    let schema = parameter.get("schema").cloned().unwrap_or(Value::Null);

                    properties.insert(
                        name.to_string(),
                        PropertySchema {
                            r#type: schema.get("type").and_then(Value::as_str).map(str::to_string),
                            description: parameter
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            r#enum: schema.get("enum").and_then(Value::as_array).cloned(),
                            location: Some(location),
                        },
                    );

                    let is_required = location == ParameterLocation::Path
                        || parameter.get("required").and_then(Value::as_bool).unwrap_or(false);
                    if is_required && !required.contains(&name.to_string()) {
                        required.push(name.to_string());
                    }
                }
            }

            if let Some(body_schema) = operation
                .get("requestBody")
                .and_then(Value::as_object)
                .and_then(|request_body| request_body.get("content"))
                .and_then(Value::as_object)
                .and_then(|content| content.get("application/json"))
                .and_then(Value::as_object)
                .and_then(|media_type| media_type.get("schema"))
                .and_then(Value::as_object)
            {
                let body_required: Vec<String> = body_schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                if let Some(body_properties) = body_schema.get("properties").and_then(Value::as_object) {
                    for (name, schema) in body_properties {
                        properties.insert(
                            name.clone(),
                            PropertySchema {
                                r#type: schema.get("type").and_then(Value::as_str).map(str::to_string),
                                description: schema.get("description").and_then(Value::as_str).map(str::to_string),
                                r#enum: schema.get("enum").and_then(Value::as_array).cloned(),
                                location: Some(ParameterLocation::Body),
                            },
                        );

                        if body_required.contains(name) && !required.contains(name) {
                            required.push(name.clone());
                        }
                    }
                }
            }

            let tags = operation
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            definitions.push(ToolDefinition {
                name,
                description,
                input_schema: InputSchema { properties, required },
                execution: ExecutionProfile {
                    mode: ExecutionMode::Http {
                        method,
                        path: path.clone(),
                    },
                    required_audience: None,
                    timeout_seconds: None,
                    response_pointer: None,
                },
                tags,
            });
        }
    }

    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(definitions)
}

/// Normalizes a plugin's `tools/list` response into tool definitions.
pub fn normalize_plugin_tools(tools: &[PluginToolDescriptor]) -> Vec<ToolDefinition> {
    let mut definitions: Vec<ToolDefinition> = tools
        .iter()
        .map(|tool| {
            let mut properties = IndexMap::new();
            let mut required = Vec::new();

            if let Some(schema_properties) = tool.input_schema.get("properties").and_then(Value::as_object) {
                for (name, schema) in schema_properties {
                    properties.insert(
                        name.clone(),
                        PropertySchema {
                            r#type: schema.get("type").and_then(Value::as_str).map(str::to_string),
                            description: schema.get("description").and_then(Value::as_str).map(str::to_string),
                            r#enum: schema.get("enum").and_then(Value::as_array).cloned(),
                            location: None,
                        },
                    );
                }
            }

            if let Some(schema_required) = tool.input_schema.get("required").and_then(Value::as_array) {
                required.extend(schema_required.iter().filter_map(Value::as_str).map(str::to_string));
            }

            ToolDefinition {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                input_schema: InputSchema { properties, required },
                execution: ExecutionProfile {
                    mode: ExecutionMode::Plugin {
                        tool_name: tool.name.clone(),
                    },
                    required_audience: None,
                    timeout_seconds: None,
                    response_pointer: None,
                },
                tags: Vec::new(),
            }
        })
        .collect();

    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    definitions
}

/// Hash over a whole normalized inventory, stable across orderings.
pub(crate) fn inventory_hash(tool_hashes: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, hash) in tool_hashes {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(hash.as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}

pub(crate) fn ingestion_error(source_id: &str, message: impl Into<String>) -> CatalogError {
    CatalogError::Ingestion {
        source_id: source_id.to_string(),
        message: message.into(),
    }
}

fn fallback_operation_name(method: HttpMethod, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_string().as_bytes());
    hasher.update(b" ");
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();
    format!("op_{:x}", digest)[..11].to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn weather_document() -> Value {
        json!({
            "openapi": "3.0.0",
            "paths": {
                "/forecast/{city}": {
                    "get": {
                        "operationId": "get_forecast",
                        "summary": "Forecast for a city",
                        "tags": ["weather"],
                        "parameters": [
                            {"name": "city", "in": "path", "required": true, "schema": {"type": "string"}},
                            {"name": "days", "in": "query", "schema": {"type": "integer"}}
                        ]
                    }
                },
                "/alerts": {
                    "post": {
                        "summary": "Subscribe to alerts",
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "required": ["region"],
                                        "properties": {
                                            "region": {"type": "string"},
                                            "severity": {"type": "string", "enum": ["low", "high"]}
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn operations_normalize_with_merged_parameters() {
        let definitions = normalize_openapi(&weather_document()).unwrap();
        assert_eq!(definitions.len(), 2);

        let forecast = definitions.iter().find(|def| def.name == "get_forecast").unwrap();
        assert_eq!(forecast.description, "Forecast for a city");
        assert_eq!(forecast.tags, vec!["weather"]);
        assert!(matches!(
            &forecast.execution.mode,
            ExecutionMode::Http { method: HttpMethod::Get, path } if path == "/forecast/{city}"
        ));
        assert_eq!(
            forecast.input_schema.properties["city"].location,
            Some(ParameterLocation::Path)
        );
        assert_eq!(
            forecast.input_schema.properties["days"].location,
            Some(ParameterLocation::Query)
        );
        assert_eq!(forecast.input_schema.required, vec!["city"]);
    }

    #[test]
    fn missing_operation_id_falls_back_to_stable_hash() {
        let definitions = normalize_openapi(&weather_document()).unwrap();
        let alerts = definitions.iter().find(|def| def.name.starts_with("op_")).unwrap();

        // Body parameters land in the schema with body location.
        assert_eq!(
            alerts.input_schema.properties["region"].location,
            Some(ParameterLocation::Body)
        );
        assert_eq!(alerts.input_schema.required, vec!["region"]);
        assert!(alerts.input_schema.properties["severity"].r#enum.is_some());

        // Same document, same fallback name.
        let again = normalize_openapi(&weather_document()).unwrap();
        let alerts_again = again.iter().find(|def| def.name.starts_with("op_")).unwrap();
        assert_eq!(alerts.name, alerts_again.name);
    }

    #[test]
    fn plugin_tools_normalize_schema_and_transport() {
        let tools = vec![PluginToolDescriptor {
            name: "search_docs".into(),
            description: Some("Full text search".into()),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        }];

        let definitions = normalize_plugin_tools(&tools);
        assert_eq!(definitions.len(), 1);
        assert!(matches!(
            &definitions[0].execution.mode,
            ExecutionMode::Plugin { tool_name } if tool_name == "search_docs"
        ));
        assert_eq!(definitions[0].input_schema.required, vec!["query"]);
    }

    #[test]
    fn document_without_paths_is_rejected() {
        assert!(normalize_openapi(&json!({"openapi": "3.0.0"})).is_err());
    }
}
