//! HTTP transport dispatch for openapi/workflow tools.

use std::time::Duration;

use catalog::{HttpMethod, SourceToolDto, ToolDefinition};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use url::Url;

use crate::{ExecutionOutcome, ExecutionStatus, ExecutorError};

/// Builds and sends the HTTP request for a tool call.
///
/// Path parameters substitute into the URL template; query parameters append
/// to the query string; everything else travels in a JSON body (or the query
/// string for bodyless methods). The bearer credential is whatever identity
/// the exchange phase produced.
pub async fn dispatch(
    client: &reqwest::Client,
    tool: &SourceToolDto,
    base_url: &Url,
    method: HttpMethod,
    path: &str,
    arguments: &Value,
    bearer: Option<&SecretString>,
    timeout: Duration,
) -> Result<ExecutionOutcome, ExecutorError> {
    let started = std::time::Instant::now();

    let (url, body) = build_request_parts(&tool.definition, base_url, method, path, arguments)
        .map_err(|message| ExecutorError::Validation {
            pointer: "".to_string(),
            message,
        })?;

    let mut request = match method {
        HttpMethod::Get => client.get(url),
        HttpMethod::Put => client.put(url),
        HttpMethod::Post => client.post(url),
        HttpMethod::Delete => client.delete(url),
        HttpMethod::Patch => client.patch(url),
    }
    .timeout(timeout);

    if let Some(bearer) = bearer {
        request = request.bearer_auth(bearer.expose_secret());
    }

    let has_body = !matches!(method, HttpMethod::Get | HttpMethod::Delete);
    if has_body && !body.is_empty() {
        request = request.json(&Value::Object(body));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            return Err(ExecutorError::Timeout(tool.id.to_string(), timeout));
        }
        Err(err) => {
            // Transport failures still shape into a failed outcome so the
            // agent loop can react to them.
            return Ok(ExecutionOutcome {
                tool_id: tool.id.clone(),
                status: ExecutionStatus::Failed,
                result: None,
                error: Some(format!("transport error: {err}")),
                upstream_status: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
            });
        }
    };

    let status = response.status();
    let body = read_body(response).await;

    let result = if status.is_success() {
        apply_response_pointer(&tool.definition, body)
    } else {
        body
    };

    Ok(ExecutionOutcome {
        tool_id: tool.id.clone(),
        status: if status.is_success() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        },
        error: (!status.is_success()).then(|| format!("upstream returned {status}")),
        result: Some(result),
        upstream_status: Some(status.as_u16()),
        execution_time_ms: started.elapsed().as_millis() as u64,
    })
}

/// Splits arguments across path, query, and body per the schema's declared
/// locations, and renders the final URL.
fn build_request_parts(
    definition: &ToolDefinition,
    base_url: &Url,
    method: HttpMethod,
    path: &str,
    arguments: &Value,
) -> Result<(Url, Map<String, Value>), String> {
    use catalog::ParameterLocation;

    let empty = Map::new();
    let object = arguments.as_object().unwrap_or(&empty);

    let mut rendered_path = path.to_string();
    let mut query: Vec<(String, String)> = Vec::new();
    let mut body = Map::new();

    for (name, value) in object {
        if value.is_null() {
            continue;
        }

        let location = definition
            .input_schema
            .properties
            .get(name)
            .and_then(|property| property.location);

        match location {
            Some(ParameterLocation::Path) => {
                let placeholder = format!("{{{name}}}");
                if !rendered_path.contains(&placeholder) {
                    return Err(format!("path template has no '{placeholder}' placeholder"));
                }
                rendered_path = rendered_path.replace(&placeholder, &scalar_string(value));
            }
            Some(ParameterLocation::Query) => {
                query.push((name.clone(), scalar_string(value)));
            }
            Some(ParameterLocation::Body) => {
                body.insert(name.clone(), value.clone());
            }
            None => {
                // Undeclared location: bodyless methods get query strings,
                // everything else goes in the body.
                if matches!(method, HttpMethod::Get | HttpMethod::Delete) {
                    query.push((name.clone(), scalar_string(value)));
                } else {
                    body.insert(name.clone(), value.clone());
                }
            }
        }
    }

    if let Some(unfilled) = find_placeholder(&rendered_path) {
        return Err(format!("missing required path parameter '{unfilled}'"));
    }

    let mut url = base_url
        .join(rendered_path.trim_start_matches('/'))
        .map_err(|err| format!("invalid dispatch URL: {err}"))?;

    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    Ok((url, body))
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn find_placeholder(path: &str) -> Option<&str> {
    let start = path.find('{')?;
    let end = path[start..].find('}')?;
    Some(&path[start + 1..start + end])
}

async fn read_body(response: reqwest::Response) -> Value {
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("json"));

    if is_json {
        response.json().await.unwrap_or(Value::Null)
    } else {
        Value::String(response.text().await.unwrap_or_default())
    }
}

fn apply_response_pointer(definition: &ToolDefinition, body: Value) -> Value {
    match definition.execution.response_pointer.as_deref() {
        Some(pointer) => body.pointer(pointer).cloned().unwrap_or(body),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use catalog::{ExecutionMode, ExecutionProfile, InputSchema, ParameterLocation, PropertySchema};
    use indexmap::IndexMap;
    use serde_json::json;

    use super::*;

    fn definition(method: HttpMethod) -> ToolDefinition {
        let mut properties = IndexMap::new();
        properties.insert(
            "city".to_string(),
            PropertySchema {
                r#type: Some("string".into()),
                location: Some(ParameterLocation::Path),
                ..Default::default()
            },
        );
        properties.insert(
            "days".to_string(),
            PropertySchema {
                r#type: Some("integer".into()),
                location: Some(ParameterLocation::Query),
                ..Default::default()
            },
        );
        properties.insert(
            "note".to_string(),
            PropertySchema {
                r#type: Some("string".into()),
                location: Some(ParameterLocation::Body),
                ..Default::default()
            },
        );

        ToolDefinition {
            name: "get_forecast".into(),
            description: String::new(),
            input_schema: InputSchema {
                properties,
                required: vec!["city".into()],
            },
            execution: ExecutionProfile {
                mode: ExecutionMode::Http {
                    method,
                    path: "/forecast/{city}".into(),
                },
                required_audience: None,
                timeout_seconds: None,
                response_pointer: None,
            },
            tags: vec![],
        }
    }

    #[test]
    fn arguments_split_across_path_query_and_body() {
        let base: Url = "https://weather.internal/api/".parse().unwrap();
        let args = json!({"city": "Paris", "days": 3, "note": "hi"});

        let (url, body) =
            build_request_parts(&definition(HttpMethod::Post), &base, HttpMethod::Post, "/forecast/{city}", &args)
                .unwrap();

        assert_eq!(url.path(), "/api/forecast/Paris");
        assert_eq!(url.query(), Some("days=3"));
        assert_eq!(body.get("note"), Some(&json!("hi")));
        assert!(!body.contains_key("city"));
    }

    #[test]
    fn missing_path_parameter_is_reported() {
        let base: Url = "https://weather.internal".parse().unwrap();
        let err = build_request_parts(
            &definition(HttpMethod::Get),
            &base,
            HttpMethod::Get,
            "/forecast/{city}",
            &json!({"days": 1}),
        )
        .unwrap_err();
        assert!(err.contains("city"));
    }

    #[test]
    fn undeclared_arguments_default_to_query_for_get() {
        let base: Url = "https://weather.internal".parse().unwrap();
        let args = json!({"city": "Paris", "verbose": true});

        let (url, body) =
            build_request_parts(&definition(HttpMethod::Get), &base, HttpMethod::Get, "/forecast/{city}", &args)
                .unwrap();

        assert!(url.query().unwrap_or_default().contains("verbose=true"));
        assert!(body.is_empty());
    }
}
