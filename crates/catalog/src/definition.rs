//! The executable specification extracted from a source operation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A normalized, addressable tool operation: what the LLM sees and what the
/// execution pipeline dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Stable tool name, unique within its source.
    pub name: String,
    /// Human/LLM readable description.
    #[serde(default)]
    pub description: String,
    /// JSON-Schema-shaped input contract.
    pub input_schema: InputSchema,
    /// How and where the tool executes.
    pub execution: ExecutionProfile,
    /// Free-form tags used by group selectors.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ToolDefinition {
    /// Content hash for change detection across inventory refreshes.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        // serde_json serializes IndexMap in insertion order, which the
        // normalizer keeps deterministic.
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// JSON-Schema subset describing a tool's arguments object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSchema {
    /// Property schemas keyed by argument name, in declaration order.
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
    /// Names of required arguments.
    #[serde(default)]
    pub required: Vec<String>,
}

/// Schema for a single argument.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON type name: string, number, integer, boolean, array, object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    /// Argument description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Closed set of accepted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,
    /// Where the argument travels on HTTP dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ParameterLocation>,
}

/// HTTP parameter location, carried through from the OpenAPI document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
    /// Substituted into the URL path template.
    Path,
    /// Appended to the query string.
    Query,
    /// Part of the JSON request body.
    Body,
}

/// How a tool call reaches the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// Transport-specific addressing.
    pub mode: ExecutionMode,
    /// Audience the caller token must be exchanged for. When absent the
    /// caller's raw token is forwarded as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_audience: Option<String>,
    /// Dispatch timeout in seconds; the executor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Optional JSON pointer selecting the interesting part of the upstream
    /// response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_pointer: Option<String>,
}

/// Transport-specific addressing for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// HTTP request against an OpenAPI/workflow source.
    Http {
        /// HTTP method.
        method: HttpMethod,
        /// Path template with `{param}` placeholders, relative to the
        /// source's base URL.
        path: String,
    },
    /// `tools/call` against the source's plugin transport.
    Plugin {
        /// The plugin-local tool name.
        tool_name: String,
    },
}

/// HTTP methods a tool operation can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl HttpMethod {
    /// The OpenAPI path-item keys for every supported method.
    pub fn openapi_keys() -> [(&'static str, HttpMethod); 5] {
        [
            ("get", HttpMethod::Get),
            ("put", HttpMethod::Put),
            ("post", HttpMethod::Post),
            ("delete", HttpMethod::Delete),
            ("patch", HttpMethod::Patch),
        ]
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(description: &str) -> ToolDefinition {
        ToolDefinition {
            name: "get_forecast".into(),
            description: description.into(),
            input_schema: InputSchema::default(),
            execution: ExecutionProfile {
                mode: ExecutionMode::Http {
                    method: HttpMethod::Get,
                    path: "/forecast/{city}".into(),
                },
                required_audience: None,
                timeout_seconds: None,
                response_pointer: None,
            },
            tags: vec!["weather".into()],
        }
    }

    #[test]
    fn hash_is_stable_for_equal_definitions() {
        assert_eq!(definition("a").content_hash(), definition("a").content_hash());
    }

    #[test]
    fn hash_changes_with_content() {
        assert_ne!(definition("a").content_hash(), definition("b").content_hash());
    }
}
