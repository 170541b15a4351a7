//! LLM provider configuration structures.

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// LLM configuration for the conversation runtime.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Model used when neither the request nor the agent definition names
    /// one, in `provider/model` form.
    pub default_model: Option<String>,
    /// Map of provider names to their configurations.
    pub providers: IndexMap<String, LlmProviderConfig>,
}

impl LlmConfig {
    /// Returns whether at least one provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Splits a `provider/model` identifier into its parts.
    pub fn split_model_id(model_id: &str) -> Option<(&str, &str)> {
        model_id.split_once('/')
    }
}

/// The wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions API (OpenAI, vLLM, Ollama, ...).
    Openai,
}

/// Configuration for an individual LLM provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmProviderConfig {
    /// Protocol the provider speaks.
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Base URL of the provider API. Defaults to the provider's public
    /// endpoint when absent.
    #[serde(default)]
    pub base_url: Option<Url>,
    /// API key sent as a bearer credential.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Models exposed by this provider, keyed by the public model id.
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
}

/// Configuration for an individual model within a provider.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Optional rename - the actual provider model name. If not specified,
    /// the model id (map key) is used.
    pub rename: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_with_models() {
        let config: LlmConfig = toml::from_str(
            r#"
            default_model = "local/llama3"

            [providers.local]
            type = "openai"
            base_url = "http://localhost:11434/v1"

            [providers.local.models.llama3]
            rename = "llama3:latest"
        "#,
        )
        .unwrap();

        assert!(config.has_providers());

        let provider = &config.providers["local"];
        assert_eq!(provider.kind, ProviderKind::Openai);
        assert_eq!(provider.models["llama3"].rename.as_deref(), Some("llama3:latest"));
        assert_eq!(LlmConfig::split_model_id("local/llama3"), Some(("local", "llama3")));
    }

    #[test]
    fn bare_model_id_does_not_split() {
        assert_eq!(LlmConfig::split_model_id("llama3"), None);
    }
}
