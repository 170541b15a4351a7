//! Provider registry: routes `provider/model` identifiers to a backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use config::{LlmConfig, ProviderKind};

use crate::{ChatProvider, LlmError, OpenAiProvider};

/// All configured providers, keyed by name.
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ChatProvider>>,
    default_model: Option<String>,
}

impl ProviderRegistry {
    /// Builds the registry from configuration.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: BTreeMap<String, Arc<dyn ChatProvider>> = BTreeMap::new();

        for (name, provider_config) in &config.providers {
            match provider_config.kind {
                ProviderKind::Openai => {
                    providers.insert(name.clone(), Arc::new(OpenAiProvider::new(name.clone(), provider_config)));
                }
            }
        }

        Self {
            providers,
            default_model: config.default_model.clone(),
        }
    }

    /// Registers a provider directly. Used by tests to install mocks.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    /// An empty registry with a default model. Used by tests.
    pub fn empty(default_model: Option<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            default_model,
        }
    }

    /// Whether any provider is configured.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves a `provider/model` identifier (or the configured default
    /// when absent) into a provider handle and its local model name.
    pub fn resolve(&self, model_id: Option<&str>) -> Result<(Arc<dyn ChatProvider>, String), LlmError> {
        let model_id = model_id
            .or(self.default_model.as_deref())
            .ok_or_else(|| LlmError::InvalidRequest("no model requested and no default model configured".to_string()))?;

        let Some((provider_name, model)) = LlmConfig::split_model_id(model_id) else {
            return Err(LlmError::InvalidModelFormat(model_id.to_string()));
        };

        let provider = self
            .providers
            .get(provider_name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound(provider_name.to_string()))?;

        Ok((provider, model.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockProvider;

    #[test]
    fn resolves_default_and_explicit_models() {
        let registry = ProviderRegistry::empty(Some("mock/llama".to_string()))
            .with_provider("mock", Arc::new(MockProvider::default()));

        let (provider, model) = registry.resolve(None).unwrap();
        assert_eq!(provider.name(), "mock");
        assert_eq!(model, "llama");

        let (_, model) = registry.resolve(Some("mock/other")).unwrap();
        assert_eq!(model, "other");
    }

    #[test]
    fn bare_model_ids_are_rejected() {
        let registry = ProviderRegistry::empty(None).with_provider("mock", Arc::new(MockProvider::default()));

        assert!(matches!(
            registry.resolve(Some("llama")),
            Err(LlmError::InvalidModelFormat(_))
        ));
    }

    #[test]
    fn unknown_providers_are_rejected() {
        let registry = ProviderRegistry::empty(None);

        assert!(matches!(
            registry.resolve(Some("missing/llama")),
            Err(LlmError::ProviderNotFound(_))
        ));
    }
}
