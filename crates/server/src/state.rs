//! Shared application state threaded through every handler.

use std::sync::Arc;

use catalog::{CatalogCaches, CatalogReadModel, CatalogService};
use config::Config;
use event_store::EventStore;
use executor::{PluginTransports, TokenExchanger, ToolExecutor};
use llm::ProviderRegistry;
use orchestrator::{ConversationReadModel, Orchestrator};

/// Everything a request handler can reach: no module-level singletons,
/// state is built once at startup and cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// The tool catalog's command and query surface.
    pub catalog: CatalogService,
    /// Advisory catalog caches, invalidated from the commit bus.
    pub caches: Arc<CatalogCaches>,
    /// The tool execution pipeline.
    pub executor: Arc<ToolExecutor>,
    /// The conversation runtime.
    pub orchestrator: Arc<Orchestrator>,
    pub(crate) limits: Arc<crate::rate_limit::Limits>,
}

impl AppState {
    /// Wires the full component graph over one event store.
    pub fn build(config: &Config, store: Arc<EventStore>) -> Self {
        let catalog_read_model = Arc::new(CatalogReadModel::new(store.clone()));
        let caches = Arc::new(CatalogCaches::new(&config.catalog));
        let catalog = CatalogService::new(store.clone(), catalog_read_model.clone(), caches.clone());

        let exchanger = {
            // Without an identity provider, exchange targets a placeholder
            // that every call will fail against; sources must then use
            // passthrough or no auth.
            let token_url = config
                .server
                .oidc
                .as_ref()
                .map(|oidc| oidc.token_url.clone())
                .unwrap_or_else(|| {
                    "http://127.0.0.1:0/token"
                        .parse()
                        .expect("static placeholder URL is valid")
                });

            TokenExchanger::new(reqwest::Client::new(), token_url, config.executor.token_cache_ttl)
        };

        let plugins = Arc::new(PluginTransports::new(config.executor.clone()));
        let executor = Arc::new(ToolExecutor::new(
            config.executor.clone(),
            catalog_read_model.clone(),
            catalog.resolver().clone(),
            exchanger,
            plugins,
        ));

        let providers = Arc::new(ProviderRegistry::from_config(&config.llm));
        if providers.is_empty() {
            log::warn!("No LLM providers configured; chat turns will fail until one is added");
        }

        let limits = Arc::new(crate::rate_limit::Limits::new(&config.server.rate_limits));

        let conversation_read_model = Arc::new(ConversationReadModel::new(store.clone()));
        let orchestrator = Orchestrator::new(
            config.agent.clone(),
            store,
            conversation_read_model,
            catalog_read_model,
            catalog.resolver().clone(),
            executor.clone(),
            providers,
            Some(limits.clone() as Arc<dyn orchestrator::TurnQuota>),
        );

        Self {
            catalog,
            caches,
            executor,
            orchestrator,
            limits,
        }
    }
}
