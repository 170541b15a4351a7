//! Switchboard server library.
//!
//! Provides a reusable serve function wiring the event store, catalog,
//! execution pipeline, and conversation orchestrator behind the
//! authenticated control plane.

#![deny(missing_docs)]

mod auth;
mod error;
mod logger;
mod rate_limit;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::Router;
use config::Config;
use event_store::{EventStore, InMemoryBackend, Projector};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use logger::init as init_logger;
pub use state::AppState;

/// Configuration for serving Switchboard.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized switchboard TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the Switchboard server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("Switchboard {version}");

    let store = Arc::new(EventStore::new(Arc::new(InMemoryBackend::new())));
    let state = AppState::build(&config, store.clone());

    // Projections and cache invalidation drain the commit bus on their own
    // tasks for the life of the process.
    let projector = Projector::new(vec![
        state.catalog.read_model().clone(),
        state.orchestrator.read_model().clone(),
    ]);
    tokio::spawn(projector.run(store.subscribe()));
    tokio::spawn(state.caches.clone().run_invalidator(store.clone()));

    let cors = match &config.server.cors {
        Some(cors_config) => cors_layer(cors_config)?,
        None => CorsLayer::permissive(),
    };

    let auth = AuthLayer::new(config.server.oidc.clone());

    let app = Router::new()
        .merge(routes::router())
        .with_state(state.clone())
        .layer(
            tower::ServiceBuilder::new()
                .layer(cors)
                .layer(auth)
                .layer(rate_limit::RateLimitLayer::new(state.limits.clone())),
        );

    if !config.server.uses_oidc() {
        log::warn!("No OIDC provider configured; the control plane accepts unauthenticated callers");
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .map_err(|_| anyhow!("Failed to send back bound address"))?;
    }

    log::info!("Control plane: http://{listen_address}");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
            state.executor.plugins().shutdown().await;
        }
    }

    Ok(())
}

fn cors_layer(config: &config::CorsConfig) -> anyhow::Result<CorsLayer> {
    use http::Method;
    use http::header::{AUTHORIZATION, CONTENT_TYPE};
    use tower_http::cors::AllowOrigin;

    if config.allow_origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins: Result<Vec<_>, _> = config
        .allow_origins
        .iter()
        .map(|origin| origin.parse::<http::HeaderValue>())
        .collect();

    let layer = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins.map_err(|e| anyhow!("invalid CORS origin: {e}"))?))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(config.allow_credentials);

    Ok(layer)
}
