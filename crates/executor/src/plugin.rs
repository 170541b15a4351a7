//! Plugin (MCP) transports: one long-lived client per source, reused across
//! calls, with liveness pings and lazy reconnection.
//!
//! Transport lifecycle: uninitialized → connecting → ready →
//! (closing → closed) | (degraded → closing → closed). Three consecutive
//! ping failures mark a transport degraded; the next use reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use catalog::{PluginLaunchConfig, PluginToolDescriptor, SourceDto};
use config::ExecutorConfig;
use dashmap::DashMap;
use rmcp::{
    RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult},
    service::RunningService,
    transport::{StreamableHttpClientTransport, TokioChildProcess},
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::ExecutorError;

const DEGRADED_PING_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum TransportState {
    Uninitialized = 0,
    Connecting = 1,
    Ready = 2,
    Degraded = 3,
    Closing = 4,
    Closed = 5,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Connecting,
            2 => TransportState::Ready,
            3 => TransportState::Degraded,
            4 => TransportState::Closing,
            5 => TransportState::Closed,
            _ => TransportState::Uninitialized,
        }
    }
}

/// Lock-free lifecycle state shared between the call path and the ping loop.
struct Liveness {
    state: AtomicU8,
    ping_failures: AtomicU32,
}

impl Liveness {
    fn new(state: TransportState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            ping_failures: AtomicU32::new(0),
        }
    }

    fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TransportState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Records one liveness probe. Three consecutive failures degrade a
    /// ready transport.
    fn record_ping(&self, ok: bool) -> TransportState {
        if ok {
            self.ping_failures.store(0, Ordering::Release);
            return self.state();
        }

        let failures = self.ping_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= DEGRADED_PING_FAILURES && self.state() == TransportState::Ready {
            self.set_state(TransportState::Degraded);
        }

        self.state()
    }
}

/// A live MCP client for one source.
pub struct PluginTransport {
    source_id: String,
    service: RunningService<RoleClient, ()>,
    liveness: Liveness,
}

impl PluginTransport {
    fn state(&self) -> TransportState {
        self.liveness.state()
    }

    fn set_state(&self, state: TransportState) {
        self.liveness.set_state(state);
    }

    fn record_ping(&self, ok: bool) {
        let before = self.state();
        let after = self.liveness.record_ping(ok);

        if before == TransportState::Ready && after == TransportState::Degraded {
            log::warn!(
                "plugin transport for '{}' degraded after {DEGRADED_PING_FAILURES} failed liveness pings",
                self.source_id
            );
        }
    }
}

/// Owns every plugin transport; one per source, connect/reconnect guarded by
/// a per-source mutex. `tools/call` itself is concurrent-safe on a
/// connected transport.
pub struct PluginTransports {
    config: ExecutorConfig,
    transports: DashMap<String, Arc<PluginTransport>>,
    connect_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginTransports {
    /// Creates an empty transport registry.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            transports: DashMap::new(),
            connect_locks: DashMap::new(),
        }
    }

    /// The ready transport for a source, connecting or reconnecting as
    /// needed.
    async fn get_or_connect(&self, source: &SourceDto) -> Result<Arc<PluginTransport>, ExecutorError> {
        if let Some(existing) = self.transports.get(&source.id)
            && existing.state() == TransportState::Ready
        {
            return Ok(existing.clone());
        }

        let lock = self
            .connect_locks
            .entry(source.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Someone else reconnected while we waited for the lock.
        if let Some(existing) = self.transports.get(&source.id)
            && existing.state() == TransportState::Ready
        {
            return Ok(existing.clone());
        }

        // Tear down a degraded transport before replacing it.
        if let Some((_, stale)) = self.transports.remove(&source.id) {
            stale.set_state(TransportState::Closing);
            if let Ok(service) = Arc::try_unwrap(stale).map(|transport| transport.service) {
                let _ = service.cancel().await;
            }
        }

        let transport = Arc::new(self.connect(source).await?);
        self.transports.insert(source.id.clone(), transport.clone());
        self.spawn_ping_loop(&transport);

        Ok(transport)
    }

    async fn connect(&self, source: &SourceDto) -> Result<PluginTransport, ExecutorError> {
        let Some(launch) = source.plugin.as_ref() else {
            return Err(ExecutorError::Transport {
                source_id: source.id.clone(),
                message: "source has no plugin launch configuration".to_string(),
            });
        };

        log::debug!("connecting plugin transport for source '{}'", source.id);

        let connect = async {
            match launch {
                PluginLaunchConfig::Stdio { cmd, env } => {
                    let Some((program, args)) = cmd.split_first() else {
                        return Err("plugin command is empty".to_string());
                    };

                    let mut command = tokio::process::Command::new(program);
                    command.args(args);
                    for (key, value) in env {
                        command.env(key, value);
                    }

                    let transport =
                        TokioChildProcess::new(command).map_err(|err| format!("spawning plugin: {err}"))?;

                    ().serve(transport)
                        .await
                        .map_err(|err| format!("initializing plugin session: {err}"))
                }
                PluginLaunchConfig::Http { url } => {
                    let transport = StreamableHttpClientTransport::from_uri(url.as_str());

                    ().serve(transport)
                        .await
                        .map_err(|err| format!("initializing remote session: {err}"))
                }
            }
        };

        let service = tokio::time::timeout(self.config.plugin_connect_timeout, connect)
            .await
            .map_err(|_| ExecutorError::Transport {
                source_id: source.id.clone(),
                message: format!("connect timed out after {:?}", self.config.plugin_connect_timeout),
            })?
            .map_err(|message| ExecutorError::Transport {
                source_id: source.id.clone(),
                message,
            })?;

        let transport = PluginTransport {
            source_id: source.id.clone(),
            service,
            liveness: Liveness::new(TransportState::Connecting),
        };
        transport.set_state(TransportState::Ready);

        log::info!("plugin transport for source '{}' is ready", source.id);
        Ok(transport)
    }

    fn spawn_ping_loop(&self, transport: &Arc<PluginTransport>) {
        let weak = Arc::downgrade(transport);
        let interval = self.config.plugin_ping_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(transport) = weak.upgrade() else { break };

                match transport.state() {
                    TransportState::Ready | TransportState::Degraded => {}
                    _ => break,
                }

                let alive = tokio::time::timeout(interval, transport.service.list_tools(Default::default()))
                    .await
                    .map(|result| result.is_ok())
                    .unwrap_or(false);

                transport.record_ping(alive);
            }
        });
    }

    /// Sends `tools/call` to the source's transport. A connection-level
    /// failure triggers one reconnect-and-retry before giving up.
    pub async fn call(
        &self,
        source: &SourceDto,
        tool_name: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> Result<CallToolResult, ExecutorError> {
        let params = CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };

        let transport = self.get_or_connect(source).await?;

        match tokio::time::timeout(timeout, transport.service.call_tool(params.clone())).await {
            Ok(Ok(result)) => Ok(result),
            Err(_) => Err(ExecutorError::Timeout(format!("{}:{tool_name}", source.id), timeout)),
            Ok(Err(err)) => {
                log::warn!(
                    "tools/call on '{}' failed ({err}), reconnecting and retrying once",
                    source.id
                );
                transport.set_state(TransportState::Degraded);

                let transport = self.get_or_connect(source).await?;
                match tokio::time::timeout(timeout, transport.service.call_tool(params)).await {
                    Ok(Ok(result)) => Ok(result),
                    Err(_) => Err(ExecutorError::Timeout(format!("{}:{tool_name}", source.id), timeout)),
                    Ok(Err(err)) => Err(ExecutorError::Transport {
                        source_id: source.id.clone(),
                        message: err.to_string(),
                    }),
                }
            }
        }
    }

    /// Lists the source's tools, normalized for catalog ingestion.
    pub async fn list_tools(&self, source: &SourceDto) -> Result<Vec<PluginToolDescriptor>, ExecutorError> {
        let transport = self.get_or_connect(source).await?;

        let listed = transport
            .service
            .list_tools(Default::default())
            .await
            .map_err(|err| ExecutorError::Transport {
                source_id: source.id.clone(),
                message: format!("tools/list failed: {err}"),
            })?;

        Ok(listed
            .tools
            .into_iter()
            .map(|tool| PluginToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|description| description.to_string()),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    /// Closes every transport. Called on shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.transports.iter().map(|entry| entry.key().clone()).collect();

        for id in ids {
            if let Some((_, transport)) = self.transports.remove(&id) {
                transport.set_state(TransportState::Closing);
                if let Ok(service) = Arc::try_unwrap(transport).map(|transport| transport.service) {
                    let _ = service.cancel().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            TransportState::Uninitialized,
            TransportState::Connecting,
            TransportState::Ready,
            TransportState::Degraded,
            TransportState::Closing,
            TransportState::Closed,
        ] {
            assert_eq!(TransportState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn degradation_requires_three_consecutive_failures() {
        let liveness = Liveness::new(TransportState::Ready);

        // A success resets the streak.
        liveness.record_ping(false);
        liveness.record_ping(false);
        liveness.record_ping(true);
        liveness.record_ping(false);
        assert_eq!(liveness.record_ping(false), TransportState::Ready);

        assert_eq!(liveness.record_ping(false), TransportState::Degraded);
    }

    #[test]
    fn closing_transport_does_not_degrade() {
        let liveness = Liveness::new(TransportState::Closing);

        for _ in 0..5 {
            liveness.record_ping(false);
        }
        assert_eq!(liveness.state(), TransportState::Closing);
    }
}
