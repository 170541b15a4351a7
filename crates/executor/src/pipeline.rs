//! The execution pipeline: lookup → access → schema validation → delegated
//! identity → dispatch → result shaping.

use std::sync::Arc;
use std::time::Duration;

use catalog::{AccessResolver, AuthMode, CatalogReadModel, ExecutionMode, SourceDto, SourceToolDto, ToolId};
use config::ExecutorConfig;
use context::CallerToken;
use secrecy::SecretString;
use serde_json::Value;

use crate::{
    ExecutionOutcome, ExecutionStatus, ExecutorError, PluginTransports, TokenExchanger, http, validate_arguments,
};

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Overrides the configured schema-validation default.
    pub validate_arguments: Option<bool>,
}

/// Executes tool calls on the caller's behalf. The only component that
/// holds and delegates the caller's credential.
pub struct ToolExecutor {
    config: ExecutorConfig,
    read_model: Arc<CatalogReadModel>,
    resolver: AccessResolver,
    exchanger: TokenExchanger,
    plugins: Arc<PluginTransports>,
    http: reqwest::Client,
}

impl ToolExecutor {
    /// Creates the executor over shared catalog state.
    pub fn new(
        config: ExecutorConfig,
        read_model: Arc<CatalogReadModel>,
        resolver: AccessResolver,
        exchanger: TokenExchanger,
        plugins: Arc<PluginTransports>,
    ) -> Self {
        Self {
            config,
            read_model,
            resolver,
            exchanger,
            plugins,
            http: reqwest::Client::new(),
        }
    }

    /// The plugin transport registry, shared with inventory refresh.
    pub fn plugins(&self) -> &Arc<PluginTransports> {
        &self.plugins
    }

    /// Executes one tool call.
    ///
    /// Upstream rejections shape into a failed [`ExecutionOutcome`]; errors
    /// are reserved for calls that never reached the upstream.
    pub async fn execute(
        &self,
        tool_id: &ToolId,
        arguments: &Value,
        caller: &CallerToken,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let (tool, source) = self.lookup(tool_id)?;

        if !self.resolver.can_access(caller.claims(), tool_id) {
            return Err(ExecutorError::Forbidden(tool_id.to_string()));
        }

        let validate = options.validate_arguments.unwrap_or(self.config.validate_arguments);
        if validate {
            validate_arguments(&tool.definition.input_schema, arguments)?;
        }

        let bearer = self.delegated_credential(&tool, &source, caller).await?;

        let timeout = tool
            .definition
            .execution
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_tool_timeout);

        match tool.definition.execution.mode.clone() {
            ExecutionMode::Http { method, path } => {
                let Some(base_url) = source.base_url.as_ref() else {
                    return Err(ExecutorError::Internal(format!(
                        "source '{}' has no base URL for HTTP dispatch",
                        source.id
                    )));
                };

                http::dispatch(
                    &self.http,
                    &tool,
                    base_url,
                    method,
                    &path,
                    arguments,
                    bearer.as_ref(),
                    timeout,
                )
                .await
            }
            ExecutionMode::Plugin { tool_name } => {
                let started = std::time::Instant::now();
                let result = self.plugins.call(&source, &tool_name, arguments, timeout).await?;

                let is_error = result.is_error.unwrap_or(false);
                let content = serde_json::to_value(&result.content)
                    .map_err(|err| ExecutorError::Internal(format!("unserializable plugin result: {err}")))?;

                Ok(ExecutionOutcome {
                    tool_id: tool_id.clone(),
                    status: if is_error {
                        ExecutionStatus::Failed
                    } else {
                        ExecutionStatus::Completed
                    },
                    error: is_error.then(|| "plugin reported an error result".to_string()),
                    result: Some(content),
                    upstream_status: None,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    fn lookup(&self, tool_id: &ToolId) -> Result<(SourceToolDto, SourceDto), ExecutorError> {
        let tool = self
            .read_model
            .tool(tool_id)
            .ok_or_else(|| ExecutorError::NotFound(tool_id.to_string()))?;

        if !tool.is_resolvable() {
            return Err(ExecutorError::Disabled(tool_id.to_string()));
        }

        let source = self
            .read_model
            .source(&tool.source_id)
            .ok_or_else(|| ExecutorError::NotFound(tool_id.to_string()))?;

        if !source.enabled {
            return Err(ExecutorError::Disabled(tool_id.to_string()));
        }

        Ok((tool, source))
    }

    /// Resolves the credential forwarded to the upstream: an exchanged
    /// token when the source delegates identity and an audience is known,
    /// the raw caller token otherwise.
    async fn delegated_credential(
        &self,
        tool: &SourceToolDto,
        source: &SourceDto,
        caller: &CallerToken,
    ) -> Result<Option<SecretString>, ExecutorError> {
        match source.auth_mode {
            AuthMode::None => Ok(None),
            AuthMode::Passthrough => Ok(Some(caller.raw.clone())),
            AuthMode::TokenExchange => {
                let audience = tool
                    .definition
                    .execution
                    .required_audience
                    .as_deref()
                    .or(source.default_audience.as_deref());

                // No audience to exchange for: forward the raw token.
                let Some(audience) = audience else {
                    return Ok(Some(caller.raw.clone()));
                };

                let subject = caller.subject().unwrap_or_default();
                let token = self
                    .exchanger
                    .exchange(subject, &caller.raw, audience, &source.required_scopes)
                    .await?;

                Ok(Some(token))
            }
        }
    }
}
