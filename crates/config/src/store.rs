//! Event store configuration.

use serde::Deserialize;

/// Event store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store. Durable only for the process lifetime; suitable for
    /// development and single-replica deployments.
    #[default]
    Memory,
}

/// Configuration for aggregate event persistence.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Which backend stores aggregate event streams.
    pub backend: StoreBackend,
}
