use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical tool identifier: `{source_id}:{operation_id}`.
///
/// The composite form is the only accepted identifier; bare operation ids
/// are rejected at every boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolId {
    source_id: String,
    operation_id: String,
}

impl ToolId {
    /// Builds a tool id from its parts.
    pub fn new(source_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            operation_id: operation_id.into(),
        }
    }

    /// The source owning this tool.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The operation within the source.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.operation_id)
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(':') {
            Some((source, operation)) if !source.is_empty() && !operation.is_empty() => {
                Ok(Self::new(source, operation))
            }
            _ => Err(format!(
                "tool id '{value}' must use the composite 'source_id:operation_id' form"
            )),
        }
    }
}

impl TryFrom<String> for ToolId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolId> for String {
    fn from(id: ToolId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display() {
        let id: ToolId = "weather:get_forecast".parse().unwrap();
        assert_eq!(id.source_id(), "weather");
        assert_eq!(id.operation_id(), "get_forecast");
        assert_eq!(id.to_string(), "weather:get_forecast");
    }

    #[test]
    fn bare_operation_ids_are_rejected() {
        assert!("get_forecast".parse::<ToolId>().is_err());
        assert!(":get_forecast".parse::<ToolId>().is_err());
        assert!("weather:".parse::<ToolId>().is_err());
    }

    #[test]
    fn extra_colons_belong_to_the_operation() {
        let id: ToolId = "svc:ns:op".parse().unwrap();
        assert_eq!(id.source_id(), "svc");
        assert_eq!(id.operation_id(), "ns:op");
    }
}
