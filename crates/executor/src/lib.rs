//! The tool execution pipeline: argument validation, delegated identity,
//! transport dispatch, and unified result shaping.
//!
//! This crate is the only code that holds and delegates the caller's
//! credential. Execution follows four phases in order: lookup, schema
//! validation, token exchange, dispatch.

mod error;
mod exchange;
mod http;
mod outcome;
mod pipeline;
mod plugin;
mod validation;

pub use error::ExecutorError;
pub use exchange::TokenExchanger;
pub use outcome::{ExecutionOutcome, ExecutionStatus};
pub use pipeline::{ExecuteOptions, ToolExecutor};
pub use plugin::PluginTransports;
pub use validation::validate_arguments;
