//! Caller identity shared between the server layers, the access resolver,
//! and the tool execution pipeline.

mod authentication;

pub use authentication::{Authentication, CallerToken, Claims};
