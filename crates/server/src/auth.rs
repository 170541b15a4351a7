//! OIDC bearer authentication for the control plane.

mod error;
mod jwks;
mod jwt;
mod layer;

pub(crate) use layer::AuthLayer;

type AuthResult<T> = Result<T, error::AuthError>;
