#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("Internal server error")]
    Internal,
}
