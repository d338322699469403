use thiserror::Error;

/// Errors surfaced by the session manager and the view builder. None of them
/// are retried internally.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed token, bad signature, or signed with the other secret.
    #[error("token is invalid")]
    TokenInvalid,

    /// Well-formed and correctly signed, but past its expiry.
    #[error("token has expired")]
    TokenExpired,

    /// The refresh token was superseded by a later rotation or cleared.
    #[error("session has been revoked")]
    SessionRevoked,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("password hashing failed")]
    Hashing,
}

impl CoreError {
    /// True for every failure that should send the caller back to login.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenInvalid | Self::TokenExpired | Self::SessionRevoked | Self::InvalidCredentials
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
