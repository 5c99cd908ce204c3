//! Error types for the XAA broker

use thiserror::Error;

use crate::auth::AuthError;
use crate::vault::VaultError;

/// Result type alias for the XAA broker
pub type Result<T> = std::result::Result<T, Error>;

/// Broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity token validation or exchange failure
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Token vault failure
    #[error("Token vault error: {0}")]
    Vault(#[from] VaultError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error should surface to callers as an authentication
    /// failure (HTTP 401 class) rather than an internal fault.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Auth(
                AuthError::TokenInvalid(_)
                    | AuthError::TokenExpired
                    | AuthError::KeyNotFound(_)
                    | AuthError::ExchangeFailed { .. }
            )
        )
    }
}
