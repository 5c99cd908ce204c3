//! Identity verification and delegated token exchange.
//!
//! This module implements the workload side of the identity-assertion
//! exchange flow:
//!
//! 1. **Validation**: an inbound end-user identity token is verified against
//!    the org's published signing keys ([`IdTokenValidator`], backed by the
//!    TTL-cached [`JwksCache`]).
//! 2. **Client assertion**: the workload proves its own identity to a token
//!    endpoint with a short-lived signed JWT ([`AssertionSigner`]) — a fresh
//!    assertion per exchange call, never reused.
//! 3. **Exchange**: the identity token is traded for an identity assertion
//!    at the org AS, then the assertion for a resource-scoped access token
//!    at a custom AS ([`TokenExchanger`]).
//!
//! Failure policy is asymmetric by design: the first exchange is a
//! precondition for all subsequent work and fails loudly
//! ([`AuthError::ExchangeFailed`]); the second is a routine per-resource
//! authorization decision and returns a structured
//! [`ScopedTokenOutcome::Denied`](exchange::ScopedTokenOutcome) instead.

pub mod assertion;
pub mod exchange;
pub mod jwks;
pub mod validator;

pub use assertion::AssertionSigner;
pub use exchange::{AccessDenied, AccessGrant, ScopedTokenOutcome, TokenExchanger};
pub use jwks::JwksCache;
pub use validator::{IdTokenValidator, UserIdentity};

/// Error variants for identity validation and token exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Signature, issuer, or audience check failed.
    #[error("invalid token: {0}")]
    TokenInvalid(String),

    /// The token's expiry claim is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// The `kid` in the token header is not present in the cached key set.
    #[error("invalid token: signing key {0} not found in key set")]
    KeyNotFound(String),

    /// No workload private key is configured. Misconfiguration, surfaced at
    /// first use.
    #[error("workload signing key not configured")]
    SigningKeyMissing,

    /// Signing the client assertion failed.
    #[error("failed to sign client assertion: {0}")]
    AssertionSigning(String),

    /// The org AS rejected the identity assertion exchange. Fatal for the
    /// calling operation.
    #[error("identity assertion exchange failed: {error}: {error_description}")]
    ExchangeFailed {
        /// Upstream OAuth error code
        error: String,
        /// Upstream human-readable description
        error_description: String,
    },

    /// Network or HTTP transport error.
    #[error("token endpoint error: {0}")]
    Http(#[from] reqwest::Error),
}
