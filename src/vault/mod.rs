//! Federated token vault access.
//!
//! The vault is a second, independent trust domain storing linked
//! third-party credentials (access/refresh token pairs) against its own user
//! records. This module covers both vault access paths:
//!
//! - the **management plane**: a workload-wide client-credentials credential,
//!   cached process-wide with a safety margin — the only request-independent
//!   state in the broker — used to search vault user records and read linked
//!   credentials;
//! - the **delegated plane**: a token-exchange grant presenting the identity
//!   assertion token, which preserves the workload's actor claim for audit.
//!
//! "User not yet known to the vault" and "no linked account" are normal
//! states here, reported as distinct, user-presentable denial reasons rather
//! than errors.

pub mod client;

pub use client::{
    CredentialDenial, ProviderCredential, ProviderCredentialOutcome, TokenVault,
    VaultAccessGrant, VaultAccessOutcome,
};

/// Error variants for vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The vault rejected the management client-credentials grant. Fatal:
    /// nothing downstream can proceed without the management credential.
    #[error("vault management authentication failed: HTTP {status}")]
    AuthFailed {
        /// Upstream HTTP status
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// A vault URL could not be constructed.
    #[error("invalid vault URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Network or HTTP transport error.
    #[error("vault API error: {0}")]
    Http(#[from] reqwest::Error),
}
