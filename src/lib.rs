//! XAA Broker Library
//!
//! Chained OAuth token exchange for agent workloads: validate an end user's
//! identity token, exchange it for an identity assertion recognized by the
//! org, then trade that assertion for resource-scoped access tokens — or for
//! federated third-party credentials held in a token vault.
//!
//! # Flow
//!
//! ```text
//! identity token
//!   -> IdTokenValidator::validate        (signature, issuer, audience, expiry)
//!   -> TokenExchanger::exchange_for_assertion    (JWT-bearer grant, org AS)
//!   -> TokenExchanger::exchange_for_scoped_token (token-exchange grant, resource AS)
//!      or TokenVault::exchange_assertion_for_access / linked_provider_credential
//!   -> ScopeSet::has                     (gate individual operations)
//! ```
//!
//! The [`Broker`] facade wires the pieces together for callers that just
//! need "access or a reason why not". Scoped access tokens are re-derived
//! per call by design; the only process-wide caches are the JWKS key set and
//! the vault management credential, each owned by its component.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod vault;

pub use access::{GroupAccessPolicy, ScopeSet};
pub use auth::{AuthError, UserIdentity};
pub use broker::{Broker, ResourceAccess};
pub use error::{Error, Result};
pub use vault::VaultError;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
