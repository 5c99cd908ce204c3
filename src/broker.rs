//! Broker facade — central coordinator for delegated authorization.
//!
//! Wires the validator, exchanger, vault client, and fallback policy behind
//! the three calls the orchestrator and resource routers actually make:
//! [`Broker::validate`], [`Broker::resource_access`], and
//! [`Broker::provider_credential`].
//!
//! Scoped access tokens are re-derived on every call — nothing per-user or
//! per-request is cached here. The only process-wide state lives inside the
//! two components that own it: the JWKS cache and the vault management
//! credential.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::access::{GroupAccessPolicy, ScopeSet};
use crate::auth::exchange::{AccessDenied, ScopedTokenOutcome};
use crate::auth::{AssertionSigner, AuthError, IdTokenValidator, JwksCache, TokenExchanger, UserIdentity};
use crate::config::Config;
use crate::vault::{CredentialDenial, ProviderCredentialOutcome, TokenVault};
use crate::{Error, Result};

/// Resource access derived for a validated user.
#[derive(Debug, Serialize)]
pub struct ResourceAccess {
    /// Whether any access was granted
    pub authorized: bool,
    /// Granted scopes — authoritative, possibly a subset of the request
    pub scopes: ScopeSet,
    /// Denial detail when the exchange was declined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<AccessDenied>,
}

impl ResourceAccess {
    fn denied(denial: Option<AccessDenied>) -> Self {
        Self {
            authorized: false,
            scopes: ScopeSet::new(),
            denial,
        }
    }
}

/// Central coordinator for the token-exchange pipeline.
pub struct Broker {
    config: Config,
    validator: IdTokenValidator,
    exchanger: TokenExchanger,
    vault: TokenVault,
    fallback: GroupAccessPolicy,
}

impl Broker {
    /// Build a broker from configuration.
    ///
    /// Constructs one shared HTTP client (bounded timeout on every outbound
    /// call) and hands it to each component.
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        let jwks = Arc::new(JwksCache::new(http.clone(), config.org.jwks_uri()));
        let validator = IdTokenValidator::new(
            jwks,
            config.org.issuer_url(),
            config.org.client_id.clone(),
        );

        let signer = Arc::new(AssertionSigner::new(
            config.workload.client_id.clone(),
            config.org.token_endpoint(),
            config.workload.resolve_private_key().as_deref(),
        )?);
        let exchanger = TokenExchanger::new(http.clone(), config.org.clone(), signer);

        let vault = TokenVault::new(http, config.vault.clone());
        let fallback = GroupAccessPolicy::from_config(&config.access);

        Ok(Self {
            config,
            validator,
            exchanger,
            vault,
            fallback,
        })
    }

    /// Validate an inbound identity token.
    pub async fn validate(&self, raw_token: &str) -> std::result::Result<UserIdentity, AuthError> {
        self.validator.validate(raw_token).await
    }

    /// Derive the caller's resource access from an already-validated raw
    /// identity token.
    ///
    /// With a resource AS configured this runs the full two-hop exchange;
    /// exchange denials (step 1 or step 2) come back as an unauthorized
    /// [`ResourceAccess`] carrying the reason. Without one, access degrades
    /// to the group-membership fallback policy.
    pub async fn resource_access(&self, raw_token: &str) -> Result<ResourceAccess> {
        let identity = self.validator.validate(raw_token).await?;

        let Some(auth_server_id) = self.config.resource.auth_server_id.as_deref() else {
            return Ok(match self.fallback.evaluate(&identity.groups) {
                Some(scopes) => ResourceAccess {
                    authorized: true,
                    scopes,
                    denial: None,
                },
                None => ResourceAccess::denied(None),
            });
        };

        let assertion = match self.exchanger.exchange_for_assertion(raw_token).await {
            Ok(assertion) => assertion,
            Err(AuthError::ExchangeFailed {
                error,
                error_description,
            }) => {
                warn!(sub = %identity.sub, error = %error, "Assertion exchange denied");
                return Ok(ResourceAccess::denied(Some(AccessDenied {
                    error,
                    error_description: Some(error_description),
                })));
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = self
            .exchanger
            .exchange_for_scoped_token(&assertion, auth_server_id, &self.config.resource.scopes)
            .await?;

        Ok(match outcome {
            ScopedTokenOutcome::Granted(grant) => ResourceAccess {
                authorized: true,
                scopes: grant.scope,
                denial: None,
            },
            ScopedTokenOutcome::Denied(denial) => ResourceAccess::denied(Some(denial)),
        })
    }

    /// Look up the validated user's linked third-party credential in the
    /// vault.
    pub async fn provider_credential(
        &self,
        identity: &UserIdentity,
    ) -> Result<ProviderCredentialOutcome> {
        let Some(vault_user_id) = self.vault.resolve_user_id(&identity.sub).await? else {
            return Ok(ProviderCredentialOutcome::Denied(
                CredentialDenial::UserNotFound,
            ));
        };

        Ok(self
            .vault
            .linked_provider_credential(&vault_user_id, None)
            .await?)
    }

    /// The token exchanger, for callers composing the exchange steps
    /// directly.
    #[must_use]
    pub fn exchanger(&self) -> &TokenExchanger {
        &self.exchanger
    }

    /// The vault client.
    #[must_use]
    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
