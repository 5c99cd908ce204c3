//! Vault client: management credential, delegated access, and linked
//! provider credential lookup.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::VaultError;
use crate::auth::exchange::{
    AccessDenied, GRANT_TYPE_TOKEN_EXCHANGE, SUBJECT_TOKEN_TYPE_ID_TOKEN,
};
use crate::config::VaultConfig;

/// Scopes requested with the delegated vault access exchange.
const VAULT_ACCESS_SCOPES: &str = "read:users read:user_idp_tokens";

/// Scopes requested in the interactive account-linking flow.
const CONNECT_SCOPES: &str = "openid profile email offline_access";

/// Safety margin subtracted from the management credential lifetime.
const EXPIRY_MARGIN_SECS: u64 = 60;

/// Default management credential lifetime when the grant omits `expires_in`.
const DEFAULT_LIFETIME_SECS: u64 = 86_400;

/// Cached management credential.
struct ManagementCredential {
    token: String,
    expires_at: u64,
}

impl ManagementCredential {
    fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }
}

/// Outcome of the delegated vault access exchange.
#[derive(Debug)]
pub enum VaultAccessOutcome {
    /// The vault granted delegated access.
    Granted(VaultAccessGrant),
    /// The vault declined the exchange — expected for users without vault
    /// linkage.
    Denied(AccessDenied),
}

impl VaultAccessOutcome {
    /// Whether the exchange produced a vault access token.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Delegated vault access grant.
#[derive(Debug, Clone)]
pub struct VaultAccessGrant {
    /// The vault access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Lifetime in seconds, when reported
    pub expires_in: Option<u64>,
}

/// Outcome of a linked provider credential lookup.
#[derive(Debug)]
pub enum ProviderCredentialOutcome {
    /// A usable third-party credential was found.
    Connected(ProviderCredential),
    /// No usable credential; the reason is user-presentable.
    Denied(CredentialDenial),
}

impl ProviderCredentialOutcome {
    /// Whether a usable credential was found.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// A third-party credential read from the vault.
#[derive(Debug, Clone)]
pub struct ProviderCredential {
    /// Third-party access token
    pub access_token: String,
    /// Third-party refresh token, when stored
    pub refresh_token: Option<String>,
    /// Instance URL of the third-party tenant, from configuration
    pub instance_url: Option<String>,
}

/// Distinct, user-presentable reasons a provider credential lookup can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialDenial {
    /// The vault user record could not be read.
    UserNotFound,
    /// The user exists but has no linked account for the configured provider.
    ProviderNotConnected,
    /// A linked account exists but holds no access token (e.g. consent was
    /// never completed).
    NoTokenAvailable,
}

impl CredentialDenial {
    /// Machine-readable reason code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::UserNotFound => "user_not_found",
            Self::ProviderNotConnected => "provider_not_connected",
            Self::NoTokenAvailable => "no_token_available",
        }
    }

    /// User-presentable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::UserNotFound => "Could not find the user in the token vault",
            Self::ProviderNotConnected => "No account is linked for the configured provider",
            Self::NoTokenAvailable => "The linked account has no stored access token",
        }
    }
}

impl std::fmt::Display for CredentialDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Token endpoint response for both vault grants.
#[derive(Debug, Deserialize)]
struct VaultTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A vault user record returned by the search API.
#[derive(Debug, Deserialize)]
struct VaultUserRecord {
    #[serde(default)]
    user_id: Option<String>,
}

/// The identities portion of a vault user record.
#[derive(Debug, Default, Deserialize)]
struct VaultUserIdentities {
    #[serde(default)]
    identities: Vec<LinkedIdentity>,
}

/// A linked third-party identity stored in a vault user record.
#[derive(Debug, Deserialize)]
struct LinkedIdentity {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Client for the federated token vault.
pub struct TokenVault {
    http: reqwest::Client,
    config: VaultConfig,
    management: RwLock<Option<ManagementCredential>>,
}

impl TokenVault {
    /// Create a vault client over a shared HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, config: VaultConfig) -> Self {
        Self {
            http,
            config,
            management: RwLock::new(None),
        }
    }

    /// Return the workload-wide management credential, fetching via the
    /// client-credentials grant when the cached one is missing or within the
    /// expiry margin.
    ///
    /// # Errors
    ///
    /// [`VaultError::AuthFailed`] on a non-success grant response — fatal,
    /// since nothing downstream can proceed without it.
    pub async fn management_credential(&self) -> Result<String, VaultError> {
        {
            let cached = self.management.read();
            if let Some(credential) = cached.as_ref() {
                if !credential.is_expired() {
                    return Ok(credential.token.clone());
                }
            }
        }

        debug!("Fetching vault management credential");
        let response = self
            .http
            .post(self.config.token_endpoint())
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.config.client_id,
                "client_secret": self.config.resolve_client_secret().unwrap_or_default(),
                "audience": self.config.management_audience(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Vault management grant rejected");
            return Err(VaultError::AuthFailed {
                status: status.as_u16(),
                body,
            });
        }

        let body: VaultTokenResponse = response.json().await?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        let credential = ManagementCredential {
            token: body.access_token.clone(),
            expires_at: unix_now() + expires_in.saturating_sub(EXPIRY_MARGIN_SECS),
        };
        *self.management.write() = Some(credential);

        info!(expires_in, "Vault management credential refreshed");
        Ok(body.access_token)
    }

    /// Exchange an identity assertion token for delegated vault access.
    ///
    /// This keeps the workload identity in the assertion's actor claim for
    /// audit purposes. A non-success response — or a transport failure,
    /// treated identically — is an expected outcome for users without vault
    /// linkage and is returned as [`VaultAccessOutcome::Denied`].
    pub async fn exchange_assertion_for_access(
        &self,
        identity_assertion: &str,
    ) -> VaultAccessOutcome {
        let client_secret = self.config.resolve_client_secret().unwrap_or_default();
        let audience = self.config.management_audience();

        let params = [
            ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE),
            ("subject_token", identity_assertion),
            ("subject_token_type", SUBJECT_TOKEN_TYPE_ID_TOKEN),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("audience", audience.as_str()),
            ("scope", VAULT_ACCESS_SCOPES),
        ];

        let response = match self
            .http
            .post(self.config.token_endpoint())
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Vault access exchange unreachable");
                return VaultAccessOutcome::Denied(AccessDenied::transport(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let denial = AccessDenied::from_response(status, &body);
            info!(status = status.as_u16(), error = %denial.error, "Vault access exchange denied");
            return VaultAccessOutcome::Denied(denial);
        }

        match response.json::<VaultTokenResponse>().await {
            Ok(body) => VaultAccessOutcome::Granted(VaultAccessGrant {
                access_token: body.access_token,
                token_type: body.token_type.unwrap_or_else(|| "Bearer".to_string()),
                expires_in: body.expires_in,
            }),
            Err(e) => VaultAccessOutcome::Denied(AccessDenied::transport(&e)),
        }
    }

    /// Find the vault-side user id for an identity-provider subject.
    ///
    /// Users are federated into the vault, so the lookup searches vault user
    /// records for an identity whose provider-side subject matches. Returns
    /// `Ok(None)` when no record matches — "user not yet known to the vault"
    /// is a normal state, not a failure — and on non-success search
    /// responses.
    pub async fn resolve_user_id(
        &self,
        source_subject: &str,
    ) -> Result<Option<String>, VaultError> {
        let token = self.management_credential().await?;

        let query = format!(r#"identities.user_id:"{source_subject}""#);
        let response = self
            .http
            .get(self.config.users_endpoint())
            .bearer_auth(&token)
            .query(&[("q", query.as_str()), ("search_engine", "v3")])
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "Vault user search failed");
            return Ok(None);
        }

        let records: Vec<VaultUserRecord> = response.json().await?;
        Ok(records.into_iter().find_map(|record| record.user_id))
    }

    /// Read the linked third-party credential for a vault user.
    ///
    /// Pass `access_token` to use a delegated vault credential; otherwise
    /// the management credential is used. Denial reasons, in priority
    /// order: [`CredentialDenial::UserNotFound`],
    /// [`CredentialDenial::ProviderNotConnected`],
    /// [`CredentialDenial::NoTokenAvailable`].
    pub async fn linked_provider_credential(
        &self,
        vault_user_id: &str,
        access_token: Option<&str>,
    ) -> Result<ProviderCredentialOutcome, VaultError> {
        let token = match access_token {
            Some(token) => token.to_string(),
            None => self.management_credential().await?,
        };

        let response = self
            .http
            .get(format!("{}/{vault_user_id}", self.config.users_endpoint()))
            .bearer_auth(&token)
            .query(&[("fields", "identities"), ("include_fields", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            debug!(
                status = response.status().as_u16(),
                "Vault user record lookup failed"
            );
            return Ok(ProviderCredentialOutcome::Denied(
                CredentialDenial::UserNotFound,
            ));
        }

        let record: VaultUserIdentities = response.json().await.unwrap_or_default();
        Ok(select_provider_credential(
            &record.identities,
            &self.config.connection,
            self.config.instance_url.as_deref(),
        ))
    }

    /// Whether the vault user has a usable credential for the configured
    /// provider.
    pub async fn check_provider_connection(&self, vault_user_id: &str) -> Result<bool, VaultError> {
        let outcome = self.linked_provider_credential(vault_user_id, None).await?;
        Ok(outcome.is_connected())
    }

    /// Build the authorization URL that starts the interactive flow linking
    /// a third-party account into the vault.
    pub fn connection_auth_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<String, VaultError> {
        let mut auth_url = url::Url::parse(&self.config.authorize_endpoint())?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("response_type", "code");
            params.append_pair("connection", &self.config.connection);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("scope", CONNECT_SCOPES);
            if let Some(state) = state {
                params.append_pair("state", state);
            }
        }

        Ok(auth_url.to_string())
    }
}

/// Locate the configured provider's credential in a linked-identity list.
fn select_provider_credential(
    identities: &[LinkedIdentity],
    connection: &str,
    instance_url: Option<&str>,
) -> ProviderCredentialOutcome {
    let Some(identity) = identities
        .iter()
        .find(|identity| identity.provider.as_deref() == Some(connection))
    else {
        return ProviderCredentialOutcome::Denied(CredentialDenial::ProviderNotConnected);
    };

    match identity.access_token.as_deref() {
        Some(access_token) if !access_token.is_empty() => {
            ProviderCredentialOutcome::Connected(ProviderCredential {
                access_token: access_token.to_string(),
                refresh_token: identity.refresh_token.clone(),
                instance_url: instance_url.map(ToString::to_string),
            })
        }
        _ => ProviderCredentialOutcome::Denied(CredentialDenial::NoTokenAvailable),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn identity(provider: &str, access_token: Option<&str>) -> LinkedIdentity {
        LinkedIdentity {
            provider: Some(provider.to_string()),
            access_token: access_token.map(ToString::to_string),
            refresh_token: None,
        }
    }

    #[test]
    fn select_finds_matching_provider() {
        let identities = vec![
            identity("google-oauth2", Some("g-token")),
            identity("salesforce", Some("sf-token")),
        ];

        let outcome = select_provider_credential(&identities, "salesforce", Some("https://sf"));
        match outcome {
            ProviderCredentialOutcome::Connected(credential) => {
                assert_eq!(credential.access_token, "sf-token");
                assert_eq!(credential.instance_url.as_deref(), Some("https://sf"));
            }
            ProviderCredentialOutcome::Denied(reason) => panic!("denied: {reason}"),
        }
    }

    #[test]
    fn select_denies_when_provider_absent() {
        let identities = vec![identity("google-oauth2", Some("g-token"))];

        let outcome = select_provider_credential(&identities, "salesforce", None);
        assert!(matches!(
            outcome,
            ProviderCredentialOutcome::Denied(CredentialDenial::ProviderNotConnected)
        ));
    }

    #[test]
    fn select_denies_when_token_missing() {
        let identities = vec![identity("salesforce", None)];

        let outcome = select_provider_credential(&identities, "salesforce", None);
        assert!(matches!(
            outcome,
            ProviderCredentialOutcome::Denied(CredentialDenial::NoTokenAvailable)
        ));
    }

    #[test]
    fn select_treats_empty_token_as_missing() {
        let identities = vec![identity("salesforce", Some(""))];

        let outcome = select_provider_credential(&identities, "salesforce", None);
        assert!(matches!(
            outcome,
            ProviderCredentialOutcome::Denied(CredentialDenial::NoTokenAvailable)
        ));
    }

    #[test]
    fn denial_reasons_stay_distinct() {
        assert_eq!(CredentialDenial::UserNotFound.code(), "user_not_found");
        assert_eq!(
            CredentialDenial::ProviderNotConnected.code(),
            "provider_not_connected"
        );
        assert_eq!(CredentialDenial::NoTokenAvailable.code(), "no_token_available");
    }

    #[test]
    fn management_credential_expiry_applies_margin() {
        let credential = ManagementCredential {
            token: "mgmt".to_string(),
            expires_at: unix_now() + 100,
        };
        assert!(!credential.is_expired());

        let expired = ManagementCredential {
            token: "mgmt".to_string(),
            expires_at: unix_now(),
        };
        assert!(expired.is_expired());
    }

    #[test]
    fn connection_auth_url_carries_linking_params() {
        let vault = TokenVault::new(
            reqwest::Client::new(),
            VaultConfig {
                domain: "acme.us.auth0.com".to_string(),
                client_id: "vault-client".to_string(),
                ..VaultConfig::default()
            },
        );

        let url = vault
            .connection_auth_url("https://app.acme.com/callback", Some("user-42"))
            .unwrap();

        assert!(url.starts_with("https://acme.us.auth0.com/authorize?"));
        assert!(url.contains("client_id=vault-client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("connection=salesforce"));
        assert!(url.contains("state=user-42"));
        assert!(url.contains("offline_access"));
    }
}
