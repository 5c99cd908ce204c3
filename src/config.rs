//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Identity provider org authorization server
    pub org: OrgConfig,
    /// Workload (agent) identity used for client assertions
    pub workload: WorkloadConfig,
    /// Resource-specific custom authorization server
    pub resource: ResourceConfig,
    /// Federated token vault (linked third-party credentials)
    pub vault: VaultConfig,
    /// Group-based fallback access policy
    pub access: AccessConfig,
    /// Outbound HTTP client settings
    pub http: HttpConfig,
}

/// Identity provider org authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrgConfig {
    /// Org domain, e.g. `acme.okta.com`
    pub domain: String,
    /// OAuth client id of this application at the org AS.
    /// Inbound identity tokens must carry this value as their audience.
    pub client_id: String,
    /// Issuer override. When unset the issuer is `https://{domain}`.
    pub issuer: Option<String>,
}

impl OrgConfig {
    /// Base URL of the org authorization server (issuer override or
    /// `https://{domain}`), without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        match &self.issuer {
            Some(issuer) => issuer.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.domain),
        }
    }

    /// Expected `iss` claim of inbound identity tokens.
    #[must_use]
    pub fn issuer_url(&self) -> String {
        self.base_url()
    }

    /// JWKS endpoint publishing the org's signing keys.
    #[must_use]
    pub fn jwks_uri(&self) -> String {
        format!("{}/oauth2/v1/keys", self.base_url())
    }

    /// Org-level token endpoint (identity assertion exchange).
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v1/token", self.base_url())
    }

    /// Token endpoint of a resource-specific custom authorization server.
    #[must_use]
    pub fn resource_token_endpoint(&self, auth_server_id: &str) -> String {
        format!("{}/oauth2/{auth_server_id}/v1/token", self.base_url())
    }
}

/// Workload identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Client id of the workload principal registered at the org AS
    pub client_id: String,
    /// PEM-encoded RSA private key used to sign client assertions.
    /// Supports `env:VAR_NAME` indirection.
    pub private_key: Option<String>,
}

impl WorkloadConfig {
    /// Resolve the private key PEM (expand `env:VAR_NAME` indirection).
    #[must_use]
    pub fn resolve_private_key(&self) -> Option<String> {
        self.private_key.as_ref().map(|key| resolve_secret(key))
    }
}

/// Resource-specific custom authorization server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceConfig {
    /// Custom AS id at the org. When unset, resource access falls back to
    /// the group-based policy in [`AccessConfig`].
    pub auth_server_id: Option<String>,
    /// Scopes requested from the resource AS
    pub scopes: Vec<String>,
}

/// Federated token vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault tenant domain, e.g. `acme.us.auth0.com`
    pub domain: String,
    /// Base URL override. When unset the base is `https://{domain}`.
    pub base_url: Option<String>,
    /// OAuth client id at the vault
    pub client_id: String,
    /// OAuth client secret at the vault. Supports `env:VAR_NAME` indirection.
    pub client_secret: Option<String>,
    /// Audience for the vault management credential.
    /// Defaults to `{base}/api/v2/`.
    pub audience: Option<String>,
    /// Name of the third-party provider connection whose linked credentials
    /// this workload reads (e.g. `salesforce`)
    pub connection: String,
    /// Instance URL handed back alongside linked provider credentials
    pub instance_url: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            base_url: None,
            client_id: String::new(),
            client_secret: None,
            audience: None,
            connection: "salesforce".to_string(),
            instance_url: None,
        }
    }
}

impl VaultConfig {
    /// Base URL of the vault tenant, without a trailing slash.
    #[must_use]
    pub fn base(&self) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.domain),
        }
    }

    /// Vault token endpoint (client-credentials and token-exchange grants).
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.base())
    }

    /// Vault authorize endpoint (interactive account linking).
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.base())
    }

    /// Vault user-record API endpoint.
    #[must_use]
    pub fn users_endpoint(&self) -> String {
        format!("{}/api/v2/users", self.base())
    }

    /// Audience of the vault management API.
    #[must_use]
    pub fn management_audience(&self) -> String {
        match &self.audience {
            Some(aud) => aud.clone(),
            None => format!("{}/api/v2/", self.base()),
        }
    }

    /// Resolve the client secret (expand `env:VAR_NAME` indirection).
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_ref().map(|secret| resolve_secret(secret))
    }
}

/// Group-based fallback access configuration.
///
/// Used only when no resource AS is configured: a coarser, configuration-
/// driven degraded mode, not a replacement for the token-exchange path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// Groups whose members are granted the fallback scopes
    pub fallback_groups: Vec<String>,
    /// Scopes granted to members of the fallback groups
    pub fallback_scopes: Vec<String>,
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout applied to every outbound call (JWKS, token endpoints, vault)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Resolve a secret value, expanding `env:VAR_NAME` indirection.
/// Unknown variables leave the value untouched.
fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (XAA_BROKER_ prefix)
        figment = figment.merge(Env::prefixed("XAA_BROKER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}
