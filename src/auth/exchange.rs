//! Chained token exchange at the org and resource authorization servers.
//!
//! Step 1 ([`TokenExchanger::exchange_for_assertion`]) trades the end user's
//! identity token for an identity assertion scoped to the workload, via the
//! JWT-bearer grant at the org token endpoint. Step 2
//! ([`TokenExchanger::exchange_for_scoped_token`]) trades that assertion for
//! a resource-scoped access token at a custom authorization server, via the
//! token-exchange grant. Step 2 must never be attempted before step 1
//! succeeds — the assertion is a hard input to the second call.
//!
//! Each step mints its own fresh client assertion and performs its exchange
//! at most once per invocation; there is no retry-on-401, so a
//! misconfiguration surfaces instead of being masked.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::AuthError;
use super::assertion::AssertionSigner;
use crate::access::ScopeSet;
use crate::config::OrgConfig;

/// JWT-bearer grant type (identity assertion exchange).
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Token-exchange grant type (RFC 8693).
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Client assertion type for signed-JWT client authentication.
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Subject token type presented in the token-exchange grant.
pub const SUBJECT_TOKEN_TYPE_ID_TOKEN: &str = "urn:ietf:params:oauth:token-type:id_token";

/// Scopes requested alongside the identity assertion exchange.
const ASSERTION_EXCHANGE_SCOPES: &str = "openid profile email";

/// Outcome of a resource-scoped token exchange.
///
/// A denial is an expected, routine result — many users simply do not have
/// access to a given resource — so it is a value, not an error.
#[derive(Debug)]
pub enum ScopedTokenOutcome {
    /// The resource AS granted an access token.
    Granted(AccessGrant),
    /// The resource AS declined the exchange.
    Denied(AccessDenied),
}

impl ScopedTokenOutcome {
    /// Whether the exchange produced an access token.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// The grant, if any.
    #[must_use]
    pub fn granted(self) -> Option<AccessGrant> {
        match self {
            Self::Granted(grant) => Some(grant),
            Self::Denied(_) => None,
        }
    }
}

/// A resource-scoped access grant.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    /// The access token value
    pub access_token: String,
    /// Token type (usually "Bearer")
    pub token_type: String,
    /// Lifetime in seconds, when reported
    pub expires_in: Option<u64>,
    /// Granted scopes. Authoritative: may be a strict subset of the request.
    pub scope: ScopeSet,
}

/// Structured denial carrying the upstream error code and description.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AccessDenied {
    /// OAuth error code (e.g. `access_denied`, `invalid_grant`)
    pub error: String,
    /// Human-readable description, when the upstream supplied one
    pub error_description: Option<String>,
}

impl AccessDenied {
    /// Denial derived from a transport-level failure (connect error,
    /// timeout, unparseable body). Treated identically to an upstream
    /// non-success response.
    pub(crate) fn transport(e: &reqwest::Error) -> Self {
        Self {
            error: "request_failed".to_string(),
            error_description: Some(e.to_string()),
        }
    }

    /// Parse a non-success response body, falling back to the HTTP status
    /// when the body is not a standard OAuth error document.
    pub(crate) fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        Self {
            error: parsed
                .error
                .unwrap_or_else(|| format!("http_{}", status.as_u16())),
            error_description: parsed.error_description,
        }
    }
}

/// Upstream OAuth error body.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Org token endpoint response to the identity assertion exchange.
#[derive(Debug, Deserialize)]
struct AssertionResponse {
    /// The identity assertion token ("workload acting for user")
    #[serde(default)]
    id_token: Option<String>,
}

/// Resource AS response to the token-exchange grant.
#[derive(Debug, Deserialize)]
struct ScopedTokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Performs the two-step identity assertion exchange.
pub struct TokenExchanger {
    http: reqwest::Client,
    org: OrgConfig,
    signer: Arc<AssertionSigner>,
}

impl TokenExchanger {
    /// Create an exchanger over a shared HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, org: OrgConfig, signer: Arc<AssertionSigner>) -> Self {
        Self { http, org, signer }
    }

    /// Exchange the end user's identity token for an identity assertion
    /// token at the org authorization server.
    ///
    /// # Errors
    ///
    /// [`AuthError::ExchangeFailed`] on any non-success upstream response —
    /// establishing the assertion is a precondition for all subsequent work
    /// and has no meaningful partial-success state. Transport failures
    /// surface as [`AuthError::Http`].
    pub async fn exchange_for_assertion(&self, id_token: &str) -> Result<String, AuthError> {
        let client_assertion = self.signer.mint(None)?;

        let mut params = HashMap::new();
        params.insert("grant_type", GRANT_TYPE_JWT_BEARER);
        params.insert("assertion", id_token);
        params.insert("client_id", self.org.client_id.as_str());
        params.insert("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER);
        params.insert("client_assertion", client_assertion.as_str());
        params.insert("scope", ASSERTION_EXCHANGE_SCOPES);

        let response = self
            .http
            .post(self.org.token_endpoint())
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let denial = AccessDenied::from_response(status, &body);
            warn!(
                status = status.as_u16(),
                error = %denial.error,
                "Identity assertion exchange rejected"
            );
            return Err(AuthError::ExchangeFailed {
                error: denial.error,
                error_description: denial.error_description.unwrap_or_default(),
            });
        }

        let body: AssertionResponse = response.json().await?;
        let assertion = body.id_token.ok_or_else(|| AuthError::ExchangeFailed {
            error: "invalid_response".to_string(),
            error_description: "token endpoint response did not include an id_token".to_string(),
        })?;

        debug!("Obtained identity assertion token");
        Ok(assertion)
    }

    /// Exchange an identity assertion token for a resource-scoped access
    /// token at the given custom authorization server.
    ///
    /// A non-success upstream response — or a transport failure, treated
    /// identically — is a routine authorization decision and is returned as
    /// [`ScopedTokenOutcome::Denied`], never an error. The only error path
    /// is [`AuthError::SigningKeyMissing`] from minting the client
    /// assertion, which is a workload misconfiguration.
    pub async fn exchange_for_scoped_token(
        &self,
        identity_assertion: &str,
        resource_server_id: &str,
        scopes: &[String],
    ) -> Result<ScopedTokenOutcome, AuthError> {
        let endpoint = self.org.resource_token_endpoint(resource_server_id);
        let client_assertion = self.signer.mint(Some(&endpoint))?;
        let scope = scopes.join(" ");

        let mut params = HashMap::new();
        params.insert("grant_type", GRANT_TYPE_TOKEN_EXCHANGE);
        params.insert("subject_token", identity_assertion);
        params.insert("subject_token_type", SUBJECT_TOKEN_TYPE_ID_TOKEN);
        params.insert("client_id", self.org.client_id.as_str());
        params.insert("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER);
        params.insert("client_assertion", client_assertion.as_str());
        params.insert("scope", scope.as_str());

        let response = match self.http.post(&endpoint).form(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(resource = %resource_server_id, error = %e, "Scoped token exchange unreachable");
                return Ok(ScopedTokenOutcome::Denied(AccessDenied::transport(&e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let denial = AccessDenied::from_response(status, &body);
            info!(
                resource = %resource_server_id,
                status = status.as_u16(),
                error = %denial.error,
                "Scoped token exchange denied"
            );
            return Ok(ScopedTokenOutcome::Denied(denial));
        }

        match response.json::<ScopedTokenResponse>().await {
            Ok(body) => {
                let grant = AccessGrant {
                    access_token: body.access_token,
                    token_type: body.token_type.unwrap_or_else(|| "Bearer".to_string()),
                    expires_in: body.expires_in,
                    scope: ScopeSet::from_delimited(body.scope.as_deref().unwrap_or_default()),
                };
                info!(
                    resource = %resource_server_id,
                    granted = %grant.scope,
                    "Scoped token granted"
                );
                Ok(ScopedTokenOutcome::Granted(grant))
            }
            Err(e) => Ok(ScopedTokenOutcome::Denied(AccessDenied::transport(&e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn error_body_parse_reads_oauth_fields() {
        let denial = AccessDenied::from_response(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"error":"access_denied","error_description":"not assigned"}"#,
        );
        assert_eq!(denial.error, "access_denied");
        assert_eq!(denial.error_description.as_deref(), Some("not assigned"));
    }

    #[test]
    fn error_body_parse_falls_back_to_status() {
        let denial = AccessDenied::from_response(reqwest::StatusCode::BAD_GATEWAY, "upstream exploded");
        assert_eq!(denial.error, "http_502");
        assert!(denial.error_description.is_none());
    }

    #[test]
    fn granted_scope_string_becomes_scope_set() {
        let body: ScopedTokenResponse = serde_json::from_str(
            r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600,"scope":"inventory:read"}"#,
        )
        .unwrap();
        let scope = ScopeSet::from_delimited(body.scope.as_deref().unwrap_or_default());
        assert!(scope.has("inventory:read"));
        assert!(!scope.has("inventory:write"));
    }

    #[test]
    fn outcome_granted_accessor() {
        let outcome = ScopedTokenOutcome::Denied(AccessDenied {
            error: "access_denied".to_string(),
            error_description: None,
        });
        assert!(!outcome.is_granted());
        assert!(outcome.granted().is_none());
    }
}
