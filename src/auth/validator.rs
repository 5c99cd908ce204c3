//! Inbound identity token verification.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Locate the matching key in the cached key set — an unknown `kid` is
//!    always surfaced as [`AuthError::KeyNotFound`], never skipped.
//! 3. Verify the signature and the `exp` claim, then check `iss` against the
//!    configured issuer and `aud` against the configured client id.
//! 4. Project the verified claim set into a canonical [`UserIdentity`].
//!
//! There is no partial validation: any failed check aborts the whole
//! operation. A token verified once is never mutated, only replaced.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, TokenData, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::AuthError;
use super::jwks::JwksCache;

/// Canonical identity extracted from a verified identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// `sub` claim (opaque user id at the identity provider)
    pub sub: String,
    /// Email address
    pub email: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Given name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Group memberships (empty when the claim is absent)
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Raw claims of an identity token.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    /// Expiry — validated by `jsonwebtoken` internally
    #[allow(dead_code)]
    exp: u64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
}

/// Verifies inbound identity tokens against the org's signing keys.
pub struct IdTokenValidator {
    jwks: Arc<JwksCache>,
    issuer: String,
    client_id: String,
}

impl IdTokenValidator {
    /// Create a validator for the given issuer and client id (audience).
    #[must_use]
    pub fn new(jwks: Arc<JwksCache>, issuer: String, client_id: String) -> Self {
        Self {
            jwks,
            issuer,
            client_id,
        }
    }

    /// Validate a raw identity token and return the canonical identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyNotFound`] when the token's `kid` is not in the key
    /// set, [`AuthError::TokenExpired`] on an expired token, and
    /// [`AuthError::TokenInvalid`] for every other failed check.
    pub async fn validate(&self, raw_token: &str) -> Result<UserIdentity, AuthError> {
        let keys = self.jwks.signing_keys().await?;
        let identity = verify_with_keys(raw_token, &keys, &self.issuer, &self.client_id)?;
        debug!(sub = %identity.sub, "Identity token verified");
        Ok(identity)
    }
}

/// Verify a token against an already-fetched key set.
pub(crate) fn verify_with_keys(
    raw_token: &str,
    keys: &jsonwebtoken::jwk::JwkSet,
    issuer: &str,
    client_id: &str,
) -> Result<UserIdentity, AuthError> {
    let header = jsonwebtoken::decode_header(raw_token)
        .map_err(|e| AuthError::TokenInvalid(e.to_string()))?;

    let kid = header
        .kid
        .clone()
        .ok_or_else(|| AuthError::TokenInvalid("missing kid in token header".to_string()))?;

    let decoding_key =
        JwksCache::find_key(keys, &kid).ok_or_else(|| AuthError::KeyNotFound(kid.clone()))?;

    let mut validation = build_validation(&header);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[client_id]);

    let token_data: TokenData<IdTokenClaims> =
        jsonwebtoken::decode(raw_token, &decoding_key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;

    Ok(UserIdentity {
        sub: claims.sub,
        email: claims.email.unwrap_or_default(),
        name: claims.name,
        given_name: claims.given_name,
        family_name: claims.family_name,
        groups: claims.groups.unwrap_or_default(),
    })
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    let mut v = Validation::new(alg);
    v.leeway = 60; // 60-second clock skew tolerance
    v
}

/// Map `jsonwebtoken` failures onto the validation taxonomy.
fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn map_jwt_error_distinguishes_expiry() {
        let expired = jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature);
        assert!(matches!(map_jwt_error(expired), AuthError::TokenExpired));

        let bad_aud = jsonwebtoken::errors::Error::from(ErrorKind::InvalidAudience);
        assert!(matches!(map_jwt_error(bad_aud), AuthError::TokenInvalid(_)));

        let bad_sig = jsonwebtoken::errors::Error::from(ErrorKind::InvalidSignature);
        assert!(matches!(map_jwt_error(bad_sig), AuthError::TokenInvalid(_)));
    }

    #[test]
    fn build_validation_keeps_leeway() {
        let v = build_validation(&Header::new(Algorithm::RS256));
        assert_eq!(v.leeway, 60);

        // An unsupported algorithm still yields a usable validation
        let v = build_validation(&Header::new(Algorithm::HS256));
        assert_eq!(v.leeway, 60);
    }

    #[test]
    fn identity_groups_default_to_empty() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "exp": 4_102_444_800_u64
        }))
        .unwrap();
        assert!(claims.groups.is_none());
        assert!(claims.email.is_none());
    }

    #[test]
    fn identity_serializes_without_absent_names() {
        let identity = UserIdentity {
            sub: "user-1".to_string(),
            email: "user@acme.com".to_string(),
            name: None,
            given_name: None,
            family_name: None,
            groups: vec![],
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("given_name"));
        assert!(json.contains("user@acme.com"));
    }
}
