//! Workload client assertions.
//!
//! A client assertion is a short-lived JWT the workload mints to
//! authenticate itself to a token endpoint, instead of a shared secret.
//! Every exchange call mints a fresh assertion with a new `jti` and fresh
//! timestamps — authorization servers may enforce single use, so an
//! assertion is never cached or reused across calls.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::{Error, Result};

/// Assertion lifetime (5 minutes).
const ASSERTION_LIFETIME_SECS: u64 = 300;

/// Claim set of a workload client assertion.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer — the workload client id
    pub iss: String,
    /// Subject — equals the issuer for a self-asserted client
    pub sub: String,
    /// Audience — the target token endpoint
    pub aud: String,
    /// Issued-at (Unix timestamp)
    pub iat: u64,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    /// Unique id, fresh per assertion
    pub jti: String,
}

/// Mints signed client assertions for the workload identity.
pub struct AssertionSigner {
    client_id: String,
    default_audience: String,
    key: Option<EncodingKey>,
}

impl AssertionSigner {
    /// Create a signer from the workload client id, the default audience
    /// (the org token endpoint), and an optional PEM-encoded RSA private key.
    ///
    /// A missing key is tolerated here and surfaced as
    /// [`AuthError::SigningKeyMissing`] on first use; an unparseable key is
    /// rejected immediately.
    pub fn new(
        client_id: String,
        default_audience: String,
        private_key_pem: Option<&str>,
    ) -> Result<Self> {
        let key = match private_key_pem {
            Some(pem) => Some(
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| Error::Config(format!("Invalid workload private key: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            client_id,
            default_audience,
            key,
        })
    }

    /// Mint a signed client assertion for the given audience (defaults to
    /// the org token endpoint).
    ///
    /// # Errors
    ///
    /// [`AuthError::SigningKeyMissing`] when no private key is configured.
    pub fn mint(&self, audience: Option<&str>) -> std::result::Result<String, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::SigningKeyMissing)?;
        let claims = self.claims(audience);

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| AuthError::AssertionSigning(e.to_string()))
    }

    /// Build a fresh claim set. Timestamps and `jti` are regenerated on
    /// every call.
    fn claims(&self, audience: Option<&str>) -> AssertionClaims {
        let now = unix_now();
        AssertionClaims {
            iss: self.client_id.clone(),
            sub: self.client_id.clone(),
            aud: audience.unwrap_or(&self.default_audience).to_string(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            jti: Uuid::new_v4().to_string(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
