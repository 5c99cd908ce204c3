//! JWKS fetching and caching.
//!
//! One outbound HTTPS call per TTL window, shared across all concurrent
//! validations. A fetch failure propagates — there is no stale-key fallback;
//! correctness over availability.

use std::time::{Duration, Instant};

use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use tracing::debug;

use super::AuthError;

/// Default key-set cache TTL (1 hour).
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Cached key-set entry.
struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// TTL-cached view of the identity provider's published signing keys.
///
/// The cache is owned here and exposed only through [`signing_keys`]
/// (`JwksCache::signing_keys`), which enforces the TTL check. Concurrent
/// requests racing past an expired TTL may trigger a redundant refetch; the
/// fetch is idempotent, so last-write-wins is fine.
pub struct JwksCache {
    http: reqwest::Client,
    jwks_uri: String,
    ttl: Duration,
    cached: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    /// Create a cache for the given JWKS endpoint with the default 1-hour TTL.
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_uri: String) -> Self {
        Self::with_ttl(http, jwks_uri, DEFAULT_TTL)
    }

    /// Create a cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(http: reqwest::Client, jwks_uri: String, ttl: Duration) -> Self {
        Self {
            http,
            jwks_uri,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Return the current key set, fetching from the JWKS endpoint if the
    /// cached copy is missing or older than the TTL.
    pub async fn signing_keys(&self) -> Result<JwkSet, AuthError> {
        {
            let cached = self.cached.read();
            if let Some(entry) = cached.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.keys.clone());
                }
            }
        }

        debug!(uri = %self.jwks_uri, "Fetching JWKS");
        let keys: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        *self.cached.write() = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });

        Ok(keys)
    }

    /// Find a key by `kid` in a key set and convert it to a [`DecodingKey`].
    #[must_use]
    pub fn find_key(keys: &JwkSet, kid: &str) -> Option<DecodingKey> {
        for jwk in &keys.keys {
            let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
            if jwk_kid != kid {
                continue;
            }

            return match &jwk.algorithm {
                AlgorithmParameters::RSA(rsa) => {
                    DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()
                }
                AlgorithmParameters::EllipticCurve(ec) => {
                    DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
                }
                AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
            };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2048-bit RSA modulus of a throwaway test keypair
    const TEST_MODULUS: &str = "ocPkdsZHipqzwfn6aaTYo2ZC3mTmdVltYLJ_trPNEXhzV4TYbO2iMPtL7q8w_1_oFevS0K3dR6qw0at-tGsQLWq3-wc-JFWml8Ofc5sTHlSy05CZ0-0ImEteUeLxDGFuIRkEb5hG1Jhfrf9TRVqQwORgRVNt1RcxQwaUk-5YGT8bwONbvnoi4LoaFxiQhOhYRqnU62m5tHlSiA0j46u9Ry6lpcHEXTaVR94PmPl6TxxJiYOFOlCm-FhmOaAoX3Aprc6a5IOhOEOCDY2-83gna2Ni__nR2wijU5WMdIjvmtietzfhqOJ46ARSYXSK0Yh4dQwfYyRZLWcx8IQ_qMSfzQ";

    fn jwk_set(kid: &str) -> JwkSet {
        let json = serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": kid,
                "n": TEST_MODULUS,
                "e": "AQAB"
            }]
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn find_key_matches_kid() {
        let keys = jwk_set("key-1");
        assert!(JwksCache::find_key(&keys, "key-1").is_some());
    }

    #[test]
    fn find_key_misses_unknown_kid() {
        let keys = jwk_set("key-1");
        assert!(JwksCache::find_key(&keys, "key-2").is_none());
    }

    #[tokio::test]
    async fn fetch_failure_propagates_without_cached_fallback() {
        // Unroutable endpoint: the fetch must surface an error, not a stale
        // or empty key set.
        let cache = JwksCache::with_ttl(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(200))
                .build()
                .unwrap(),
            "http://127.0.0.1:1/oauth2/v1/keys".to_string(),
            DEFAULT_TTL,
        );

        let result = cache.signing_keys().await;
        assert!(matches!(result, Err(AuthError::Http(_))));
    }
}
