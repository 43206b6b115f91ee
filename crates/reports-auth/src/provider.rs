//! Realm signing-key retrieval.
//!
//! The verifier obtains the identity provider's public keys through the
//! [`KeyProvider`] trait. The production implementation, [`RealmKeyProvider`],
//! performs one `GET` against the realm's certs endpoint on every call:
//!
//! ```text
//! GET {base_url}/realms/{realm}/protocol/openid-connect/certs
//! ```
//!
//! Nothing is cached unless the caller explicitly wraps the provider in a
//! [`CachingKeyProvider`]. Key rotation on the provider side is therefore
//! picked up immediately, at the price of one round-trip per verification.
//!
//! # Example
//!
//! ```ignore
//! use reports_auth::provider::{IdentityProviderConfig, KeyProvider, RealmKeyProvider};
//! use url::Url;
//!
//! let config = IdentityProviderConfig::new(Url::parse("http://keycloak:8080")?, "reports-realm");
//! let provider = RealmKeyProvider::new(config)?;
//! let keys = provider.fetch_keys().await?;
//! let key = keys.find("k1");
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm};
use tokio::sync::RwLock;
use url::Url;

use crate::error::KeyFetchError;

/// Location of the identity provider realm whose keys sign incoming tokens.
#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    /// Base URL of the identity provider (e.g. `http://keycloak:8080`).
    pub base_url: Url,

    /// Realm name.
    pub realm: String,

    /// HTTP request timeout for the certs call (default: 10 seconds).
    pub request_timeout: Duration,
}

impl IdentityProviderConfig {
    /// Creates a new configuration for the given base URL and realm.
    #[must_use]
    pub fn new(base_url: Url, realm: impl Into<String>) -> Self {
        Self {
            base_url,
            realm: realm.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The realm's JWKS endpoint.
    #[must_use]
    pub fn certs_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            self.base_url.as_str().trim_end_matches('/'),
            self.realm
        )
    }

    /// The issuer string the realm stamps into its tokens.
    #[must_use]
    pub fn default_issuer(&self) -> String {
        format!(
            "{}/realms/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.realm
        )
    }
}

/// A public key published by the identity provider.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Key identifier (`kid`).
    pub kid: Option<String>,

    /// Algorithm the key is declared for (`alg`), if any.
    pub alg: Option<Algorithm>,

    /// Raw JWK holding the key material.
    pub jwk: Jwk,
}

impl SigningKey {
    /// Wraps a parsed JWK.
    #[must_use]
    pub fn from_jwk(jwk: Jwk) -> Self {
        Self {
            kid: jwk.common.key_id.clone(),
            alg: jwk_algorithm(&jwk),
            jwk,
        }
    }
}

/// The ordered set of keys returned by one certs call.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    /// Keys in the order the provider listed them.
    pub keys: Vec<SigningKey>,
}

impl KeySet {
    /// Parses a JWKS document.
    ///
    /// The document must be a JSON object with a `keys` array. Entries that
    /// are not valid JWKs are skipped rather than failing the whole set.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::InvalidDocument`] if `keys` is missing or not an array.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, KeyFetchError> {
        let entries = document
            .get("keys")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| KeyFetchError::InvalidDocument("missing \"keys\" array".to_string()))?;

        let keys = entries
            .iter()
            .filter_map(|entry| match serde_json::from_value::<Jwk>(entry.clone()) {
                Ok(jwk) => Some(SigningKey::from_jwk(jwk)),
                Err(e) => {
                    tracing::warn!(
                        kid = ?entry.get("kid").and_then(serde_json::Value::as_str),
                        error = %e,
                        "Skipping unparseable JWK"
                    );
                    None
                }
            })
            .collect();

        Ok(Self { keys })
    }

    /// Finds the key with the given identifier.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Number of keys in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Source of the realm's current signing keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Fetches the current key set.
    async fn fetch_keys(&self) -> Result<KeySet, KeyFetchError>;

    /// Drops any key set held from earlier fetches.
    ///
    /// Called when a token names a key the current set lacks. Providers that
    /// fetch on every call have nothing to drop.
    async fn invalidate(&self) {}
}

/// Fetches the key set from the realm's certs endpoint on every call.
pub struct RealmKeyProvider {
    http_client: reqwest::Client,
    certs_url: String,
}

impl RealmKeyProvider {
    /// Creates a provider for the configured realm.
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::ClientBuild`] if the HTTP client cannot be created.
    pub fn new(config: IdentityProviderConfig) -> Result<Self, KeyFetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KeyFetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http_client,
            certs_url: config.certs_url(),
        })
    }

    /// The URL this provider fetches from.
    #[must_use]
    pub fn certs_url(&self) -> &str {
        &self.certs_url
    }
}

#[async_trait]
impl KeyProvider for RealmKeyProvider {
    async fn fetch_keys(&self) -> Result<KeySet, KeyFetchError> {
        tracing::debug!(url = %self.certs_url, "Fetching realm signing keys");

        let response = self
            .http_client
            .get(&self.certs_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.certs_url, error = %e, "Failed to fetch JWKS");
                KeyFetchError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.certs_url, status = status.as_u16(), "JWKS endpoint returned error status");
            return Err(KeyFetchError::HttpStatus(status.as_u16()));
        }

        let document: serde_json::Value = response.json().await.map_err(|e| {
            tracing::warn!(url = %self.certs_url, error = %e, "Failed to parse JWKS");
            KeyFetchError::InvalidDocument(e.to_string())
        })?;

        let keys = KeySet::from_document(&document)?;
        tracing::debug!(url = %self.certs_url, keys = keys.len(), "Fetched realm signing keys");
        Ok(keys)
    }
}

struct CachedKeys {
    keys: KeySet,
    expires_at: Instant,
}

/// Reuses the last successfully fetched key set for a fixed TTL.
///
/// This trades key-rotation latency for fewer calls to the identity
/// provider. It is only installed when `auth.key_cache_ttl_secs` is set;
/// the default is a fresh fetch per verification. Failures are not cached.
pub struct CachingKeyProvider {
    inner: Arc<dyn KeyProvider>,
    ttl: Duration,
    cached: RwLock<Option<CachedKeys>>,
}

impl CachingKeyProvider {
    /// Wraps `inner` with a cache of the given TTL.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }

}

#[async_trait]
impl KeyProvider for CachingKeyProvider {
    async fn fetch_keys(&self) -> Result<KeySet, KeyFetchError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref()
                && Instant::now() < entry.expires_at
            {
                tracing::trace!("Using cached realm keys");
                return Ok(entry.keys.clone());
            }
        }

        // The lock is not held across the fetch.
        let keys = self.inner.fetch_keys().await?;
        *self.cached.write().await = Some(CachedKeys {
            keys: keys.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(keys)
    }

    async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::debug!("Invalidated cached realm keys");
    }
}

/// Extracts the signature algorithm a JWK is declared for.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    const MODULUS: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    fn keycloak_document() -> serde_json::Value {
        json!({
            "keys": [
                { "kid": "k1", "kty": "RSA", "alg": "RS256", "use": "sig", "n": MODULUS, "e": "AQAB" },
                { "kid": "enc", "kty": "RSA", "use": "enc", "n": MODULUS, "e": "AQAB" },
                { "kid": "k2", "kty": "RSA", "alg": "RS384", "use": "sig", "n": MODULUS, "e": "AQAB" }
            ]
        })
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeyProvider for CountingProvider {
        async fn fetch_keys(&self) -> Result<KeySet, KeyFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            KeySet::from_document(&keycloak_document())
        }
    }

    #[test]
    fn test_certs_url() {
        let config = IdentityProviderConfig::new(
            Url::parse("http://keycloak:8080").unwrap(),
            "reports-realm",
        );
        assert_eq!(
            config.certs_url(),
            "http://keycloak:8080/realms/reports-realm/protocol/openid-connect/certs"
        );
        assert_eq!(
            config.default_issuer(),
            "http://keycloak:8080/realms/reports-realm"
        );
    }

    #[test]
    fn test_certs_url_with_path_prefix() {
        let config =
            IdentityProviderConfig::new(Url::parse("https://idp.example.com/auth/").unwrap(), "r");
        assert_eq!(
            config.certs_url(),
            "https://idp.example.com/auth/realms/r/protocol/openid-connect/certs"
        );
    }

    #[test]
    fn test_config_builder() {
        let config =
            IdentityProviderConfig::new(Url::parse("http://localhost:8080").unwrap(), "realm")
                .with_request_timeout(Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_key_set_parses_keycloak_document() {
        let keys = KeySet::from_document(&keycloak_document()).unwrap();
        assert_eq!(keys.len(), 3);

        let k1 = keys.find("k1").unwrap();
        assert_eq!(k1.alg, Some(Algorithm::RS256));

        let k2 = keys.find("k2").unwrap();
        assert_eq!(k2.alg, Some(Algorithm::RS384));

        // Keys without a declared algorithm are kept
        assert_eq!(keys.find("enc").unwrap().alg, None);
        assert!(keys.find("missing").is_none());
    }

    #[test]
    fn test_key_set_skips_garbage_entries() {
        let document = json!({
            "keys": [
                { "kid": "broken", "kty": "nope" },
                "not an object",
                { "kid": "k1", "kty": "RSA", "alg": "RS256", "n": MODULUS, "e": "AQAB" }
            ]
        });
        let keys = KeySet::from_document(&document).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.find("broken").is_none());
        assert!(keys.find("k1").is_some());
    }

    #[test]
    fn test_key_set_rejects_missing_keys_array() {
        let result = KeySet::from_document(&json!({ "issuer": "x" }));
        assert!(matches!(result, Err(KeyFetchError::InvalidDocument(_))));

        let result = KeySet::from_document(&json!({ "keys": "nope" }));
        assert!(matches!(result, Err(KeyFetchError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn test_caching_provider_reuses_keys() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = CachingKeyProvider::new(inner.clone(), Duration::from_secs(60));

        cache.fetch_keys().await.unwrap();
        cache.fetch_keys().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cache.invalidate().await;
        cache.fetch_keys().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_caching_provider_expires() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = CachingKeyProvider::new(inner.clone(), Duration::ZERO);

        cache.fetch_keys().await.unwrap();
        cache.fetch_keys().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
