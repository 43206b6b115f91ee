//! Test helpers for minting realm-style tokens.
//!
//! Feature-gated behind `testutil`. Integration tests in other crates enable it
//! through their dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! reports-auth = { workspace = true, features = ["testutil"] }
//! ```

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::json;

use crate::error::KeyFetchError;
use crate::provider::{KeyProvider, KeySet};

/// An RSA key pair published under a key identifier.
pub struct TestSigningKey {
    /// Key identifier.
    pub kid: String,
    encoding_key: EncodingKey,
    n: String,
    e: String,
}

impl TestSigningKey {
    /// Generates a fresh 2048-bit RSA key.
    ///
    /// # Panics
    ///
    /// Panics if key generation fails.
    #[must_use]
    pub fn generate(kid: impl Into<String>) -> Self {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).expect("Failed to generate RSA key");
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode RSA key");
        let encoding_key =
            EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("Failed to load RSA key");

        Self {
            kid: kid.into(),
            encoding_key,
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }
    }

    /// The public half as a Keycloak-style JWK.
    #[must_use]
    pub fn jwk(&self, alg: &str) -> serde_json::Value {
        json!({
            "kid": self.kid,
            "kty": "RSA",
            "alg": alg,
            "use": "sig",
            "n": self.n,
            "e": self.e,
        })
    }

    /// Signs `claims` with RS256, naming this key in the header.
    #[must_use]
    pub fn sign(&self, claims: &serde_json::Value) -> String {
        self.sign_with(Algorithm::RS256, Some(&self.kid), claims)
    }

    /// Signs `claims` with an explicit algorithm and header `kid`.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails.
    #[must_use]
    pub fn sign_with(
        &self,
        alg: Algorithm,
        kid: Option<&str>,
        claims: &serde_json::Value,
    ) -> String {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .expect("Failed to sign test token")
    }
}

/// Builds a JWKS document from the given JWKs.
#[must_use]
pub fn jwks_document(keys: &[serde_json::Value]) -> serde_json::Value {
    json!({ "keys": keys })
}

/// Claims shaped like a Keycloak access token, expiring in one hour.
#[must_use]
pub fn realm_claims(sub: &str, iss: &str, aud: &str, roles: &[&str]) -> serde_json::Value {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64);
    json!({
        "sub": sub,
        "iss": iss,
        "aud": aud,
        "iat": now,
        "exp": now + 3600,
        "realm_access": { "roles": roles },
    })
}

/// A key provider serving a fixed document and counting calls.
pub struct StaticKeyProvider {
    document: serde_json::Value,
    calls: std::sync::atomic::AtomicUsize,
}

impl StaticKeyProvider {
    /// Serves `document` on every call.
    #[must_use]
    pub fn new(document: serde_json::Value) -> Self {
        Self {
            document,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of times keys were fetched.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn fetch_keys(&self) -> Result<KeySet, KeyFetchError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        KeySet::from_document(&self.document)
    }
}
