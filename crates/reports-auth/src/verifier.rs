//! Bearer token verification.
//!
//! [`TokenVerifier::verify`] runs the full check for one request:
//!
//! 1. Split the compact token and decode its header (no signature check yet)
//! 2. Fetch the realm's current key set
//! 3. Pick the key whose `kid` matches the header
//! 4. Build a decoding key from its material
//! 5. Verify signature, issuer, audience and expiry
//! 6. Read `realm_access.roles` (absent means no roles)
//! 7. Require the configured role
//!
//! Each step short-circuits with its own [`AuthError`] variant. The verifier
//! holds no per-request state; every call is independent.
//!
//! The header's `alg` is never trusted on its own: it must appear in the
//! verifier's allow-list and, when the matched key declares an algorithm,
//! agree with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::provider::{KeyProvider, SigningKey};

/// Algorithms accepted when none are configured.
pub const DEFAULT_ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// A structurally valid compact JWS whose signature is not yet checked.
#[derive(Debug, Clone)]
pub struct BearerToken {
    raw: String,
    header: Header,
}

impl BearerToken {
    /// Checks the compact structure and decodes the header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] unless the input has exactly three
    /// non-empty base64url segments, the first two decode to JSON objects and
    /// the header names a known algorithm.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let mut segments = raw.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::malformed("expected three dot-separated segments"));
        };

        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(AuthError::malformed("empty token segment"));
        }

        decode_json_object(header, "header")?;
        decode_json_object(payload, "claims")?;
        URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| AuthError::malformed(format!("signature segment: {e}")))?;

        let header =
            decode_header(raw).map_err(|e| AuthError::malformed(format!("header: {e}")))?;

        Ok(Self {
            raw: raw.to_string(),
            header,
        })
    }

    /// The decoded, unverified header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The key identifier named in the header.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// The original compact serialization.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn decode_json_object(segment: &str, name: &str) -> Result<(), AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("{name} segment: {e}")))?;
    serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&bytes)
        .map_err(|e| AuthError::malformed(format!("{name} segment is not a JSON object: {e}")))?;
    Ok(())
}

/// What a token must satisfy to grant access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequirements {
    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected entry in the `aud` claim.
    pub audience: String,

    /// Realm role the subject must hold.
    pub required_role: String,
}

impl AccessRequirements {
    /// Creates a new set of requirements.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        required_role: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            required_role: required_role.into(),
        }
    }
}

/// Realm-level role assignments carried in Keycloak tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmAccess {
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims of an access token issued by the realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user identifier).
    pub sub: String,

    /// Issuer.
    pub iss: String,

    /// Audience (string or array on the wire).
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Authorized party (client the token was issued to).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Realm roles, absent for tokens without role mappings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,

    /// Any other claims.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TokenClaims {
    /// Realm roles, empty when the token carries none.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        self.realm_access
            .as_ref()
            .map_or(&[], |access| access.roles.as_slice())
    }

    /// Returns `true` if the realm roles contain `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }
}

fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

/// The verified caller, valid for the lifetime of one request.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct AuthenticatedIdentity {
    claims: TokenClaims,
}

impl AuthenticatedIdentity {
    /// Subject identifier.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Realm roles.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        self.claims.roles()
    }

    /// Returns `true` if the identity holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.claims.has_role(role)
    }

    /// Full verified claims set.
    #[must_use]
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Consumes the identity, returning its claims.
    #[must_use]
    pub fn into_claims(self) -> TokenClaims {
        self.claims
    }
}

/// Verifies bearer tokens against the realm's published keys.
pub struct TokenVerifier {
    provider: Arc<dyn KeyProvider>,
    allowed_algorithms: Vec<Algorithm>,
    leeway: Duration,
}

impl TokenVerifier {
    /// Creates a verifier with the default algorithm allow-list and 60 s leeway.
    #[must_use]
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            provider,
            allowed_algorithms: DEFAULT_ALLOWED_ALGORITHMS.to_vec(),
            leeway: Duration::from_secs(60),
        }
    }

    /// Replaces the algorithm allow-list.
    #[must_use]
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerated on `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Accepted signature algorithms.
    #[must_use]
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    /// Verifies `token` and checks it against `requirements`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] before any network call if the token is not a compact JWS
    /// - [`AuthError::KeyFetch`] if the key set cannot be fetched
    /// - [`AuthError::KeyNotFound`] if no fetched key carries the header's `kid`
    /// - [`AuthError::InvalidToken`] on algorithm, signature, issuer, audience or expiry failure
    /// - [`AuthError::InsufficientRole`] if the required role is missing
    pub async fn verify(
        &self,
        token: &str,
        requirements: &AccessRequirements,
    ) -> Result<AuthenticatedIdentity, AuthError> {
        let token = BearerToken::parse(token)?;

        let keys = self.provider.fetch_keys().await?;

        let kid = token.kid().unwrap_or_default();
        let Some(key) = keys.find(kid) else {
            tracing::warn!(kid, available = keys.len(), "No realm key matches token kid");
            // The realm may have rotated; make the next request fetch anew.
            self.provider.invalidate().await;
            return Err(AuthError::key_not_found(kid));
        };

        let decoding_key = DecodingKey::from_jwk(&key.jwk)
            .map_err(|e| AuthError::invalid_token(format!("unusable key {kid}: {e}")))?;

        let algorithm = self.accepted_algorithm(token.header().alg, key)?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&requirements.issuer]);
        validation.set_audience(&[&requirements.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.leeway.as_secs();

        let claims = decode::<TokenClaims>(token.as_str(), &decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(kid, error = %e, "Token validation failed");
                AuthError::invalid_token(e.to_string())
            })?
            .claims;

        if !claims.has_role(&requirements.required_role) {
            tracing::debug!(
                subject = %claims.sub,
                required_role = %requirements.required_role,
                "Token lacks required role"
            );
            return Err(AuthError::insufficient_role(&requirements.required_role));
        }

        tracing::debug!(subject = %claims.sub, kid, "Token verified");
        Ok(AuthenticatedIdentity { claims })
    }

    /// Resolves the algorithm to verify with, rejecting anything not pinned.
    fn accepted_algorithm(
        &self,
        requested: Algorithm,
        key: &SigningKey,
    ) -> Result<Algorithm, AuthError> {
        if !self.allowed_algorithms.contains(&requested) {
            return Err(AuthError::invalid_token(format!(
                "algorithm {requested:?} is not accepted"
            )));
        }

        if let Some(declared) = key.alg
            && declared != requested
        {
            return Err(AuthError::invalid_token(format!(
                "algorithm {requested:?} does not match key algorithm {declared:?}"
            )));
        }

        Ok(requested)
    }
}
