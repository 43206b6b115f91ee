//! Authentication and authorization error types.
//!
//! Every failure the verifier can produce maps to exactly one [`AuthError`]
//! variant. The variants stay distinct all the way to the HTTP boundary, which
//! alone decides the status code and the (generic) message shown to callers.

/// Errors raised while fetching the realm's signing keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("Network error: {0}")]
    Network(String),

    /// The certs endpoint answered with a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    /// The response body is not a JWKS document.
    #[error("Invalid JWKS document: {0}")]
    InvalidDocument(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// Errors that can occur while authenticating and authorizing a request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable `Authorization: Bearer` header was supplied.
    #[error("Missing bearer credentials")]
    MissingCredentials,

    /// The token is not a well-formed compact JWS.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The identity provider's key set could not be obtained.
    #[error("Key fetch failed: {0}")]
    KeyFetch(#[from] KeyFetchError),

    /// No key in the fetched set carries the token's key identifier.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// The key identifier from the token header.
        kid: String,
    },

    /// Signature, algorithm, issuer, audience or expiry validation failed.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token is valid but its realm roles lack the required role.
    #[error("Insufficient role: {role} required")]
    InsufficientRole {
        /// The role that was required.
        role: String,
    },
}

impl AuthError {
    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `InsufficientRole` error.
    #[must_use]
    pub fn insufficient_role(role: impl Into<String>) -> Self {
        Self::InsufficientRole { role: role.into() }
    }

    /// Stable identifier of the failure class, used in logs and tests.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::MalformedToken(_) => "malformed_token",
            Self::KeyFetch(_) => "key_fetch_error",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientRole { .. } => "insufficient_role",
        }
    }

    /// Returns `true` if the caller failed to prove who they are.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::MalformedToken(_)
                | Self::KeyNotFound { .. }
                | Self::InvalidToken(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_fetch_error_display() {
        let err = KeyFetchError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = KeyFetchError::HttpStatus(503);
        assert_eq!(err.to_string(), "HTTP error: status 503");

        let err = KeyFetchError::InvalidDocument("missing keys".to_string());
        assert_eq!(err.to_string(), "Invalid JWKS document: missing keys");
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::key_not_found("k1").to_string(),
            "Signing key not found: k1"
        );
        assert_eq!(
            AuthError::insufficient_role("prothetic_user").to_string(),
            "Insufficient role: prothetic_user required"
        );
        assert_eq!(
            AuthError::from(KeyFetchError::HttpStatus(500)).to_string(),
            "Key fetch failed: HTTP error: status 500"
        );
    }

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            AuthError::MissingCredentials,
            AuthError::malformed("x"),
            AuthError::from(KeyFetchError::HttpStatus(503)),
            AuthError::key_not_found("k1"),
            AuthError::invalid_token("x"),
            AuthError::insufficient_role("r"),
        ];
        let mut kinds: Vec<_> = errors.iter().map(AuthError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_authentication_vs_authorization() {
        assert!(AuthError::key_not_found("k1").is_authentication_failure());
        assert!(AuthError::invalid_token("bad").is_authentication_failure());
        assert!(!AuthError::insufficient_role("r").is_authentication_failure());
        assert!(!AuthError::from(KeyFetchError::HttpStatus(503)).is_authentication_failure());
    }
}
