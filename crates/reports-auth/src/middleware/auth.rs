//! Bearer token authentication extractor.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use reports_auth::middleware::{AuthState, BearerAuth};
//!
//! async fn protected_handler(BearerAuth(identity): BearerAuth) -> String {
//!     format!("Hello, {}!", identity.subject())
//! }
//!
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .with_state(auth_state);
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use crate::error::AuthError;
use crate::verifier::{AccessRequirements, AuthenticatedIdentity, TokenVerifier};

/// State required for bearer token authentication.
///
/// Include this in the application state and expose it to the
/// [`BearerAuth`] extractor via `FromRef`.
#[derive(Clone)]
pub struct AuthState {
    /// Verifier shared by all requests.
    pub verifier: Arc<TokenVerifier>,

    /// Issuer, audience and role every token must satisfy.
    pub requirements: Arc<AccessRequirements>,
}

impl AuthState {
    /// Creates a new auth state.
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>, requirements: AccessRequirements) -> Self {
        Self {
            verifier,
            requirements: Arc::new(requirements),
        }
    }
}

/// Axum extractor that verifies the request's bearer token.
///
/// Rejects with [`AuthError`], which renders the matching status code.
pub struct BearerAuth(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);

        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingCredentials)?;

        let identity = auth_state
            .verifier
            .verify(token, &auth_state.requirements)
            .await?;

        Ok(BearerAuth(identity))
    }
}

/// Extracts the credential from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credentials) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let credentials = credentials.trim();
    (!credentials.is_empty()).then_some(credentials)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers_with("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("BEARER  abc ")), Some("abc"));
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        assert_eq!(bearer_token(&headers_with("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
        assert_eq!(bearer_token(&headers_with("Bearer   ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
