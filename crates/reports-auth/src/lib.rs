//! # reports-auth
//!
//! Bearer token verification for the reports API.
//!
//! Tokens are issued by a Keycloak realm. Every verification fetches the
//! realm's current signing keys, checks the token's signature, issuer,
//! audience and expiry, and requires a realm role.
//!
//! ## Modules
//!
//! - [`provider`] - Signing-key retrieval from the realm's certs endpoint
//! - [`verifier`] - Token parsing, signature/claims validation and role check
//! - [`middleware`] - Axum extractor and error responses
//! - [`error`] - Error taxonomy

pub mod error;
pub mod middleware;
pub mod provider;
pub mod verifier;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{AuthError, KeyFetchError};
pub use middleware::{AuthState, BearerAuth};
pub use provider::{
    CachingKeyProvider, IdentityProviderConfig, KeyProvider, KeySet, RealmKeyProvider, SigningKey,
};
pub use verifier::{
    AccessRequirements, AuthenticatedIdentity, BearerToken, DEFAULT_ALLOWED_ALGORITHMS,
    RealmAccess, TokenClaims, TokenVerifier,
};

/// Re-exported so callers can name algorithms without depending on `jsonwebtoken`.
pub use jsonwebtoken::Algorithm;
