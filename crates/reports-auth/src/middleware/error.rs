//! Error response handling for authentication middleware.
//!
//! This module implements `IntoResponse` for `AuthError`. Callers only ever
//! see the failure class and a fixed description; the underlying reason is
//! written to the log.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

/// Realm name advertised in `WWW-Authenticate` challenges.
const CHALLENGE_REALM: &str = "reports";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, oauth_error, description) = error_details(&self);

        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "Request rejected");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "Request rejected");
        }

        let body = json!({
            "error": oauth_error,
            "error_description": description,
        });

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(oauth_error, description);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Extracts error details from an AuthError.
///
/// Returns (HTTP status, OAuth error code, public description).
fn error_details(error: &AuthError) -> (StatusCode, &'static str, &'static str) {
    match error {
        AuthError::MissingCredentials => (
            StatusCode::UNAUTHORIZED,
            "invalid_request",
            "Bearer token required",
        ),
        AuthError::MalformedToken(_) => (
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Malformed token",
        ),
        AuthError::KeyNotFound { .. } => (
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Token signing key not recognized",
        ),
        AuthError::InvalidToken(_) => (
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Invalid token",
        ),
        AuthError::InsufficientRole { .. } => (
            StatusCode::FORBIDDEN,
            "insufficient_scope",
            "Insufficient role",
        ),
        AuthError::KeyFetch(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "Failed to fetch identity provider public keys",
        ),
    }
}

/// Builds the WWW-Authenticate header value for 401 responses.
///
/// Format: `Bearer realm="reports", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(error: &str, description: &str) -> String {
    let escaped_desc = description.replace('\"', "\\\"");
    format!(
        "Bearer realm=\"{}\", error=\"{}\", error_description=\"{}\"",
        CHALLENGE_REALM, error, escaped_desc
    )
}
