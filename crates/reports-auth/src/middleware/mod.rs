//! HTTP boundary for authentication.
//!
//! - [`BearerAuth`] extracts and verifies the `Authorization: Bearer` token
//! - `IntoResponse for AuthError` maps each failure class to its status code

pub mod auth;
pub mod error;

pub use auth::{AuthState, BearerAuth, bearer_token};
