use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use reports_auth::BearerAuth;
use serde::Serialize;
use serde_json::json;

use crate::reports::ReportsResponse;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Reports API",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Reports for the authenticated caller's devices.
pub async fn reports(
    State(state): State<AppState>,
    BearerAuth(identity): BearerAuth,
) -> Json<ReportsResponse> {
    let response = state.reports.generate(identity.subject());
    tracing::debug!(
        subject = %identity.subject(),
        count = response.reports.len(),
        "Generated reports"
    );
    Json(response)
}
