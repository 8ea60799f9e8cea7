// HTTP request handlers

use super::routes::AppState;
use crate::calendar::CalendarSnapshot;
use crate::credentials::TokenStatus;
use crate::error::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Tokens closer than this to expiry are reported as a warning.
const EXPIRY_WARNING_SECONDS: i64 = 600;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
    pub token: TokenStatus,
}

fn credential_check(token: TokenStatus) -> (HealthStatus, HealthCheck) {
    let (health, status, message) = match (token.cached, token.fresh, token.expires_in_seconds) {
        (false, _, _) => (
            HealthStatus::Healthy,
            "idle",
            "Not acquired yet; fetched on first use".to_string(),
        ),
        (true, false, _) => (
            HealthStatus::Degraded,
            "warning",
            "Cached token is stale; renewed on next use".to_string(),
        ),
        (true, true, Some(secs)) if secs < EXPIRY_WARNING_SECONDS => (
            HealthStatus::Degraded,
            "warning",
            format!("Token expires in {} seconds", secs),
        ),
        (true, true, Some(secs)) => (
            HealthStatus::Healthy,
            "ok",
            format!("Valid token, expires in {} seconds", secs),
        ),
        (true, true, None) => (HealthStatus::Healthy, "ok", "Valid token".to_string()),
    };

    (
        health,
        HealthCheck {
            status: status.to_string(),
            message,
            token,
        },
    )
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = BTreeMap::new();
    let mut overall = HealthStatus::Healthy;

    for (name, binding) in [
        ("calendar_credentials", state.calendar.binding()),
        ("photos_credentials", state.photos.binding()),
    ] {
        let (health, check) = credential_check(state.manager.token_status(binding));
        overall = overall.max(health);
        checks.insert(name.to_string(), check);
    }

    Json(HealthResponse {
        status: overall,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

pub async fn calendar_handler(State(state): State<AppState>) -> Result<Json<CalendarSnapshot>> {
    Ok(Json(state.calendar.snapshot().await?))
}

pub async fn next_photo_handler(State(state): State<AppState>) -> Result<Response> {
    let response = match state.photos.next_photo().await? {
        Some(url) => Json(json!({ "image_url": url })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No images found" })),
        )
            .into_response(),
    };
    Ok(response)
}
