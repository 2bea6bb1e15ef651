use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::alerts::{AlertStateTracker, RegisteredCheck, StatusEntry, SubscriberStore};
use crate::checks::Cadence;

/// Application state shared across handlers
pub struct AppState {
    pub tracker: Arc<AlertStateTracker>,
    pub store: Arc<SubscriberStore>,
    pub checks: Vec<Arc<RegisteredCheck>>,
    pub hostname: String,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
pub struct StatusResponse {
    pub hostname: String,
    pub alerting: usize,
    pub checks: Vec<StatusEntry>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let checks = state.tracker.statuses();
    Json(StatusResponse {
        hostname: state.hostname.clone(),
        alerting: checks.iter().filter(|c| c.alerting).count(),
        checks,
    })
}

pub async fn check_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<StatusEntry>, ApiError> {
    state
        .tracker
        .statuses()
        .into_iter()
        .find(|entry| entry.name == name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No check or log rule named '{}'", name)))
}

// ============================================================================
// Scheduled checks
// ============================================================================

#[derive(Serialize)]
pub struct CheckInfo {
    pub name: String,
    pub cadence: Cadence,
    /// False once the check has failed and been stopped
    pub enabled: bool,
    pub changed_at: Option<DateTime<Utc>>,
}

pub async fn list_checks(State(state): State<Arc<AppState>>) -> Json<Vec<CheckInfo>> {
    let statuses = state.tracker.statuses();
    let checks = state
        .checks
        .iter()
        .map(|check| CheckInfo {
            name: check.name().to_string(),
            cadence: check.cadence(),
            enabled: check.is_enabled(),
            changed_at: statuses
                .iter()
                .find(|s| s.name == check.name())
                .and_then(|s| s.changed_at),
        })
        .collect();
    Json(checks)
}

// ============================================================================
// Subscribers
// ============================================================================

#[derive(Serialize)]
pub struct SubscribersResponse {
    pub count: usize,
}

pub async fn subscribers(State(state): State<Arc<AppState>>) -> Json<SubscribersResponse> {
    Json(SubscribersResponse {
        count: state.store.len(),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
