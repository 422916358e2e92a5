use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::ApiResponse;

/// Component health status
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

/// Individual component health details
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub database: ComponentHealth,
    pub payment_provider: String,
}

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Database-backed health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_check_start = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let db_latency = db_check_start.elapsed().as_millis() as u64;
    let db_up = db_result.is_ok();

    let database = ComponentHealth {
        status: if db_up {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        message: db_result.map_or_else(
            |e| format!("Connection failed: {}", e),
            |_| "Connection successful".to_string(),
        ),
        latency_ms: Some(db_latency),
    };

    let response = HealthResponse {
        status: database.status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        database,
        payment_provider: state.gateway.provider().to_string(),
    };
    let status_code = if db_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

/// Build and runtime information
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Service status", body = crate::ApiResponse<serde_json::Value>)
    ),
    tag = "Health"
)]
pub async fn api_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "service": "daylove-api",
        "environment": state.config.environment,
        "payment_provider": state.gateway.provider(),
        "status_strategy": state.config.status_strategy().to_string(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}
