use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::db;
use crate::AppState;

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub timestamp: String,
}

/// Liveness plus a database ping; 503 when the database is unreachable
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_up = db::check_connection(&state.db).await.is_ok();

    let body = HealthResponse {
        status: if db_up { "healthy" } else { "unhealthy" },
        database: if db_up { "up" } else { "down" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let status = if db_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}
