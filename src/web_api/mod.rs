//! WebAPI - REST + WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes (sessions, controls, violations, attendance)
//! - Per-session WebSocket: events out, operator commands in
//! - Caller role resolution

mod routes;
mod ws;

pub use routes::create_router;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::HealthResponse;
use crate::operator::Role;
use crate::session_worker::SessionKind;
use crate::state::{AppConfig, AppState};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds().max(0) as u64;

    let response = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: uptime,
        db_connected: db_ok,
    };

    Json(response)
}

/// Service status endpoint
pub async fn service_status(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.sessions().await;
    let ledger = state.sessions.ledger().stats().await;
    Json(json!({
        "service": "eagle-eye",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "live_sessions": sessions.len(),
        "connections": state.sessions.hub().connection_count(),
        "violations_recorded": ledger.committed,
        "violations_failed": ledger.failed,
    }))
}

/// Kind of a session key from a request path or query; unknown keys are `NotFound`
pub(crate) fn session_kind(key: &str) -> Result<SessionKind> {
    SessionKind::from_key(key).ok_or_else(|| Error::NotFound(format!("Unknown session: {}", key)))
}

/// Role from `Authorization: Bearer <token>` or a `token` query value
pub(crate) fn caller_role(headers: &HeaderMap, query_token: Option<&str>, config: &AppConfig) -> Role {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    Role::resolve(bearer.or(query_token), config.admin_token.as_deref())
}
