//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::session_kind;
use crate::control_state::ControlState;
use crate::error::{Error, Result};
use crate::models::{ApiResponse, ControlUpdateRequest};
use crate::operator::{self, Command, CommandOutcome, Role};
use crate::session_worker::SUPERVISION_KEY;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::service_status))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:key/start", post(start_session))
        .route("/api/sessions/:key/stop", post(stop_session))
        .route("/api/sessions/:key/latest.jpg", get(latest_frame))
        // Controls
        .route("/api/controls", get(get_controls).put(update_controls))
        // Violations
        .route("/api/violations", get(list_violations))
        // Attendance
        .route("/api/attendance/today", get(todays_attendance))
        // WebSocket
        .route("/api/ws/:key", get(super::ws::websocket_handler))
        .with_state(state)
}

// ========================================
// Sessions
// ========================================

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.sessions().await;
    Json(ApiResponse::success(json!({
        "sessions": sessions,
        "total": sessions.len(),
    })))
}

async fn start_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    session_kind(&key)?;
    let outcome = operator::execute(&state.sessions, &key, Role::Invigilator, Command::Start).await;
    Ok(Json(ApiResponse::success(json!({
        "session_key": key,
        "started": outcome == CommandOutcome::Started,
    }))))
}

async fn stop_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    session_kind(&key)?;
    let outcome = operator::execute(&state.sessions, &key, Role::Invigilator, Command::Stop).await;
    Ok(Json(ApiResponse::success(json!({
        "session_key": key,
        "stop_requested": outcome == CommandOutcome::StopRequested,
    }))))
}

async fn latest_frame(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    session_kind(&key)?;
    let frame = state
        .sessions
        .latest_frame(&key)
        .await
        .ok_or_else(|| Error::NotFound(format!("No frame for session {}", key)))?;

    Ok((
        StatusCode::OK,
        [
            ("content-type", "image/jpeg"),
            ("cache-control", "no-cache, no-store, must-revalidate"),
        ],
        frame.jpeg,
    ))
}

// ========================================
// Controls
// ========================================

#[derive(Debug, Deserialize)]
struct ControlsQuery {
    session: Option<String>,
    token: Option<String>,
}

async fn get_controls(
    State(state): State<AppState>,
    Query(query): Query<ControlsQuery>,
) -> Result<Json<ApiResponse<ControlState>>> {
    let key = query.session.unwrap_or_else(|| SUPERVISION_KEY.to_string());
    session_kind(&key)?;
    let controls = state.sessions.current_controls(&key).await;
    Ok(Json(ApiResponse::success(controls)))
}

/// Non-admin updates are ignored (logged by the operator) and answered with the
/// unchanged snapshot
async fn update_controls(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ControlsQuery>,
    Json(body): Json<ControlUpdateRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    let key = query.session.unwrap_or_else(|| SUPERVISION_KEY.to_string());
    session_kind(&key)?;
    let role = super::caller_role(&headers, query.token.as_deref(), &state.config);

    let command = Command::UpdateControls {
        module: body.module,
        enabled: body.enabled,
    };
    let (snapshot, changed) = match operator::execute(&state.sessions, &key, role, command).await {
        CommandOutcome::ControlsChanged(snapshot) => (snapshot, true),
        CommandOutcome::ControlsUnchanged(snapshot) => (snapshot, false),
        CommandOutcome::Rejected => (state.sessions.current_controls(&key).await, false),
        other => return Err(Error::Internal(format!("Unexpected outcome: {:?}", other))),
    };

    Ok(Json(ApiResponse::success(json!({
        "controls": snapshot,
        "changed": changed,
    }))))
}

// ========================================
// Violations
// ========================================

#[derive(Debug, Deserialize)]
struct ViolationQuery {
    limit: Option<u32>,
    subject_id: Option<String>,
}

async fn list_violations(
    State(state): State<AppState>,
    Query(query): Query<ViolationQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let ledger = state.sessions.ledger();

    let violations = match &query.subject_id {
        Some(subject_id) => ledger.get_by_subject(subject_id, limit).await?,
        None => ledger.get_latest(limit).await?,
    };

    Ok(Json(ApiResponse::success(json!({
        "violations": violations,
        "total": violations.len(),
        "filter": {
            "subject_id": query.subject_id,
            "limit": limit,
        }
    }))))
}

// ========================================
// Attendance
// ========================================

async fn todays_attendance(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let dir = state.sessions.attendance_dir().to_path_buf();
    let today = chrono::Local::now().date_naive();

    let rows = tokio::task::spawn_blocking(move || crate::attendance_log::read_day(&dir, today))
        .await
        .map_err(|e| Error::Internal(format!("Attendance read task failed: {}", e)))??;

    Ok(Json(ApiResponse::success(json!({
        "date": today.format("%Y-%m-%d").to_string(),
        "entries": rows,
        "total": rows.len(),
    }))))
}
