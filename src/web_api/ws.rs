//! Per-session WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::Result;
use crate::operator::{self, Command, Role};
use crate::realtime_hub::{HubMessage, StatusMessage};
use crate::session_worker::SessionKind;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse> {
    let kind = super::session_kind(&key)?;
    let role = super::caller_role(&headers, query.token.as_deref(), &state.config);
    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, state, key, kind, role)))
}

/// Handle WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    state: AppState,
    key: String,
    kind: SessionKind,
    role: Role,
) {
    let (mut sender, mut receiver) = socket.split();
    let sessions = state.sessions.clone();
    let hub = sessions.hub().clone();

    let (conn_id, mut rx) = hub.register(&key, role).await;

    // Greeting: status + current controls
    hub.send_to(
        &conn_id,
        HubMessage::Status(StatusMessage {
            status: "connected".to_string(),
            session_key: key.clone(),
            live: sessions.is_live(&key).await,
            role,
        }),
    )
    .await;
    hub.send_to(
        &conn_id,
        HubMessage::ControlsUpdate(sessions.current_controls(&key).await),
    )
    .await;

    if kind.starts_on_connect() {
        sessions.start(&key).await;
    }

    // Spawn task to forward messages from hub to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Inbound operator commands
    let recv_sessions = sessions.clone();
    let recv_key = key.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match Command::parse(&text) {
                    Ok(command) => {
                        let outcome =
                            operator::execute(&recv_sessions, &recv_key, role, command).await;
                        tracing::debug!(connection_id = %conn_id, outcome = ?outcome, "Command handled");
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %conn_id, error = %e, "Ignoring malformed command");
                    }
                },
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Last subscriber gone: stop the session
    if let Some((session_key, 0)) = hub.unregister(&conn_id).await {
        if sessions.stop(&session_key).await {
            tracing::info!(session_key = %session_key, "Last subscriber left; session stopping");
        }
    }
}
