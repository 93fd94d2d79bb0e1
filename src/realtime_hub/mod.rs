//! RealtimeHub - WebSocket Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management, grouped by session key
//! - Event broadcasting to every subscriber of one session
//! - Direct replies to a single connection (status/controls on connect)
//!
//! Messages are serialized once per broadcast and pushed through a bounded channel per
//! connection; the socket task drains it. At most one `frame` is queued per connection:
//! newer frames are dropped until the client has taken the queued one. Other events are
//! dropped only when a client stops draining altogether.

use crate::alert_engine::Alert;
use crate::attendance_log::AttendanceEntry;
use crate::control_state::ControlState;
use crate::detectors::{BoundingBox, IdentityObservation, ObjectObservation};
use crate::operator::Role;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    Status(StatusMessage),
    ControlsUpdate(ControlState),
    Frame(FrameMessage),
    Alert(Alert),
    Started(LifecycleMessage),
    Stopping(LifecycleMessage),
    Terminated(LifecycleMessage),
    Error(ErrorMessage),
    AttendanceUpdate(AttendanceEntry),
}

impl HubMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            HubMessage::Status(_) => "status",
            HubMessage::ControlsUpdate(_) => "controls_update",
            HubMessage::Frame(_) => "frame",
            HubMessage::Alert(_) => "alert",
            HubMessage::Started(_) => "started",
            HubMessage::Stopping(_) => "stopping",
            HubMessage::Terminated(_) => "terminated",
            HubMessage::Error(_) => "error",
            HubMessage::AttendanceUpdate(_) => "attendance_update",
        }
    }

    pub fn lifecycle(session_key: &str) -> LifecycleMessage {
        LifecycleMessage {
            session_key: session_key.to_string(),
        }
    }
}

/// Sent to a client right after it connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub session_key: String,
    /// Whether a worker is currently live for the session
    pub live: bool,
    pub role: Role,
}

/// One published frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Base64 JPEG
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    /// Boxes to draw over the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<Detection>,
    /// At least one alert was raised on this frame
    #[serde(default)]
    pub alert: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Face,
    Object,
}

/// One annotated region of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub kind: DetectionKind,
    /// Display name for faces, class label for objects
    pub label: String,
    pub bbox: BoundingBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Highlight as suspicious (unknown face, prohibited object)
    pub alert: bool,
}

impl Detection {
    pub fn face(identity: &IdentityObservation) -> Self {
        Self {
            kind: DetectionKind::Face,
            label: identity.display_name.clone(),
            bbox: identity.bbox,
            confidence: None,
            alert: identity.is_unknown(),
        }
    }

    pub fn object(object: &ObjectObservation) -> Self {
        Self {
            kind: DetectionKind::Object,
            label: object.label.clone(),
            bbox: object.bbox,
            confidence: Some(object.confidence),
            alert: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMessage {
    pub session_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Messages a connection may have queued before further ones are dropped
pub const CLIENT_QUEUE: usize = 256;

#[derive(Debug)]
struct Outbound {
    json: String,
    frame: bool,
}

/// Receiving half of one connection
pub struct ClientReceiver {
    rx: mpsc::Receiver<Outbound>,
    frame_pending: Arc<AtomicBool>,
}

impl ClientReceiver {
    pub async fn recv(&mut self) -> Option<String> {
        let out = self.rx.recv().await?;
        Some(self.take(out))
    }

    pub fn try_recv(&mut self) -> Result<String, TryRecvError> {
        let out = self.rx.try_recv()?;
        Ok(self.take(out))
    }

    fn take(&self, out: Outbound) -> String {
        if out.frame {
            self.frame_pending.store(false, Ordering::Release);
        }
        out.json
    }
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    session_key: String,
    role: Role,
    tx: mpsc::Sender<Outbound>,
    frame_pending: Arc<AtomicBool>,
}

impl ClientConnection {
    /// Queue one message without waiting. Returns false if it was dropped.
    fn deliver(&self, json: &str, frame: bool) -> bool {
        if frame && self.frame_pending.swap(true, Ordering::AcqRel) {
            tracing::trace!(connection_id = %self.id, "Client still has a frame queued; frame dropped");
            return false;
        }

        let out = Outbound {
            json: json.to_string(),
            frame,
        };
        match self.tx.try_send(out) {
            Ok(()) => true,
            Err(e) => {
                if frame {
                    self.frame_pending.store(false, Ordering::Release);
                }
                match e {
                    TrySendError::Full(_) => {
                        tracing::warn!(connection_id = %self.id, "Client queue full; message dropped")
                    }
                    TrySendError::Closed(_) => {
                        tracing::debug!(connection_id = %self.id, "Client channel closed")
                    }
                }
                false
            }
        }
    }
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client on `session_key`
    pub async fn register(
        &self,
        session_key: &str,
        role: Role,
    ) -> (Uuid, ClientReceiver) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let frame_pending = Arc::new(AtomicBool::new(false));

        let conn = ClientConnection {
            id,
            session_key: session_key.to_string(),
            role,
            tx,
            frame_pending: frame_pending.clone(),
        };

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, session_key = %session_key, role = ?role, "Client connected");

        (id, ClientReceiver { rx, frame_pending })
    }

    /// Unregister a client
    ///
    /// Returns the session key and how many subscribers it still has, or `None` for an
    /// unknown connection.
    pub async fn unregister(&self, id: &Uuid) -> Option<(String, usize)> {
        let mut connections = self.connections.write().await;
        let conn = connections.remove(id)?;
        self.connection_count.fetch_sub(1, Ordering::Relaxed);

        let remaining = connections
            .values()
            .filter(|c| c.session_key == conn.session_key)
            .count();
        tracing::info!(
            connection_id = %id,
            session_key = %conn.session_key,
            remaining = remaining,
            "Client disconnected"
        );

        Some((conn.session_key, remaining))
    }

    /// Broadcast message to every client of `session_key`
    pub async fn broadcast(&self, session_key: &str, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let is_frame = matches!(message, HubMessage::Frame(_));
        let connections = self.connections.read().await;
        let sent = connections
            .values()
            .filter(|c| c.session_key == session_key)
            .filter(|c| c.deliver(&json, is_frame))
            .count();

        // Frames are too frequent for debug
        if is_frame {
            tracing::trace!(session_key = %session_key, client_count = sent, "Frame broadcast");
        } else {
            tracing::debug!(
                session_key = %session_key,
                message_type = message.type_name(),
                client_count = sent,
                "Broadcasting message to clients"
            );
        }
    }

    /// Send message to one connection
    pub async fn send_to(&self, id: &Uuid, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(id) {
            conn.deliver(&json, matches!(message, HubMessage::Frame(_)));
        }
    }

    /// Role of a connection
    pub async fn role_of(&self, id: &Uuid) -> Option<Role> {
        self.connections.read().await.get(id).map(|c| c.role)
    }

    /// Number of subscribers of `session_key`
    pub async fn subscriber_count(&self, session_key: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.session_key == session_key)
            .count()
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}
