//! SessionRegistry - live worker bookkeeping

use crate::capture::Frame;
use crate::control_state::{ControlState, ControlStateStore};
use crate::session_worker::{SessionContext, StopSignal, WorkerState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// How long `shutdown_all` waits for each worker
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Handle to one spawned worker
pub struct SessionHandle {
    pub session_key: String,
    stop: StopSignal,
    task: JoinHandle<WorkerState>,
    state: watch::Receiver<WorkerState>,
    last_frame: watch::Receiver<Option<Frame>>,
    started_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Live until the worker task has returned
    pub fn is_live(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }
}

/// Session listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_key: String,
    pub state: WorkerState,
    pub started_at: DateTime<Utc>,
    pub stop_requested: bool,
}

#[derive(Default)]
struct RegistryInner {
    handles: HashMap<String, SessionHandle>,
    /// Per-key control stores; outlive individual workers
    controls: HashMap<String, Arc<ControlStateStore>>,
}

impl RegistryInner {
    fn controls_for(&mut self, key: &str) -> Arc<ControlStateStore> {
        self.controls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(ControlStateStore::new()))
            .clone()
    }
}

/// SessionRegistry instance
///
/// All bookkeeping sits behind one mutex; the check, reap and spawn of `ensure_started`
/// happen under a single acquisition.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a worker for `key` via `factory` unless one is live
    ///
    /// Returns true if a new worker was spawned.
    pub async fn ensure_started<F>(&self, key: &str, factory: F) -> bool
    where
        F: FnOnce(SessionContext) -> JoinHandle<WorkerState>,
    {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.handles.get(key) {
            if existing.is_live() {
                return false;
            }
            tracing::debug!(session_key = %key, state = ?existing.state(), "Reaping finished session");
        }
        inner.handles.remove(key);

        let controls = inner.controls_for(key);
        let stop = StopSignal::new();
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let (frame_tx, frame_rx) = watch::channel(None);

        let task = factory(SessionContext {
            session_key: key.to_string(),
            stop: stop.clone(),
            controls,
            state: state_tx,
            last_frame: frame_tx,
        });

        inner.handles.insert(
            key.to_string(),
            SessionHandle {
                session_key: key.to_string(),
                stop,
                task,
                state: state_rx,
                last_frame: frame_rx,
                started_at: Utc::now(),
            },
        );

        tracing::info!(session_key = %key, "Session started");
        true
    }

    /// Ask the live worker for `key` to stop. Unknown keys are a no-op.
    pub async fn request_stop(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        match inner.handles.get(key) {
            Some(handle) if handle.is_live() => {
                handle.stop.request();
                tracing::info!(session_key = %key, "Session stop requested");
                true
            }
            _ => false,
        }
    }

    pub async fn is_live(&self, key: &str) -> bool {
        self.inner
            .lock()
            .await
            .handles
            .get(key)
            .map(|h| h.is_live())
            .unwrap_or(false)
    }

    /// Live sessions, sorted by key
    pub async fn live_sessions(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<SessionInfo> = inner
            .handles
            .values()
            .filter(|h| h.is_live())
            .map(|h| SessionInfo {
                session_key: h.session_key.clone(),
                state: h.state(),
                started_at: h.started_at,
                stop_requested: h.stop.is_requested(),
            })
            .collect();
        sessions.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        sessions
    }

    /// Current controls of `key` without creating a store (defaults if none exists)
    pub async fn current_controls(&self, key: &str) -> ControlState {
        self.inner
            .lock()
            .await
            .controls
            .get(key)
            .map(|store| store.get())
            .unwrap_or_default()
    }

    /// Control store for `key`, created on first use
    pub async fn controls(&self, key: &str) -> Arc<ControlStateStore> {
        self.inner.lock().await.controls_for(key)
    }

    /// Last frame the worker for `key` processed
    pub async fn latest_frame(&self, key: &str) -> Option<Frame> {
        let inner = self.inner.lock().await;
        let handle = inner.handles.get(key)?;
        let frame = handle.last_frame.borrow().clone();
        frame
    }

    /// Stop every worker and wait for it to finish
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut inner = self.inner.lock().await;
            inner.handles.drain().map(|(_, h)| h).collect()
        };

        for handle in &handles {
            handle.stop.request();
        }
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_WAIT, handle.task).await {
                Ok(Ok(state)) => {
                    tracing::info!(session_key = %handle.session_key, state = ?state, "Session shut down")
                }
                Ok(Err(e)) => {
                    tracing::error!(session_key = %handle.session_key, error = %e, "Session task failed")
                }
                Err(_) => {
                    tracing::warn!(session_key = %handle.session_key, "Session did not stop in time")
                }
            }
        }
    }
}
