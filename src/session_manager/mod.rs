//! SessionManager - Session lifecycle
//!
//! ## Responsibilities
//!
//! - Idempotent start/stop of workers by session key (at most one live worker per key)
//! - Per-key control state shared with the worker
//! - Session listing and latest-frame lookup for the API

mod registry;

pub use registry::{SessionHandle, SessionInfo, SessionRegistry};

use crate::capture::Frame;
use crate::control_state::{ControlState, ControlStateStore};
use crate::realtime_hub::RealtimeHub;
use crate::session_worker::{self, SessionKind, WorkerDeps};
use crate::violation_ledger::ViolationLedger;
use std::path::Path;
use std::sync::Arc;

/// SessionManager instance
pub struct SessionManager {
    registry: SessionRegistry,
    deps: Arc<WorkerDeps>,
}

impl SessionManager {
    pub fn new(deps: Arc<WorkerDeps>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            deps,
        }
    }

    /// Start the worker for `key` unless one is live
    ///
    /// Keys no worker serves are refused.
    pub async fn start(&self, key: &str) -> bool {
        if SessionKind::from_key(key).is_none() {
            tracing::warn!(session_key = %key, "Refusing to start unknown session");
            return false;
        }
        let deps = self.deps.clone();
        self.registry
            .ensure_started(key, move |ctx| session_worker::spawn(deps, ctx))
            .await
    }

    /// Request the worker for `key` to stop
    pub async fn stop(&self, key: &str) -> bool {
        self.registry.request_stop(key).await
    }

    pub async fn is_live(&self, key: &str) -> bool {
        self.registry.is_live(key).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.live_sessions().await
    }

    pub async fn controls(&self, key: &str) -> Arc<ControlStateStore> {
        self.registry.controls(key).await
    }

    /// Read-only view of the controls of `key`
    pub async fn current_controls(&self, key: &str) -> ControlState {
        self.registry.current_controls(key).await
    }

    pub async fn latest_frame(&self, key: &str) -> Option<Frame> {
        self.registry.latest_frame(key).await
    }

    pub async fn shutdown_all(&self) {
        self.registry.shutdown_all().await
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.deps.hub
    }

    pub fn ledger(&self) -> &Arc<ViolationLedger> {
        &self.deps.ledger
    }

    pub fn attendance_dir(&self) -> &Path {
        &self.deps.attendance_dir
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::capture::CaptureSource;
    use crate::session_worker::testing::null_deps;

    /// Manager over null detectors with a fast loop
    pub async fn manager(capture: Arc<dyn CaptureSource>, dir: &Path) -> SessionManager {
        let hub = Arc::new(RealtimeHub::new());
        SessionManager::new(Arc::new(null_deps(capture, hub, dir).await))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::manager;
    use super::*;
    use crate::capture::testing::ScriptedSource;
    use crate::operator::Role;
    use crate::session_worker::testing::collect_until;
    use crate::session_worker::WorkerState;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_double_start_opens_camera_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::frames();
        let opened = source.opened.clone();
        let manager = Arc::new(manager(Arc::new(source), dir.path()).await);

        let (a, b) = tokio::join!(manager.start("supervision"), manager.start("supervision"));
        assert!(a ^ b);

        // Let the worker acquire the device
        let (_id, mut rx) = manager.hub().register("supervision", Role::Admin).await;
        collect_until(&mut rx, "frame").await;
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_failed_worker_can_be_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames().failing_open()), dir.path()).await;
        let (_id, mut rx) = manager.hub().register("supervision", Role::Admin).await;

        assert!(manager.start("supervision").await);
        collect_until(&mut rx, "error").await;
        for _ in 0..500 {
            if !manager.is_live("supervision").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!manager.is_live("supervision").await);

        // Dead handle is reaped, a new attempt spawns
        assert!(manager.start("supervision").await);
        collect_until(&mut rx, "error").await;
    }

    #[tokio::test]
    async fn test_unknown_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::frames();
        let opened = source.opened.clone();
        let manager = manager(Arc::new(source), dir.path()).await;

        assert!(!manager.start("room-101").await);
        assert!(!manager.is_live("room-101").await);
        assert!(manager.sessions().await.is_empty());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_latest_frame_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Arc::new(ScriptedSource::frames()), dir.path()).await;
        let (_id, mut rx) = manager.hub().register("registration", Role::Invigilator).await;

        manager.start("registration").await;
        collect_until(&mut rx, "frame").await;
        collect_until(&mut rx, "frame").await;

        assert!(manager.latest_frame("registration").await.is_some());
        let sessions = manager.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_key, "registration");
        assert_eq!(sessions[0].state, WorkerState::Running);

        manager.stop("registration").await;
        collect_until(&mut rx, "terminated").await;
        manager.shutdown_all().await;
    }
}
