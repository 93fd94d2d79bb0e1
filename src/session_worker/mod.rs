//! SessionWorker - One capture loop per session key
//!
//! ## Responsibilities
//!
//! - Acquire the capture device (failure ends the session in `Failed`)
//! - Drive the frame loop: read, process, publish, pace, check the stop signal
//! - Release the device on every exit path and publish `terminated` last
//!
//! What happens to each frame depends on the session kind (see `processors`).

mod processors;

pub use processors::{
    AttendanceProcessor, FrameOutcome, FrameProcessor, RegistrationProcessor,
    SupervisionProcessor,
};

use crate::capture::{CaptureDevice, CaptureSource, Frame};
use crate::control_state::ControlStateStore;
use crate::detectors::{AudioSource, Detectors};
use crate::realtime_hub::{ErrorMessage, FrameMessage, HubMessage, RealtimeHub};
use crate::violation_ledger::{EvidenceStore, ViolationLedger};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Session key served by the attendance worker
pub const ATTENDANCE_KEY: &str = "attendance";
/// Session key served by the registration preview worker
pub const REGISTRATION_KEY: &str = "registration";
/// Default supervision session key
pub const SUPERVISION_KEY: &str = "supervision";

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl WorkerState {
    pub fn is_final(&self) -> bool {
        matches!(self, WorkerState::Terminated | WorkerState::Failed)
    }
}

/// What a session key runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Supervision,
    Attendance,
    Registration,
}

impl SessionKind {
    /// Kind served by `key`; `None` for keys no worker serves
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            SUPERVISION_KEY => Some(SessionKind::Supervision),
            ATTENDANCE_KEY => Some(SessionKind::Attendance),
            REGISTRATION_KEY => Some(SessionKind::Registration),
            _ => None,
        }
    }

    /// Attendance and registration start with their first subscriber
    pub fn starts_on_connect(&self) -> bool {
        !matches!(self, SessionKind::Supervision)
    }
}

/// Cooperative stop flag, checked once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop timing and alert settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pacing sleep after each processed frame
    pub frame_interval: Duration,
    /// Wait after an empty or failed read
    pub empty_read_backoff: Duration,
    /// Alert cooldown window (0 = off)
    pub alert_cooldown_sec: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(30),
            empty_read_backoff: Duration::from_millis(100),
            alert_cooldown_sec: 0,
        }
    }
}

/// Everything a worker needs besides its own session context
pub struct WorkerDeps {
    pub capture: Arc<dyn CaptureSource>,
    pub detectors: Detectors,
    pub audio: Arc<dyn AudioSource>,
    pub ledger: Arc<ViolationLedger>,
    pub evidence: Arc<EvidenceStore>,
    pub hub: Arc<RealtimeHub>,
    pub attendance_dir: PathBuf,
    pub config: WorkerConfig,
}

/// Per-session handles created by the registry
pub struct SessionContext {
    pub session_key: String,
    pub stop: StopSignal,
    pub controls: Arc<ControlStateStore>,
    pub state: watch::Sender<WorkerState>,
    pub last_frame: watch::Sender<Option<Frame>>,
}

/// Spawn the worker for `ctx.session_key`
pub fn spawn(deps: Arc<WorkerDeps>, ctx: SessionContext) -> JoinHandle<WorkerState> {
    tokio::spawn(run(deps, ctx))
}

/// Run the worker matching the session kind to completion
pub async fn run(deps: Arc<WorkerDeps>, ctx: SessionContext) -> WorkerState {
    let processor: Box<dyn FrameProcessor> = match SessionKind::from_key(&ctx.session_key) {
        Some(SessionKind::Supervision) => Box::new(SupervisionProcessor::new(deps.clone())),
        Some(SessionKind::Attendance) => Box::new(AttendanceProcessor::new(deps.clone())),
        Some(SessionKind::Registration) => Box::new(RegistrationProcessor),
        None => {
            tracing::error!(session_key = %ctx.session_key, "No worker serves this session key");
            publish_error(&deps.hub, &ctx.session_key, "Unknown session").await;
            ctx.state.send_replace(WorkerState::Failed);
            return WorkerState::Failed;
        }
    };
    SessionWorker::new(deps, ctx, processor).run().await
}

/// SessionWorker instance
pub struct SessionWorker {
    deps: Arc<WorkerDeps>,
    ctx: SessionContext,
    processor: Box<dyn FrameProcessor>,
}

impl SessionWorker {
    pub fn new(
        deps: Arc<WorkerDeps>,
        ctx: SessionContext,
        processor: Box<dyn FrameProcessor>,
    ) -> Self {
        Self {
            deps,
            ctx,
            processor,
        }
    }

    pub async fn run(mut self) -> WorkerState {
        let key = self.ctx.session_key.clone();
        let hub = self.deps.hub.clone();
        self.set_state(WorkerState::Starting);

        let mut device = match self.deps.capture.open().await {
            Ok(device) => device,
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "Failed to acquire capture device");
                publish_error(&hub, &key, "Cannot open camera").await;
                return self.set_state(WorkerState::Failed);
            }
        };

        if let Err(e) = self.processor.on_start(&self.ctx).await {
            tracing::error!(session_key = %key, error = %e, "Failed to start session");
            publish_error(&hub, &key, "Failed to start session").await;
            release(&key, device.as_mut()).await;
            return self.set_state(WorkerState::Failed);
        }

        self.set_state(WorkerState::Running);
        tracing::info!(session_key = %key, "Session worker running");
        hub.broadcast(&key, HubMessage::Started(HubMessage::lifecycle(&key)))
            .await;

        let outcome = AssertUnwindSafe(self.frame_loop(device.as_mut()))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            tracing::error!(session_key = %key, "Frame loop panicked; cleaning up");
        }

        self.set_state(WorkerState::Stopping);
        hub.broadcast(&key, HubMessage::Stopping(HubMessage::lifecycle(&key)))
            .await;

        self.processor.on_stop().await;
        release(&key, device.as_mut()).await;

        hub.broadcast(&key, HubMessage::Terminated(HubMessage::lifecycle(&key)))
            .await;
        tracing::info!(session_key = %key, "Session worker terminated");
        self.set_state(WorkerState::Terminated)
    }

    async fn frame_loop(&mut self, device: &mut dyn CaptureDevice) {
        let config = self.deps.config.clone();
        let hub = self.deps.hub.clone();
        let key = self.ctx.session_key.clone();
        let mut prev_frame_at: Option<Instant> = None;

        while !self.ctx.stop.is_requested() {
            let frame = match device.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tokio::time::sleep(config.empty_read_backoff).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(session_key = %key, error = %e, "Frame read failed");
                    tokio::time::sleep(config.empty_read_backoff).await;
                    continue;
                }
            };

            let outcome = self.processor.process(&frame, &self.ctx).await;
            for event in outcome.events {
                hub.broadcast(&key, event).await;
            }

            let now = Instant::now();
            let fps = prev_frame_at
                .map(|prev| {
                    let secs = now.duration_since(prev).as_secs_f64();
                    if secs > 0.0 {
                        (1.0 / secs) as u32
                    } else {
                        0
                    }
                })
                .unwrap_or(0);
            prev_frame_at = Some(now);

            hub.broadcast(
                &key,
                HubMessage::Frame(FrameMessage {
                    image: frame.to_base64(),
                    face_count: outcome.face_count,
                    alerts_count: outcome.alerts_count,
                    fps: outcome.report_fps.then_some(fps),
                    alert: outcome.alerts_count.unwrap_or(0) > 0,
                    detections: outcome.detections,
                }),
            )
            .await;

            self.ctx.last_frame.send_replace(Some(frame));

            tokio::time::sleep(config.frame_interval).await;
        }
    }

    fn set_state(&self, state: WorkerState) -> WorkerState {
        self.ctx.state.send_replace(state);
        state
    }
}

async fn release(key: &str, device: &mut dyn CaptureDevice) {
    if let Err(e) = device.release().await {
        tracing::warn!(session_key = %key, error = %e, "Failed to release capture device");
    }
}

async fn publish_error(hub: &RealtimeHub, key: &str, message: &str) {
    hub.broadcast(
        key,
        HubMessage::Error(ErrorMessage {
            message: message.to_string(),
        }),
    )
    .await;
}
