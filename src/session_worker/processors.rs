//! Per-kind frame processing

use super::{SessionContext, WorkerDeps};
use crate::alert_engine::{self, AlertCooldown};
use crate::attendance_log::AttendanceLog;
use crate::capture::Frame;
use crate::control_state::ControlState;
use crate::detectors::{AudioMonitor, FrameObservations};
use crate::error::Result;
use crate::realtime_hub::{Detection, HubMessage};
use crate::violation_ledger::NO_SUBJECT;
use async_trait::async_trait;
use chrono::{Local, Utc};
use std::sync::Arc;

/// Result of processing one frame
///
/// `events` are published in order, before the frame itself.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub events: Vec<HubMessage>,
    pub face_count: Option<usize>,
    pub alerts_count: Option<usize>,
    /// Regions to annotate on the published frame
    pub detections: Vec<Detection>,
    pub report_fps: bool,
}

/// Session-kind specific part of the worker
#[async_trait]
pub trait FrameProcessor: Send {
    /// Called once after the capture device is acquired; an error fails the session
    async fn on_start(&mut self, _ctx: &SessionContext) -> Result<()> {
        Ok(())
    }

    async fn process(&mut self, frame: &Frame, ctx: &SessionContext) -> FrameOutcome;

    /// Called once on the way out, before the capture device is released
    async fn on_stop(&mut self) {}
}

/// Full detection + fusion + ledger pipeline
pub struct SupervisionProcessor {
    deps: Arc<WorkerDeps>,
    audio: Option<Box<dyn AudioMonitor>>,
    cooldown: AlertCooldown,
}

impl SupervisionProcessor {
    pub fn new(deps: Arc<WorkerDeps>) -> Self {
        let cooldown = AlertCooldown::new(deps.config.alert_cooldown_sec);
        Self {
            deps,
            audio: None,
            cooldown,
        }
    }

    async fn observe(
        deps: &WorkerDeps,
        frame: &Frame,
        controls: ControlState,
        ctx: &SessionContext,
    ) -> Option<FrameObservations> {
        let detectors = deps.detectors.clone();
        let frame = frame.clone();

        match tokio::task::spawn_blocking(move || detectors.observe(&frame, &controls)).await {
            Ok(observations) => Some(observations),
            Err(e) => {
                tracing::error!(session_key = %ctx.session_key, error = %e, "Detector task failed");
                None
            }
        }
    }
}

#[async_trait]
impl FrameProcessor for SupervisionProcessor {
    async fn on_start(&mut self, ctx: &SessionContext) -> Result<()> {
        let mut monitor = self.deps.audio.monitor();
        match monitor.start() {
            Ok(()) => self.audio = Some(monitor),
            Err(e) => {
                tracing::warn!(
                    session_key = %ctx.session_key,
                    error = %e,
                    "Audio monitor unavailable; audio detection disabled for this session"
                );
            }
        }
        Ok(())
    }

    async fn process(&mut self, frame: &Frame, ctx: &SessionContext) -> FrameOutcome {
        // One snapshot per frame, shared by detectors and fusion
        let controls = ctx.controls.get();
        let observations = match Self::observe(&self.deps, frame, controls, ctx).await {
            Some(observations) => observations,
            // Skip fusion rather than report an empty room
            None => {
                return FrameOutcome {
                    report_fps: true,
                    ..Default::default()
                }
            }
        };

        let sound_sustained = controls.audio
            && self
                .audio
                .as_ref()
                .map(|monitor| monitor.sound_sustained())
                .unwrap_or(false);

        let alerts = alert_engine::evaluate(
            &observations.identities,
            &observations.objects,
            &observations.gaze,
            observations.posture_suspicious,
            sound_sustained,
            &controls,
            Utc::now(),
        );
        let alerts = self.cooldown.filter(alerts);

        let mut events = Vec::with_capacity(alerts.len());
        for alert in &alerts {
            if alert.is_high() {
                let evidence = self.deps.evidence.capture_best_effort(alert, frame).await;
                let subject = alert.subject_id.as_deref().unwrap_or(NO_SUBJECT);
                self.deps
                    .ledger
                    .record(alert, subject, evidence.as_deref())
                    .await;
            }
            tracing::debug!(
                session_key = %ctx.session_key,
                kind = %alert.kind,
                severity = alert.severity.as_str(),
                message = %alert.message,
                "Alert raised"
            );
            events.push(HubMessage::Alert(alert.clone()));
        }

        let detections = observations
            .identities
            .iter()
            .map(Detection::face)
            .chain(observations.objects.iter().map(Detection::object))
            .collect();

        FrameOutcome {
            face_count: Some(observations.identities.len()),
            alerts_count: Some(alerts.len()),
            detections,
            events,
            report_fps: true,
        }
    }

    async fn on_stop(&mut self) {
        if let Some(mut monitor) = self.audio.take() {
            // Stopping waits on the capture process and its reader thread
            match tokio::task::spawn_blocking(move || monitor.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to stop audio monitor"),
                Err(e) => tracing::error!(error = %e, "Audio monitor stop task failed"),
            }
        }
    }
}

/// Identity-only worker marking daily attendance
pub struct AttendanceProcessor {
    deps: Arc<WorkerDeps>,
    log: Option<AttendanceLog>,
}

impl AttendanceProcessor {
    pub fn new(deps: Arc<WorkerDeps>) -> Self {
        Self { deps, log: None }
    }
}

#[async_trait]
impl FrameProcessor for AttendanceProcessor {
    async fn on_start(&mut self, _ctx: &SessionContext) -> Result<()> {
        self.log = Some(AttendanceLog::open(self.deps.attendance_dir.clone())?);
        Ok(())
    }

    async fn process(&mut self, frame: &Frame, ctx: &SessionContext) -> FrameOutcome {
        let identity = self.deps.detectors.identity.clone();
        let owned = frame.clone();
        let identities = match tokio::task::spawn_blocking(move || identity.identify(&owned)).await
        {
            Ok(identities) => identities,
            Err(e) => {
                tracing::error!(session_key = %ctx.session_key, error = %e, "Identity task failed");
                Vec::new()
            }
        };

        let mut events = Vec::new();
        if let Some(log) = self.log.as_mut() {
            for person in identities.iter().filter(|p| !p.is_unknown()) {
                match log.mark(&person.subject_id, &person.display_name, Local::now()) {
                    Ok(Some(entry)) => events.push(HubMessage::AttendanceUpdate(entry)),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            session_key = %ctx.session_key,
                            roll_number = %person.subject_id,
                            error = %e,
                            "Failed to write attendance"
                        );
                    }
                }
            }
        }

        FrameOutcome {
            events,
            face_count: Some(identities.len()),
            alerts_count: None,
            detections: identities.iter().map(Detection::face).collect(),
            report_fps: false,
        }
    }
}

/// Frame-only preview for enrollment
pub struct RegistrationProcessor;

#[async_trait]
impl FrameProcessor for RegistrationProcessor {
    async fn process(&mut self, _frame: &Frame, _ctx: &SessionContext) -> FrameOutcome {
        FrameOutcome::default()
    }
}
