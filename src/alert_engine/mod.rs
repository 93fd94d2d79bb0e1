//! AlertEngine - Fusion of per-frame observations into alerts
//!
//! ## Responsibilities
//!
//! - Turn one frame's detector outputs plus control state into ranked alerts
//! - Stay pure: no I/O, no clock reads (the timestamp is an argument)
//!
//! ## Rule order (fan-out, every matching rule fires)
//!
//! | # | condition                               | kind     | severity |
//! |---|-----------------------------------------|----------|----------|
//! | 1 | no identity                             | Identity | high     |
//! | 2 | more than one identity                  | Identity | high     |
//! | 3 | primary identity is Unknown             | Identity | high     |
//! | 4 | each object (object enabled)            | Object   | high     |
//! | 5 | first non-Center gaze (gaze enabled)    | Behavior | medium   |
//! | 6 | posture suspicious (posture enabled)    | Behavior | medium   |
//! | 7 | sound sustained (audio enabled)         | Audio    | low      |
//!
//! Rules 3-6 need at least one identity. Every non-identity alert is attributed to
//! `identities[0]`; multi-person attribution is not attempted.

pub mod cooldown;

pub use cooldown::AlertCooldown;

use crate::control_state::ControlState;
use crate::detectors::{
    GazeDirection, GazeObservation, IdentityObservation, ObjectObservation, UNKNOWN_SUBJECT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    Identity,
    Object,
    Behavior,
    Audio,
}

impl AlertKind {
    /// Violation type label stored in the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Identity => "Identity Alert",
            AlertKind::Object => "Object Alert",
            AlertKind::Behavior => "Behavior Alert",
            AlertKind::Audio => "Audio Alert",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert priority. Only `High` is persisted with evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// One derived alert. Compared by content; there is no alert id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl Alert {
    fn new(timestamp: DateTime<Utc>, kind: AlertKind, severity: Severity, message: String) -> Self {
        Self {
            timestamp,
            kind,
            message,
            detail: None,
            severity,
            subject_id: None,
        }
    }

    fn for_subject(mut self, subject_id: &str) -> Self {
        self.detail = Some(format!("Associated with person: {}", subject_id));
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn is_high(&self) -> bool {
        self.severity == Severity::High
    }

    /// Text stored as violation details
    pub fn details_text(&self) -> String {
        self.detail.clone().unwrap_or_else(|| self.message.clone())
    }
}

/// Evaluate all rules for one frame
pub fn evaluate(
    identities: &[IdentityObservation],
    objects: &[ObjectObservation],
    gaze: &[GazeObservation],
    posture_suspicious: bool,
    sound_sustained: bool,
    controls: &ControlState,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    match identities.len() {
        0 => alerts.push(Alert::new(
            now,
            AlertKind::Identity,
            Severity::High,
            "No person detected in the frame.".to_string(),
        )),
        1 => {}
        n => alerts.push(Alert::new(
            now,
            AlertKind::Identity,
            Severity::High,
            format!("Multiple people ({}) detected in the frame.", n),
        )),
    }

    if let Some(primary) = identities.first() {
        let subject = primary.subject_id.as_str();

        if primary.is_unknown() {
            let mut alert = Alert::new(
                now,
                AlertKind::Identity,
                Severity::High,
                "An unknown person has been detected.".to_string(),
            );
            alert.subject_id = Some(UNKNOWN_SUBJECT.to_string());
            alerts.push(alert);
        }

        if controls.object {
            for obj in objects {
                alerts.push(
                    Alert::new(
                        now,
                        AlertKind::Object,
                        Severity::High,
                        format!("Prohibited object detected: {}", obj.label),
                    )
                    .for_subject(subject),
                );
            }
        }

        if controls.gaze {
            // One gaze alert per frame, at the first person looking away
            if let Some(away) = gaze.iter().find(|g| g.direction != GazeDirection::Center) {
                alerts.push(
                    Alert::new(
                        now,
                        AlertKind::Behavior,
                        Severity::Medium,
                        format!("Suspicious gaze detected: {}", away.direction.as_str()),
                    )
                    .for_subject(subject),
                );
            }
        }

        if controls.posture && posture_suspicious {
            alerts.push(
                Alert::new(
                    now,
                    AlertKind::Behavior,
                    Severity::Medium,
                    "Suspicious posture (e.g., head tilt) detected.".to_string(),
                )
                .for_subject(subject),
            );
        }
    }

    if controls.audio && sound_sustained {
        alerts.push(Alert::new(
            now,
            AlertKind::Audio,
            Severity::Low,
            "Potential conversation or whisper detected.".to_string(),
        ));
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap()
    }

    fn person(id: &str) -> IdentityObservation {
        IdentityObservation::new(id, id)
    }

    fn gaze(direction: GazeDirection) -> GazeObservation {
        GazeObservation::new(direction)
    }

    fn all_on() -> ControlState {
        ControlState::default()
    }

    fn all_off() -> ControlState {
        ControlState {
            audio: false,
            gaze: false,
            object: false,
            posture: false,
        }
    }

    #[test]
    fn test_normal_frame_has_no_alerts() {
        let alerts = evaluate(
            &[person("S1")],
            &[],
            &[gaze(GazeDirection::Center)],
            false,
            false,
            &all_on(),
            now(),
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_phone_detected() {
        let alerts = evaluate(
            &[person("S1")],
            &[ObjectObservation::new("cell phone", 0.85)],
            &[gaze(GazeDirection::Center)],
            false,
            false,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Object);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].subject_id.as_deref(), Some("S1"));
        assert_eq!(alerts[0].message, "Prohibited object detected: cell phone");
        assert_eq!(
            alerts[0].detail.as_deref(),
            Some("Associated with person: S1")
        );
    }

    #[test]
    fn test_empty_frame_single_identity_alert() {
        let alerts = evaluate(&[], &[], &[], false, false, &all_on(), now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Identity);
        assert_eq!(alerts[0].severity, Severity::High);
        assert!(alerts[0].message.starts_with("No person"));
    }

    #[test]
    fn test_empty_frame_never_object_or_behavior() {
        // Observations present but no identity: rules 3-6 cannot fire
        let alerts = evaluate(
            &[],
            &[ObjectObservation::new("cell phone", 0.9)],
            &[gaze(GazeDirection::Left)],
            true,
            false,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 1);
        assert!(alerts
            .iter()
            .all(|a| a.kind != AlertKind::Object && a.kind != AlertKind::Behavior));
    }

    #[test]
    fn test_empty_frame_audio_still_fires() {
        let alerts = evaluate(&[], &[], &[], false, true, &all_on(), now());
        let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Identity, AlertKind::Audio]);
        assert_eq!(alerts[1].severity, Severity::Low);
        assert_eq!(alerts[1].subject_id, None);
    }

    #[test]
    fn test_multiple_people_reports_count() {
        for n in 2..5 {
            let people: Vec<_> = (0..n).map(|i| person(&format!("S{}", i))).collect();
            let alerts = evaluate(&people, &[], &[], false, false, &all_on(), now());
            let identity: Vec<_> = alerts
                .iter()
                .filter(|a| a.kind == AlertKind::Identity)
                .collect();
            assert_eq!(identity.len(), 1);
            assert_eq!(
                identity[0].message,
                format!("Multiple people ({}) detected in the frame.", n)
            );
            assert!(!alerts.iter().any(|a| a.message.starts_with("No person")));
        }
    }

    #[test]
    fn test_multiple_people_with_unknown_primary() {
        let alerts = evaluate(
            &[IdentityObservation::unknown(), person("S2")],
            &[],
            &[],
            false,
            false,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].message.starts_with("Multiple people (2)"));
        assert_eq!(alerts[1].message, "An unknown person has been detected.");
    }

    #[test]
    fn test_unknown_with_gaze_posture_audio_fixed_order() {
        let alerts = evaluate(
            &[IdentityObservation::unknown()],
            &[],
            &[gaze(GazeDirection::Left)],
            true,
            true,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 4);
        assert_eq!(alerts[0].kind, AlertKind::Identity);
        assert_eq!(alerts[0].subject_id.as_deref(), Some(UNKNOWN_SUBJECT));
        assert_eq!(alerts[1].kind, AlertKind::Behavior);
        assert!(alerts[1].message.contains("gaze"));
        assert_eq!(alerts[2].kind, AlertKind::Behavior);
        assert!(alerts[2].message.contains("posture"));
        assert_eq!(alerts[3].kind, AlertKind::Audio);
    }

    #[test]
    fn test_one_alert_per_object() {
        let alerts = evaluate(
            &[person("S7")],
            &[
                ObjectObservation::new("cell phone", 0.9),
                ObjectObservation::new("book", 0.6),
            ],
            &[],
            false,
            false,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 2);
        assert!(alerts
            .iter()
            .all(|a| a.kind == AlertKind::Object && a.subject_id.as_deref() == Some("S7")));
    }

    #[test]
    fn test_gaze_fires_once() {
        let alerts = evaluate(
            &[person("S1")],
            &[],
            &[
                gaze(GazeDirection::Center),
                gaze(GazeDirection::Right),
                gaze(GazeDirection::Left),
                gaze(GazeDirection::Right),
            ],
            false,
            false,
            &all_on(),
            now(),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Suspicious gaze detected: Looking Right");
    }

    #[test]
    fn test_disabled_detectors_never_fire() {
        let alerts = evaluate(
            &[person("S1")],
            &[ObjectObservation::new("cell phone", 0.9)],
            &[gaze(GazeDirection::Left)],
            true,
            true,
            &all_off(),
            now(),
        );
        assert!(alerts.is_empty());

        for (controls, kind_absent) in [
            (ControlState { object: false, ..all_on() }, AlertKind::Object),
            (ControlState { audio: false, ..all_on() }, AlertKind::Audio),
        ] {
            let alerts = evaluate(
                &[person("S1")],
                &[ObjectObservation::new("cell phone", 0.9)],
                &[],
                false,
                true,
                &controls,
                now(),
            );
            assert!(alerts.iter().all(|a| a.kind != kind_absent));
            assert!(!alerts.is_empty());
        }
    }

    #[test]
    fn test_gaze_disabled_keeps_posture() {
        let controls = ControlState {
            gaze: false,
            ..all_on()
        };
        let alerts = evaluate(
            &[person("S1")],
            &[],
            &[gaze(GazeDirection::Left)],
            true,
            false,
            &controls,
            now(),
        );
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("posture"));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let identities = vec![IdentityObservation::unknown(), person("S2")];
        let objects = vec![ObjectObservation::new("cell phone", 0.9)];
        let gazes = vec![gaze(GazeDirection::Right)];
        let first = evaluate(&identities, &objects, &gazes, true, true, &all_on(), now());
        for _ in 0..10 {
            let again = evaluate(&identities, &objects, &gazes, true, true, &all_on(), now());
            assert_eq!(first, again);
        }
        assert!(first.iter().all(|a| a.timestamp == now()));
    }

    #[test]
    fn test_alert_json_shape() {
        let alerts = evaluate(&[person("S1")], &[], &[], false, true, &all_on(), now());
        let json = serde_json::to_value(&alerts[0]).unwrap();
        assert_eq!(json["kind"], "Audio");
        assert_eq!(json["severity"], "low");
        assert!(json.get("subject_id").is_none());
        assert!(json.get("detail").is_none());
    }
}
