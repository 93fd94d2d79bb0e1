//! Detectors - Perception adapter seam
//!
//! ## Responsibilities
//!
//! - Observation types produced per frame by each detector
//! - Adapter traits (identity, object, gaze, posture, audio)
//! - `Detectors` bundle injected into supervision workers
//!
//! Adapters never fail towards the core: a detector that cannot run returns an empty
//! observation (`Vec::new()` / `false`).

pub mod audio;
pub mod heuristics;
pub mod landmarks;

pub use landmarks::{EyeRatioGaze, EyeRatioTracker, HeadTiltPosture, PoseLandmarker};

use crate::capture::Frame;
use crate::control_state::ControlState;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Subject id reported for faces that match no enrolled identity
pub const UNKNOWN_SUBJECT: &str = "Unknown";

/// Pixel box as (top, right, bottom, left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }
}

/// Identity matcher output for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityObservation {
    pub subject_id: String,
    pub display_name: String,
    pub bbox: BoundingBox,
}

impl IdentityObservation {
    pub fn new(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            bbox: BoundingBox::default(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_SUBJECT, UNKNOWN_SUBJECT)
    }

    pub fn is_unknown(&self) -> bool {
        self.subject_id == UNKNOWN_SUBJECT
    }
}

/// Object classifier output (prohibited item)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectObservation {
    pub label: String,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl ObjectObservation {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox: BoundingBox::default(),
        }
    }
}

/// Estimated gaze direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GazeDirection {
    Center,
    Left,
    Right,
}

impl GazeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GazeDirection::Center => "Center",
            GazeDirection::Left => "Looking Left",
            GazeDirection::Right => "Looking Right",
        }
    }
}

/// Gaze estimator output for one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeObservation {
    pub bbox: BoundingBox,
    pub direction: GazeDirection,
}

impl GazeObservation {
    pub fn new(direction: GazeDirection) -> Self {
        Self {
            bbox: BoundingBox::default(),
            direction,
        }
    }
}

/// Recognizes enrolled subjects. Always active.
pub trait IdentityMatcher: Send + Sync {
    fn identify(&self, frame: &Frame) -> Vec<IdentityObservation>;
}

/// Detects prohibited objects
pub trait ObjectClassifier: Send + Sync {
    fn detect_objects(&self, frame: &Frame) -> Vec<ObjectObservation>;
}

/// Estimates gaze direction per face
pub trait GazeEstimator: Send + Sync {
    fn estimate_gaze(&self, frame: &Frame) -> Vec<GazeObservation>;
}

/// Classifies body posture
pub trait PostureClassifier: Send + Sync {
    fn is_suspicious(&self, frame: &Frame) -> bool;
}

/// Audio input with its own acquisition lifecycle
///
/// Owned by exactly one worker. `start` failing disables audio for that session.
pub trait AudioMonitor: Send {
    fn start(&mut self) -> Result<()>;
    /// Whether sound above threshold has been continuous for the configured window
    fn sound_sustained(&self) -> bool;
    fn stop(&mut self) -> Result<()>;
}

/// Opens a fresh audio monitor per supervision session
pub trait AudioSource: Send + Sync {
    fn monitor(&self) -> Box<dyn AudioMonitor>;
}

/// Per-frame visual observations (audio is sampled separately by the worker)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameObservations {
    pub identities: Vec<IdentityObservation>,
    pub objects: Vec<ObjectObservation>,
    pub gaze: Vec<GazeObservation>,
    pub posture_suspicious: bool,
}

/// Injected detector set for one supervision worker
#[derive(Clone)]
pub struct Detectors {
    pub identity: Arc<dyn IdentityMatcher>,
    pub object: Arc<dyn ObjectClassifier>,
    pub gaze: Arc<dyn GazeEstimator>,
    pub posture: Arc<dyn PostureClassifier>,
}

impl Detectors {
    pub fn new(
        identity: Arc<dyn IdentityMatcher>,
        object: Arc<dyn ObjectClassifier>,
        gaze: Arc<dyn GazeEstimator>,
        posture: Arc<dyn PostureClassifier>,
    ) -> Self {
        Self {
            identity,
            object,
            gaze,
            posture,
        }
    }

    /// Run identity plus every detector enabled in `controls`
    ///
    /// Disabled detectors are not invoked at all.
    pub fn observe(&self, frame: &Frame, controls: &ControlState) -> FrameObservations {
        FrameObservations {
            identities: self.identity.identify(frame),
            objects: if controls.object {
                self.object.detect_objects(frame)
            } else {
                Vec::new()
            },
            gaze: if controls.gaze {
                self.gaze.estimate_gaze(frame)
            } else {
                Vec::new()
            },
            posture_suspicious: controls.posture && self.posture.is_suspicious(frame),
        }
    }
}

/// Stand-ins used when no perception backend is wired in
pub mod null {
    use super::*;

    /// Reports no faces, objects or gaze; never suspicious or sustained
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NullDetector;

    impl IdentityMatcher for NullDetector {
        fn identify(&self, _frame: &Frame) -> Vec<IdentityObservation> {
            Vec::new()
        }
    }

    impl ObjectClassifier for NullDetector {
        fn detect_objects(&self, _frame: &Frame) -> Vec<ObjectObservation> {
            Vec::new()
        }
    }

    impl GazeEstimator for NullDetector {
        fn estimate_gaze(&self, _frame: &Frame) -> Vec<GazeObservation> {
            Vec::new()
        }
    }

    impl PostureClassifier for NullDetector {
        fn is_suspicious(&self, _frame: &Frame) -> bool {
            false
        }
    }

    impl AudioMonitor for NullDetector {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn sound_sustained(&self) -> bool {
            false
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl AudioSource for NullDetector {
        fn monitor(&self) -> Box<dyn AudioMonitor> {
            Box::new(NullDetector)
        }
    }

    pub fn detectors() -> Detectors {
        let d = Arc::new(NullDetector);
        Detectors::new(d.clone(), d.clone(), d.clone(), d)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn frame() -> Frame {
        Frame::new(1, vec![0xFF, 0xD8], 4, 4)
    }

    #[test]
    fn test_observe_skips_disabled_detectors() {
        let scripted = Arc::new(ScriptedDetectors {
            identities: vec![IdentityObservation::new("S1", "Ana")],
            objects: vec![ObjectObservation::new("cell phone", 0.9)],
            gaze: vec![GazeObservation::new(GazeDirection::Left)],
            posture: true,
            ..Default::default()
        });
        let detectors = bundle(scripted.clone());

        let controls = ControlState {
            audio: true,
            gaze: false,
            object: false,
            posture: false,
        };
        let obs = detectors.observe(&frame(), &controls);

        assert_eq!(obs.identities.len(), 1);
        assert!(obs.objects.is_empty());
        assert!(obs.gaze.is_empty());
        assert!(!obs.posture_suspicious);
        assert_eq!(scripted.object_calls.load(Ordering::SeqCst), 0);
        assert_eq!(scripted.gaze_calls.load(Ordering::SeqCst), 0);
        assert_eq!(scripted.posture_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_observe_all_enabled() {
        let scripted = Arc::new(ScriptedDetectors {
            identities: vec![IdentityObservation::unknown()],
            objects: vec![ObjectObservation::new("book", 0.7)],
            gaze: vec![GazeObservation::new(GazeDirection::Center)],
            posture: true,
            ..Default::default()
        });
        let obs = bundle(scripted).observe(&frame(), &ControlState::default());

        assert!(obs.identities[0].is_unknown());
        assert_eq!(obs.objects[0].label, "book");
        assert_eq!(obs.gaze.len(), 1);
        assert!(obs.posture_suspicious);
    }

    #[test]
    fn test_object_confidence_clamped() {
        assert_eq!(ObjectObservation::new("phone", 1.7).confidence, 1.0);
        assert_eq!(ObjectObservation::new("phone", -0.2).confidence, 0.0);
    }
}
