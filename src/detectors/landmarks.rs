//! Posture and gaze adapters over raw landmark models
//!
//! A landmark model only reports coordinates; the heuristics in `heuristics` turn them
//! into the observations fusion consumes.

use super::heuristics::{gaze_from_eye_ratio, head_tilt_suspicious};
use super::{BoundingBox, GazeEstimator, GazeObservation, PostureClassifier};
use crate::capture::Frame;

/// Pose keypoints of the main subject in pixels (MediaPipe layout); empty when no pose
pub trait PoseLandmarker: Send + Sync {
    fn landmarks(&self, frame: &Frame) -> Vec<(i32, i32)>;
}

/// Horizontal eye ratio per detected face
pub trait EyeRatioTracker: Send + Sync {
    fn eye_ratios(&self, frame: &Frame) -> Vec<(BoundingBox, f64)>;
}

/// Suspicious when the ears are vertically offset past the tilt threshold
pub struct HeadTiltPosture<P> {
    landmarker: P,
}

impl<P: PoseLandmarker> HeadTiltPosture<P> {
    pub fn new(landmarker: P) -> Self {
        Self { landmarker }
    }
}

impl<P: PoseLandmarker> PostureClassifier for HeadTiltPosture<P> {
    fn is_suspicious(&self, frame: &Frame) -> bool {
        head_tilt_suspicious(&self.landmarker.landmarks(frame))
    }
}

/// Gaze direction per face from its eye ratio
pub struct EyeRatioGaze<E> {
    tracker: E,
}

impl<E: EyeRatioTracker> EyeRatioGaze<E> {
    pub fn new(tracker: E) -> Self {
        Self { tracker }
    }
}

impl<E: EyeRatioTracker> GazeEstimator for EyeRatioGaze<E> {
    fn estimate_gaze(&self, frame: &Frame) -> Vec<GazeObservation> {
        self.tracker
            .eye_ratios(frame)
            .into_iter()
            .map(|(bbox, ratio)| GazeObservation {
                bbox,
                direction: gaze_from_eye_ratio(ratio),
            })
            .collect()
    }
}
