//! Signal heuristics shared by concrete detector adapters
//!
//! These sit between raw model outputs (RMS chunks, pose landmarks, eye ratios) and the
//! observation types the fusion engine consumes.

use super::GazeDirection;
use std::collections::VecDeque;

/// RMS level above which an audio chunk counts as sound
pub const DEFAULT_VOLUME_THRESHOLD: f64 = 500.0;
/// Seconds of continuous sound before it counts as sustained
pub const DEFAULT_SUSTAIN_SECONDS: u32 = 2;
/// Microphone sample rate (Hz)
pub const SAMPLE_RATE: u32 = 44_100;
/// Samples per audio chunk
pub const CHUNK_SIZE: u32 = 1024;

/// Pose landmark indices (MediaPipe layout)
pub const LEFT_EAR: usize = 7;
pub const RIGHT_EAR: usize = 8;
/// Vertical ear offset (px) treated as a head tilt
pub const EAR_TILT_THRESHOLD_PX: i32 = 25;

/// Eye ratio bounds for gaze classification
pub const GAZE_RIGHT_RATIO: f64 = 1.35;
pub const GAZE_LEFT_RATIO: f64 = 0.75;

/// Root mean square of 16-bit PCM samples
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Sliding window over recent chunk levels
///
/// Sustained only once the window is full and every reading exceeds the threshold.
#[derive(Debug, Clone)]
pub struct SustainedSoundWindow {
    threshold: f64,
    capacity: usize,
    levels: VecDeque<f64>,
}

impl SustainedSoundWindow {
    pub fn new(threshold: f64, sustain_seconds: u32) -> Self {
        let capacity = ((SAMPLE_RATE / CHUNK_SIZE) * sustain_seconds).max(1) as usize;
        Self::with_capacity(threshold, capacity)
    }

    pub fn with_capacity(threshold: f64, capacity: usize) -> Self {
        Self {
            threshold,
            capacity: capacity.max(1),
            levels: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Feed one chunk of samples; returns the updated sustained flag
    pub fn push_chunk(&mut self, samples: &[i16]) -> bool {
        self.push_level(rms(samples))
    }

    /// Feed one precomputed level
    pub fn push_level(&mut self, level: f64) -> bool {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(level);
        self.is_sustained()
    }

    pub fn is_sustained(&self) -> bool {
        self.levels.len() == self.capacity && self.levels.iter().all(|&v| v > self.threshold)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.levels.clear();
    }
}

impl Default for SustainedSoundWindow {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_THRESHOLD, DEFAULT_SUSTAIN_SECONDS)
    }
}

/// Head tilt check over pixel landmarks
///
/// Too few landmarks means no pose, which is not suspicious.
pub fn head_tilt_suspicious(landmarks: &[(i32, i32)]) -> bool {
    match (landmarks.get(LEFT_EAR), landmarks.get(RIGHT_EAR)) {
        (Some(&(_, left_y)), Some(&(_, right_y))) => {
            (left_y - right_y).abs() > EAR_TILT_THRESHOLD_PX
        }
        _ => false,
    }
}

/// Map a horizontal eye ratio to a gaze direction
pub fn gaze_from_eye_ratio(ratio: f64) -> GazeDirection {
    if ratio > GAZE_RIGHT_RATIO {
        GazeDirection::Right
    } else if ratio < GAZE_LEFT_RATIO {
        GazeDirection::Left
    } else {
        GazeDirection::Center
    }
}
