//! Capture - Frame acquisition seam
//!
//! ## Responsibilities
//!
//! - Frame type shared by detectors, workers and the realtime hub
//! - `CaptureSource` opens an exclusive device handle for one worker
//! - `CaptureDevice` yields frames until released
//!
//! Workers only see these traits; `ffmpeg` provides the default backend.

pub mod ffmpeg;

pub use ffmpeg::{FfmpegConfig, FfmpegSource};

use crate::error::Result;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};

/// One captured video frame (JPEG encoded)
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic per-device sequence number
    pub seq: u64,
    /// JPEG bytes
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(seq: u64, jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            seq,
            jpeg,
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    /// Base64 payload for the `frame` event
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
    }
}

/// Opens capture devices. One device per worker, never shared.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the device. Failure here is fatal to the session start.
    async fn open(&self) -> Result<Box<dyn CaptureDevice>>;
}

/// An acquired camera handle
#[async_trait]
pub trait CaptureDevice: Send {
    /// Read the next frame.
    ///
    /// `Ok(None)` is a transient empty read; the caller backs off and retries.
    async fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the device. Called exactly once from the worker's cleanup path.
    async fn release(&mut self) -> Result<()>;
}
