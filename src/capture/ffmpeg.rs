//! ffmpeg-backed capture
//!
//! One long-running ffmpeg child per device, writing MJPEG to stdout. Frames are cut out
//! of the byte stream at JPEG SOI/EOI markers.

use super::{CaptureDevice, CaptureSource, Frame};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 64 * 1024;
/// Drop buffered bytes past this without a complete frame
const MAX_BUFFER: usize = 16 * 1024 * 1024;

/// Capture settings
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// ffmpeg `-i` argument: device path, RTSP URL or file
    pub input: String,
    /// Optional ffmpeg `-f` input format (e.g. `v4l2`)
    pub input_format: Option<String>,
    /// Wait for the first frame before declaring the device unavailable
    pub open_timeout: Duration,
    /// A read that produces no frame within this is reported as empty
    pub read_timeout: Duration,
}

/// Opens one ffmpeg process per worker
pub struct FfmpegSource {
    config: FfmpegConfig,
}

impl FfmpegSource {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.config.input.starts_with("rtsp://") {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        if let Some(format) = &self.config.input_format {
            args.extend(["-f".to_string(), format.clone()]);
        }
        args.extend(
            [
                "-i",
                self.config.input.as_str(),
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-loglevel",
                "error",
                "-",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }
}

#[async_trait]
impl CaptureSource for FfmpegSource {
    async fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        let mut child = Command::new("ffmpeg")
            .args(self.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Acquisition(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Acquisition("ffmpeg stdout unavailable".to_string()))?;

        let mut device = FfmpegDevice {
            child,
            stdout,
            splitter: MjpegSplitter::default(),
            pending: None,
            seq: 0,
            read_timeout: self.config.read_timeout,
        };

        // A camera that never produces a frame counts as unavailable
        match tokio::time::timeout(self.config.open_timeout, device.next_frame()).await {
            Ok(Ok(frame)) => {
                tracing::info!(input = %self.config.input, "Capture device opened");
                device.pending = Some(frame);
                Ok(Box::new(device))
            }
            Ok(Err(e)) => {
                let _ = device.child.kill().await;
                Err(Error::Acquisition(format!("{}: {}", self.config.input, e)))
            }
            Err(_) => {
                let _ = device.child.kill().await;
                Err(Error::Acquisition(format!(
                    "{}: no frame within {:?}",
                    self.config.input, self.config.open_timeout
                )))
            }
        }
    }
}

struct FfmpegDevice {
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    pending: Option<Frame>,
    seq: u64,
    read_timeout: Duration,
}

impl FfmpegDevice {
    /// Read until one complete JPEG is buffered
    async fn next_frame(&mut self) -> Result<Frame> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                self.seq += 1;
                let (width, height) = jpeg_dimensions(&jpeg).unwrap_or((0, 0));
                return Ok(Frame::new(self.seq, jpeg, width, height));
            }
            let n = self.stdout.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Acquisition("capture stream ended".to_string()));
            }
            self.splitter.push(&chunk[..n]);
        }
    }
}

#[async_trait]
impl CaptureDevice for FfmpegDevice {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        match tokio::time::timeout(self.read_timeout, self.next_frame()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| Error::Internal(format!("ffmpeg kill failed: {}", e)))
    }
}

/// Cuts complete JPEG images out of an MJPEG byte stream
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

impl MjpegSplitter {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFER {
            tracing::warn!(buffered = self.buf.len(), "MJPEG buffer overflow, dropping data");
            self.buf.clear();
        }
    }

    /// Next complete image, if buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &SOI, 0)?;
        let end = find(&self.buf, &EOI, start + SOI.len())? + EOI.len();
        let jpeg = self.buf[start..end].to_vec();
        self.buf.drain(..end);
        Some(jpeg)
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// (width, height) from the first SOF segment
pub fn jpeg_dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        if jpeg[i] != 0xFF {
            return None;
        }
        let marker = jpeg[i + 1];
        let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        // SOF0..SOF15 except DHT(C4), JPG(C8), DAC(CC)
        if (0xC0..=0xCF).contains(&marker) && ![0xC4, 0xC8, 0xCC].contains(&marker) {
            if i + 9 > jpeg.len() {
                return None;
            }
            let height = u16::from_be_bytes([jpeg[i + 5], jpeg[i + 6]]) as u32;
            let width = u16::from_be_bytes([jpeg[i + 7], jpeg[i + 8]]) as u32;
            return Some((width, height));
        }
        i += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal JPEG skeleton with an SOF0 header for 640x480
    fn jpeg() -> Vec<u8> {
        vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, // APP0 (len 4)
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x01, 0x01, 0x11, 0x00, // SOF0
            0xFF, 0xD9, // EOI
        ]
    }

    #[test]
    fn test_splitter_across_chunks() {
        let mut splitter = MjpegSplitter::default();
        let image = jpeg();
        let (a, b) = image.split_at(7);

        splitter.push(a);
        assert!(splitter.next_frame().is_none());
        splitter.push(b);
        assert_eq!(splitter.next_frame().unwrap(), image);
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_splitter_multiple_frames_and_garbage() {
        let mut splitter = MjpegSplitter::default();
        let mut stream = vec![0x00, 0x13];
        stream.extend(jpeg());
        stream.extend(jpeg());
        splitter.push(&stream);

        assert_eq!(splitter.next_frame().unwrap(), jpeg());
        assert_eq!(splitter.next_frame().unwrap(), jpeg());
        assert!(splitter.next_frame().is_none());
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(jpeg_dimensions(&jpeg()), Some((640, 480)));
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF, 0xD9]), None);
    }

    #[test]
    fn test_args_for_rtsp() {
        let source = FfmpegSource::new(FfmpegConfig {
            input: "rtsp://cam/stream".to_string(),
            input_format: None,
            open_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        });
        let args = source.args();
        assert_eq!(&args[..2], ["-rtsp_transport", "tcp"]);
        assert!(args.contains(&"image2pipe".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[tokio::test]
    async fn test_missing_input_is_acquisition_error() {
        let source = FfmpegSource::new(FfmpegConfig {
            input: "/nonexistent/eagle-eye-camera".to_string(),
            input_format: None,
            open_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(100),
        });
        // Fails whether or not ffmpeg is installed
        assert!(matches!(source.open().await, Err(Error::Acquisition(_))));
    }
}
