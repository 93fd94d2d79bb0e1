//! ffmpeg-backed microphone monitor
//!
//! ffmpeg decodes the input to mono 16-bit PCM at 44.1 kHz; a reader thread feeds
//! `CHUNK_SIZE`-sample chunks into a `SustainedSoundWindow`.

use super::heuristics::{SustainedSoundWindow, CHUNK_SIZE, SAMPLE_RATE};
use super::{AudioMonitor, AudioSource};
use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Audio capture settings
#[derive(Debug, Clone)]
pub struct FfmpegAudioConfig {
    /// ffmpeg `-i` argument (e.g. `default`, `hw:0`)
    pub input: String,
    /// ffmpeg `-f` input format (e.g. `alsa`, `pulse`)
    pub input_format: Option<String>,
    pub threshold: f64,
    pub sustain_seconds: u32,
}

/// Hands out one ffmpeg monitor per supervision session
pub struct FfmpegAudioSource {
    config: FfmpegAudioConfig,
}

impl FfmpegAudioSource {
    pub fn new(config: FfmpegAudioConfig) -> Self {
        Self { config }
    }
}

impl AudioSource for FfmpegAudioSource {
    fn monitor(&self) -> Box<dyn AudioMonitor> {
        Box::new(FfmpegAudioMonitor::new(self.config.clone()))
    }
}

pub struct FfmpegAudioMonitor {
    config: FfmpegAudioConfig,
    window: Arc<Mutex<SustainedSoundWindow>>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegAudioMonitor {
    pub fn new(config: FfmpegAudioConfig) -> Self {
        let window = SustainedSoundWindow::new(config.threshold, config.sustain_seconds);
        Self {
            config,
            window: Arc::new(Mutex::new(window)),
            child: None,
            reader: None,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = &self.config.input_format {
            args.extend(["-f".to_string(), format.clone()]);
        }
        let rate = SAMPLE_RATE.to_string();
        args.extend(
            [
                "-i",
                self.config.input.as_str(),
                "-ac",
                "1",
                "-ar",
                rate.as_str(),
                "-f",
                "s16le",
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

impl AudioMonitor for FfmpegAudioMonitor {
    fn start(&mut self) -> Result<()> {
        let mut child = Command::new("ffmpeg")
            .args(self.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Acquisition(format!("audio ffmpeg spawn failed: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Acquisition("audio ffmpeg stdout unavailable".to_string()))?;

        let window = self.window.clone();
        let reader = std::thread::Builder::new()
            .name("audio-monitor".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; CHUNK_SIZE as usize * 2];
                while stdout.read_exact(&mut buf).is_ok() {
                    let samples = pcm_samples(&buf);
                    if let Ok(mut window) = window.lock() {
                        window.push_chunk(&samples);
                    }
                }
                // Stream gone: never report stale sound
                if let Ok(mut window) = window.lock() {
                    window.reset();
                }
                tracing::debug!("Audio stream ended");
            })
            .map_err(|e| Error::Internal(format!("audio reader thread failed: {}", e)))?;

        tracing::info!(input = %self.config.input, "Audio monitor started");
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn sound_sustained(&self) -> bool {
        self.window
            .lock()
            .map(|window| window.is_sustained())
            .unwrap_or(false)
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            // Already exited is fine
            let _ = child.kill();
            child.wait()?;
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("Audio reader thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for FfmpegAudioMonitor {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
        }
    }
}

/// Little-endian s16 PCM bytes to samples (a trailing odd byte is dropped)
pub fn pcm_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
