//! Application state
//!
//! Holds all shared components and state

use crate::capture::FfmpegConfig;
use crate::detectors::audio::FfmpegAudioConfig;
use crate::detectors::heuristics::{DEFAULT_SUSTAIN_SECONDS, DEFAULT_VOLUME_THRESHOLD};
use crate::session_manager::SessionManager;
use crate::session_worker::WorkerConfig;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Evidence snapshot directory
    pub evidence_dir: PathBuf,
    /// Daily attendance CSV directory
    pub attendance_dir: PathBuf,
    /// Token granting the admin role (unset = nobody is admin)
    pub admin_token: Option<String>,
    /// Pacing sleep between frames (ms)
    pub frame_interval_ms: u64,
    /// Wait after an empty camera read (ms)
    pub empty_read_backoff_ms: u64,
    /// Alert cooldown window (sec, 0 = off)
    pub alert_cooldown_sec: u64,
    /// Dashboard static files
    pub static_dir: Option<PathBuf>,
    /// ffmpeg input (camera device, RTSP URL or file)
    pub capture_input: String,
    /// ffmpeg input format (e.g. v4l2)
    pub capture_format: Option<String>,
    /// Microphone input for ffmpeg (unset = audio detection off)
    pub audio_input: Option<String>,
    /// Microphone input format (e.g. alsa, pulse)
    pub audio_format: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://proctoring.db".to_string()),
            port: env_parse("PORT", 5000),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            evidence_dir: std::env::var("EVIDENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/snapshots")),
            attendance_dir: std::env::var("ATTENDANCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("attendance_reports")),
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            frame_interval_ms: env_parse("FRAME_INTERVAL_MS", 30),
            empty_read_backoff_ms: env_parse("EMPTY_READ_BACKOFF_MS", 100),
            alert_cooldown_sec: env_parse("ALERT_COOLDOWN_SEC", 0),
            static_dir: std::env::var("STATIC_DIR").ok().map(PathBuf::from),
            capture_input: std::env::var("CAPTURE_INPUT")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            capture_format: std::env::var("CAPTURE_FORMAT").ok(),
            audio_input: std::env::var("AUDIO_INPUT").ok().filter(|v| !v.is_empty()),
            audio_format: std::env::var("AUDIO_FORMAT").ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            empty_read_backoff: Duration::from_millis(self.empty_read_backoff_ms),
            alert_cooldown_sec: self.alert_cooldown_sec,
        }
    }

    pub fn ffmpeg_config(&self) -> FfmpegConfig {
        FfmpegConfig {
            input: self.capture_input.clone(),
            input_format: self.capture_format.clone(),
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(self.empty_read_backoff_ms.max(1) * 10),
        }
    }
}

impl AppConfig {
    /// Microphone settings, if an audio input is configured
    pub fn audio_config(&self) -> Option<FfmpegAudioConfig> {
        self.audio_input.as_ref().map(|input| FfmpegAudioConfig {
            input: input.clone(),
            input_format: self.audio_format.clone(),
            threshold: DEFAULT_VOLUME_THRESHOLD,
            sustain_seconds: DEFAULT_SUSTAIN_SECONDS,
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: SqlitePool,
    /// Application config
    pub config: AppConfig,
    /// SessionManager (workers, controls, hub, ledger)
    pub sessions: Arc<SessionManager>,
    /// Process start
    pub started_at: chrono::DateTime<chrono::Utc>,
}
