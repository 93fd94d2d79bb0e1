//! Evidence snapshots for high-severity alerts

use crate::alert_engine::{Alert, AlertKind};
use crate::capture::Frame;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Writes frame snapshots under unique names
pub struct EvidenceStore {
    dir: PathBuf,
}

impl EvidenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique file name: kind + unix time + random suffix
    pub fn file_name(alert: &Alert) -> String {
        let kind = match alert.kind {
            AlertKind::Identity => "identity",
            AlertKind::Object => "object",
            AlertKind::Behavior => "behavior",
            AlertKind::Audio => "audio",
        };
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "violation_{}_{}_{}.jpg",
            kind,
            alert.timestamp.timestamp(),
            &suffix[..6]
        )
    }

    /// Write the frame as evidence for `alert`
    pub async fn capture(&self, alert: &Alert, frame: &Frame) -> Result<PathBuf> {
        if frame.jpeg.is_empty() {
            return Err(Error::Evidence("empty frame".to_string()));
        }
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(alert));
        fs::write(&path, &frame.jpeg).await?;

        tracing::info!(path = %path.display(), kind = %alert.kind, "Evidence snapshot saved");
        Ok(path)
    }

    /// Best-effort capture: only for high severity, failures logged and turned into `None`
    pub async fn capture_best_effort(&self, alert: &Alert, frame: &Frame) -> Option<PathBuf> {
        if !alert.is_high() {
            return None;
        }
        match self.capture(alert, frame).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, kind = %alert.kind, "Failed to save evidence snapshot");
                None
            }
        }
    }
}
