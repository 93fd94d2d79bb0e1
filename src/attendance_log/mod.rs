//! AttendanceLog - Daily attendance CSV
//!
//! ## Responsibilities
//!
//! - One file per day: `attendance_YYYY-MM-DD.csv` with a `Timestamp,RollNumber,Name` header
//! - Mark each recognized subject at most once per day (existing rows are reloaded on open)
//! - Roll over to a new file when the date changes

use crate::error::Result;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

const HEADER: [&str; 3] = ["Timestamp", "RollNumber", "Name"];

/// One CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRow {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "RollNumber")]
    pub roll_number: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Newly accepted mark (payload of `attendance_update`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    /// Local wall-clock time, `HH:MM:SS`
    pub timestamp: String,
    pub name: String,
    pub roll_number: String,
}

/// Path of the log for `date`
pub fn day_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("attendance_{}.csv", date.format("%Y-%m-%d")))
}

/// Read every row logged on `date` (missing file = no rows)
pub fn read_day(dir: &Path, date: NaiveDate) -> Result<Vec<AttendanceRow>> {
    let path = day_file(dir, date);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(&path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// AttendanceLog instance (owned by the attendance worker)
pub struct AttendanceLog {
    dir: PathBuf,
    date: NaiveDate,
    seen: HashSet<String>,
}

impl AttendanceLog {
    /// Open today's log, loading subjects already marked
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_for(dir, Local::now().date_naive())
    }

    pub fn open_for(dir: impl Into<PathBuf>, date: NaiveDate) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let seen = read_day(&dir, date)?
            .into_iter()
            .map(|row| row.roll_number)
            .collect::<HashSet<_>>();

        tracing::info!(
            path = %day_file(&dir, date).display(),
            already_marked = seen.len(),
            "Attendance log opened"
        );

        Ok(Self { dir, date, seen })
    }

    pub fn path(&self) -> PathBuf {
        day_file(&self.dir, self.date)
    }

    pub fn is_marked(&self, subject_id: &str) -> bool {
        self.seen.contains(subject_id)
    }

    pub fn marked_count(&self) -> usize {
        self.seen.len()
    }

    /// Mark `subject_id` present at `now`
    ///
    /// Returns `None` if the subject was already marked today.
    pub fn mark(
        &mut self,
        subject_id: &str,
        name: &str,
        now: DateTime<Local>,
    ) -> Result<Option<AttendanceEntry>> {
        let today = now.date_naive();
        if today != self.date {
            tracing::info!(from = %self.date, to = %today, "Attendance log rolled over");
            *self = Self::open_for(self.dir.clone(), today)?;
        }

        if self.seen.contains(subject_id) {
            return Ok(None);
        }

        self.append(&AttendanceRow {
            timestamp: now.to_rfc3339(),
            roll_number: subject_id.to_string(),
            name: name.to_string(),
        })?;
        self.seen.insert(subject_id.to_string());

        tracing::info!(roll_number = %subject_id, name = %name, "Attendance marked");

        Ok(Some(AttendanceEntry {
            timestamp: now.format("%H:%M:%S").to_string(),
            name: name.to_string(),
            roll_number: subject_id.to_string(),
        }))
    }

    fn append(&self, row: &AttendanceRow) -> Result<()> {
        let path = self.path();
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
        }
        writer.write_record([&row.timestamp, &row.roll_number, &row.name])?;
        writer.flush()?;
        Ok(())
    }
}
