//! ViolationLedger - Durable violation log
//!
//! ## Responsibilities
//!
//! - Append one `violations` row per high-severity alert (never update or delete)
//! - Serialize writers from every session worker; one transaction per record
//! - Swallow and log persistence failures so frame loops keep running
//! - Query interface for the API (latest, per subject)

pub mod evidence;

pub use evidence::EvidenceStore;

use crate::alert_engine::Alert;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Subject recorded when the alert has no associated person
pub const NO_SUBJECT: &str = "N/A";

/// Violation record (matches violations table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: i64,
    pub subject_id: String,
    pub violation_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub evidence_path: Option<String>,
}

/// Outcome of `record`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Committed(i64),
    Failed(String),
}

impl RecordOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RecordOutcome::Committed(_))
    }
}

/// Ledger statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStats {
    pub committed: u64,
    pub failed: u64,
}

/// Open (creating if missing) the sqlite pool
pub async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// ViolationLedger instance
pub struct ViolationLedger {
    pool: SqlitePool,
    /// Serializes writers across sessions
    write_lock: Mutex<()>,
    stats: RwLock<LedgerStats>,
}

impl ViolationLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
            stats: RwLock::new(LedgerStats::default()),
        }
    }

    /// Create the violations table if needed
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id TEXT NOT NULL,
                violation_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                details TEXT NOT NULL,
                evidence_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_violations_subject ON violations (subject_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record one alert
    ///
    /// Never returns an error: failures are logged and reported as `Failed`.
    pub async fn record(
        &self,
        alert: &Alert,
        subject_id: &str,
        evidence_path: Option<&Path>,
    ) -> RecordOutcome {
        let outcome = match self.insert(alert, subject_id, evidence_path).await {
            Ok(id) => {
                tracing::info!(
                    violation_id = id,
                    subject_id = %subject_id,
                    violation_type = %alert.kind,
                    "Violation recorded"
                );
                RecordOutcome::Committed(id)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    subject_id = %subject_id,
                    violation_type = %alert.kind,
                    "Failed to record violation"
                );
                RecordOutcome::Failed(e.to_string())
            }
        };

        let mut stats = self.stats.write().await;
        match outcome {
            RecordOutcome::Committed(_) => stats.committed += 1,
            RecordOutcome::Failed(_) => stats.failed += 1,
        }

        outcome
    }

    async fn insert(
        &self,
        alert: &Alert,
        subject_id: &str,
        evidence_path: Option<&Path>,
    ) -> Result<i64> {
        let evidence = evidence_path.map(|p| p.to_string_lossy().to_string());

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO violations (subject_id, violation_type, timestamp, details, evidence_path)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(subject_id)
        .bind(alert.kind.as_str())
        .bind(alert.timestamp)
        .bind(alert.details_text())
        .bind(&evidence)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.last_insert_rowid())
    }

    // ========================================
    // Query Methods
    // ========================================

    /// Latest violations, newest first
    pub async fn get_latest(&self, limit: u32) -> Result<Vec<ViolationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, violation_type, timestamp, details, evidence_path
            FROM violations
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Violations for one subject, newest first
    pub async fn get_by_subject(&self, subject_id: &str, limit: u32) -> Result<Vec<ViolationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_id, violation_type, timestamp, details, evidence_path
            FROM violations
            WHERE subject_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(subject_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM violations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn stats(&self) -> LedgerStats {
        self.stats.read().await.clone()
    }
}

fn row_to_record(row: &SqliteRow) -> Result<ViolationRecord> {
    Ok(ViolationRecord {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        violation_type: row.try_get("violation_type")?,
        timestamp: row.try_get("timestamp")?,
        details: row.try_get("details")?,
        evidence_path: row.try_get("evidence_path")?,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::alert_engine::evaluate;
    use crate::control_state::ControlState;
    use crate::detectors::{IdentityObservation, ObjectObservation};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn phone_alert() -> Alert {
        evaluate(
            &[IdentityObservation::new("S1", "Ana")],
            &[ObjectObservation::new("cell phone", 0.9)],
            &[],
            false,
            false,
            &ControlState::default(),
            Utc::now(),
        )
        .remove(0)
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let ledger = memory_ledger().await;
        let alert = phone_alert();
        let evidence = PathBuf::from("/tmp/violation_object_1_abcdef.jpg");

        let outcome = ledger.record(&alert, "S1", Some(&evidence)).await;
        assert!(outcome.is_committed());

        let rows = ledger.get_latest(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.subject_id, "S1");
        assert_eq!(row.violation_type, "Object Alert");
        assert_eq!(row.details, "Associated with person: S1");
        assert_eq!(row.evidence_path.as_deref(), Some("/tmp/violation_object_1_abcdef.jpg"));
        assert_eq!(row.timestamp, alert.timestamp);
    }

    #[tokio::test]
    async fn test_record_without_evidence() {
        let ledger = memory_ledger().await;
        let alert = evaluate(&[], &[], &[], false, false, &ControlState::default(), Utc::now())
            .remove(0);
        ledger.record(&alert, NO_SUBJECT, None).await;

        let rows = ledger.get_by_subject(NO_SUBJECT, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].details, "No person detected in the frame.");
        assert!(rows[0].evidence_path.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_not_raised() {
        let ledger = broken_ledger().await;
        let outcome = ledger.record(&phone_alert(), "S1", None).await;
        assert!(matches!(outcome, RecordOutcome::Failed(_)));
        assert_eq!(ledger.stats().await.failed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let ledger = Arc::new(memory_ledger().await);
        let mut tasks = Vec::new();
        for worker in 0..4 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let outcome = ledger
                        .record(&phone_alert(), &format!("S{}", worker), None)
                        .await;
                    assert!(outcome.is_committed());
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(ledger.count().await.unwrap(), 100);
        assert_eq!(ledger.get_by_subject("S2", 100).await.unwrap().len(), 25);
        assert_eq!(ledger.stats().await.committed, 100);
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() {
        let ledger = memory_ledger().await;
        ledger.record(&phone_alert(), "S1", None).await;
        ledger.record(&phone_alert(), "S2", None).await;
        let rows = ledger.get_latest(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id, "S2");
    }
}
