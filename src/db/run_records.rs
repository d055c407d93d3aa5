use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    query, query_as,
    sqlite::{SqlitePool, SqliteRow},
    FromRow, Row,
};
use thiserror::Error;

use crate::{
    domain::{RunOutcome, RunRecord, RunSummary},
    error::{ErrorKind, TriageError},
};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("message {0} already has a terminal record")]
    Duplicate(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error("{0}")]
    Unavailable(String),
}

impl From<TrackerError> for TriageError {
    fn from(err: TrackerError) -> Self {
        TriageError::TrackerUnavailable(err.to_string())
    }
}

/// Durable per-message outcomes plus a claim lease that serializes a message
/// across overlapping runs.
#[async_trait]
pub trait RunTracker: Send + Sync {
    async fn lookup(&self, message_id: &str) -> Result<Option<RunRecord>, TrackerError>;

    /// Inserts a terminal record and drops the message claim in one step.
    /// Fails with [`TrackerError::Duplicate`] if a record already exists.
    async fn record(&self, record: &RunRecord) -> Result<(), TrackerError>;

    /// Compare-and-set: succeeds when nobody holds the message, the holder is
    /// `run_id` itself, or the previous lease has expired.
    async fn claim(&self, message_id: &str, run_id: &str) -> Result<bool, TrackerError>;

    async fn release(&self, message_id: &str, run_id: &str) -> Result<(), TrackerError>;

    async fn save_summary(&self, summary: &RunSummary) -> Result<(), TrackerError>;

    async fn recent_summaries(&self, limit: u32) -> Result<Vec<RunSummary>, TrackerError>;

    async fn close(&self) {}
}

#[derive(Clone)]
pub struct SqliteRunTracker {
    pool: SqlitePool,
    lease: Duration,
}

impl SqliteRunTracker {
    pub fn new(pool: SqlitePool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[async_trait]
impl RunTracker for SqliteRunTracker {
    async fn lookup(&self, message_id: &str) -> Result<Option<RunRecord>, TrackerError> {
        let row = query_as::<_, RunRecordRow>(
            r#"SELECT message_id, run_id, outcome, detail, error_kind, recorded_at
               FROM run_records WHERE message_id = ?1"#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.0))
    }

    async fn record(&self, record: &RunRecord) -> Result<(), TrackerError> {
        let mut tx = self.pool.begin().await?;
        let inserted = query(
            r#"INSERT INTO run_records (message_id, run_id, outcome, detail, error_kind, recorded_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(message_id) DO NOTHING"#,
        )
        .bind(&record.message_id)
        .bind(&record.run_id)
        .bind(record.outcome.as_str())
        .bind(record.detail.as_deref())
        .bind(record.error_kind.map(|kind| kind.as_str()))
        .bind(record.recorded_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Err(TrackerError::Duplicate(record.message_id.clone()));
        }

        query(r#"DELETE FROM message_claims WHERE message_id = ?1"#)
            .bind(&record.message_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(
            target: "tracker",
            message_id = %record.message_id,
            outcome = record.outcome.as_str(),
            "run record stored"
        );
        Ok(())
    }

    async fn claim(&self, message_id: &str, run_id: &str) -> Result<bool, TrackerError> {
        let now = Utc::now().timestamp_millis();
        let stale_before = now.saturating_sub(self.lease.as_millis() as i64);
        let affected = query(
            r#"INSERT INTO message_claims (message_id, run_id, claimed_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(message_id) DO UPDATE
                 SET run_id = excluded.run_id, claimed_at = excluded.claimed_at
                 WHERE message_claims.claimed_at < ?4
                    OR message_claims.run_id = excluded.run_id"#,
        )
        .bind(message_id)
        .bind(run_id)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn release(&self, message_id: &str, run_id: &str) -> Result<(), TrackerError> {
        query(r#"DELETE FROM message_claims WHERE message_id = ?1 AND run_id = ?2"#)
            .bind(message_id)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_summary(&self, summary: &RunSummary) -> Result<(), TrackerError> {
        let payload =
            serde_json::to_string(summary).map_err(|err| TrackerError::Corrupt(err.to_string()))?;
        query(
            r#"INSERT OR REPLACE INTO run_summaries
               (run_id, started_at, created, skipped, failed, deferred, run_error, payload)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        )
        .bind(&summary.run_id)
        .bind(summary.started_at)
        .bind(summary.created as i64)
        .bind(summary.skipped as i64)
        .bind(summary.failed as i64)
        .bind(summary.deferred as i64)
        .bind(summary.run_error.as_deref())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_summaries(&self, limit: u32) -> Result<Vec<RunSummary>, TrackerError> {
        let rows: Vec<(String,)> = query_as(
            r#"SELECT payload FROM run_summaries ORDER BY started_at DESC LIMIT ?1"#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload).map_err(|err| TrackerError::Corrupt(err.to_string()))
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct RunRecordRow(RunRecord);

impl<'r> FromRow<'r, SqliteRow> for RunRecordRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let outcome: String = row.try_get("outcome")?;
        let error_kind: Option<String> = row.try_get("error_kind")?;
        let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
        Ok(Self(RunRecord {
            message_id: row.try_get("message_id")?,
            run_id: row.try_get("run_id")?,
            outcome: RunOutcome::parse(&outcome)
                .ok_or_else(|| sqlx::Error::Decode(format!("unknown outcome {outcome}").into()))?,
            recorded_at,
            detail: row.try_get("detail")?,
            error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
        }))
    }
}
