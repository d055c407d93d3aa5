use std::{path::Path, str::FromStr, time::Duration};

use anyhow::Result;
use sqlx::{
    query,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};

#[cfg(test)]
pub mod memory;
pub mod run_records;

pub use run_records::{RunTracker, SqliteRunTracker, TrackerError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS run_records (
        message_id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT,
        error_kind TEXT,
        recorded_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_claims (
        message_id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL,
        claimed_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_summaries (
        run_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        created INTEGER NOT NULL,
        skipped INTEGER NOT NULL,
        failed INTEGER NOT NULL,
        deferred INTEGER NOT NULL,
        run_error TEXT,
        payload TEXT NOT NULL
    )
    "#,
];

pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    for statement in SCHEMA {
        query(statement).execute(&pool).await?;
    }

    Ok(pool)
}
