use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Opens the configured database and creates the job table if needed.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent: every statement is `IF NOT EXISTS`.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Timestamps are RFC 3339 strings so lexical order is chronological.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            document TEXT NOT NULL,
            original_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            result TEXT,
            error_message TEXT,
            degraded INTEGER NOT NULL DEFAULT 0,
            verification_report TEXT,
            financial_analysis TEXT,
            investment_analysis TEXT,
            risk_assessment TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            duration_seconds REAL,
            claimed_by TEXT,
            claimed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON analysis_jobs(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON analysis_jobs(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
