//! SQLite-backed [`JobStore`] over the `analysis_jobs` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Job, JobRecord, JobStatus, StageName, StageOutputs};

use super::{JobQuery, JobStore};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width RFC 3339 so string order matches time order.
fn to_db_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in analysis_jobs: {}", raw))?
        .with_timezone(&Utc))
}

fn opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(from_db_ts).transpose()
}

const SELECT_COLUMNS: &str = "job_id, query, document, original_name, status, result, \
     error_message, degraded, verification_report, financial_analysis, investment_analysis, \
     risk_assessment, created_at, started_at, completed_at, duration_seconds";

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let status: String = row.try_get("status")?;
    let status: JobStatus = status.parse().map_err(anyhow::Error::msg)?;

    let mut outputs = StageOutputs::new();
    for stage in StageName::ALL {
        let text: Option<String> = row.try_get(stage.column())?;
        if let Some(text) = text {
            outputs.record(stage, text)?;
        }
    }

    let record = JobRecord {
        id: row.try_get("job_id")?,
        query: row.try_get("query")?,
        document: row.try_get("document")?,
        original_name: row.try_get("original_name")?,
        status,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        degraded: row.try_get::<i64, _>("degraded")? != 0,
        stage_outputs: outputs,
        created_at: from_db_ts(&row.try_get::<String, _>("created_at")?)?,
        started_at: opt_ts(row.try_get("started_at")?)?,
        completed_at: opt_ts(row.try_get("completed_at")?)?,
        duration_seconds: row.try_get("duration_seconds")?,
    };
    Ok(Job::from_record(record)?)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let outputs = job.stage_outputs();
        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (job_id, query, document, original_name, status, result,
                                       error_message, degraded, verification_report,
                                       financial_analysis, investment_analysis, risk_assessment,
                                       created_at, started_at, completed_at, duration_seconds)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                error_message = excluded.error_message,
                degraded = excluded.degraded,
                verification_report = excluded.verification_report,
                financial_analysis = excluded.financial_analysis,
                investment_analysis = excluded.investment_analysis,
                risk_assessment = excluded.risk_assessment,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                duration_seconds = excluded.duration_seconds
            "#,
        )
        .bind(job.id())
        .bind(job.query())
        .bind(job.document())
        .bind(job.original_name())
        .bind(job.status().as_str())
        .bind(job.result())
        .bind(job.error_message())
        .bind(job.degraded() as i64)
        .bind(outputs.get(StageName::Verify))
        .bind(outputs.get(StageName::Analyze))
        .bind(outputs.get(StageName::Recommend))
        .bind(outputs.get(StageName::Risk))
        .bind(to_db_ts(job.created_at()))
        .bind(job.started_at().map(to_db_ts))
        .bind(job.completed_at().map(to_db_ts))
        .bind(job.duration_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM analysis_jobs WHERE job_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let rows = match query.status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM analysis_jobs WHERE status = ? \
                     ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(query.limit as i64)
                    .bind(query.offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM analysis_jobs \
                     ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(query.limit as i64)
                    .bind(query.offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_job).collect()
    }

    async fn count(&self, status: Option<JobStatus>) -> Result<u64> {
        let n: i64 = match status {
            Some(status) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM analysis_jobs WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM analysis_jobs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(n as u64)
    }

    async fn claim(&self, job_id: &str, worker: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET claimed_by = ?, claimed_at = ? \
             WHERE job_id = ? AND status = 'pending' AND claimed_by IS NULL",
        )
        .bind(worker)
        .bind(to_db_ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unclaimed_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM analysis_jobs WHERE status = 'pending' AND claimed_by IS NULL \
             ORDER BY created_at ASC, rowid ASC LIMIT ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }
}
