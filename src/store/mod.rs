//! Job persistence.
//!
//! The [`JobStore`] trait is keyed by job id and always stores the whole
//! [`Job`]. Two backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteJobStore`] | server, CLI, and worker processes sharing one file |
//! | [`InMemoryJobStore`] | tests and embedding without a database |
//!
//! Claiming is the at-most-once dispatch guard. It is separate from job
//! status: a claimed job is still `pending` until its run starts.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Job, JobStatus};

pub use memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Filters for [`JobStore::query`]. Results are newest first.
#[derive(Debug, Clone, Copy)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 20,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts or replaces the job with the same id.
    async fn save(&self, job: &Job) -> Result<()>;

    async fn load(&self, job_id: &str) -> Result<Option<Job>>;

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>>;

    async fn count(&self, status: Option<JobStatus>) -> Result<u64>;

    /// Marks a pending, unclaimed job as owned by `worker`. Returns `false`
    /// when the job is missing, not pending, or already claimed.
    async fn claim(&self, job_id: &str, worker: &str) -> Result<bool>;

    /// Pending jobs nobody has claimed yet, oldest first.
    async fn unclaimed_pending(&self, limit: usize) -> Result<Vec<Job>>;
}
