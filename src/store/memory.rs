//! In-memory [`JobStore`] for tests and database-free embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Job, JobStatus};

use super::{JobQuery, JobStore};

struct StoredJob {
    job: Job,
    seq: u64,
    claimed_by: Option<String>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, StoredJob>,
    next_seq: u64,
}

pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn claimed_by(&self, job_id: &str) -> Option<String> {
        self.inner
            .read()
            .ok()?
            .jobs
            .get(job_id)
            .and_then(|s| s.claimed_by.clone())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("job store lock poisoned")
}

/// Newest first; insertion order breaks timestamp ties.
fn newest_first(a: &StoredJob, b: &StoredJob) -> std::cmp::Ordering {
    b.job
        .created_at()
        .cmp(&a.job.created_at())
        .then(b.seq.cmp(&a.seq))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        if let Some(existing) = inner.jobs.get_mut(job.id()) {
            existing.job = job.clone();
            return Ok(());
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id().to_string(),
            StoredJob {
                job: job.clone(),
                seq,
                claimed_by: None,
            },
        );
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.jobs.get(job_id).map(|s| s.job.clone()))
    }

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut matching: Vec<&StoredJob> = inner
            .jobs
            .values()
            .filter(|s| query.status.map_or(true, |st| s.job.status() == st))
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));
        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|s| s.job.clone())
            .collect())
    }

    async fn count(&self, status: Option<JobStatus>) -> Result<u64> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .jobs
            .values()
            .filter(|s| status.map_or(true, |st| s.job.status() == st))
            .count() as u64)
    }

    async fn claim(&self, job_id: &str, worker: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.jobs.get_mut(job_id) {
            Some(s) if s.claimed_by.is_none() && s.job.status() == JobStatus::Pending => {
                s.claimed_by = Some(worker.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unclaimed_pending(&self, limit: usize) -> Result<Vec<Job>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let mut pending: Vec<&StoredJob> = inner
            .jobs
            .values()
            .filter(|s| s.claimed_by.is_none() && s.job.status() == JobStatus::Pending)
            .collect();
        pending.sort_by(|a, b| newest_first(b, a));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(|s| s.job.clone())
            .collect())
    }
}
