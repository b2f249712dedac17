//! Queued execution of analysis jobs.
//!
//! Two dispatch modes share [`run_task`]:
//!
//! - **local**: a [`WorkerPool`] of tokio tasks inside the server consumes
//!   an in-process channel.
//! - **external**: the server only submits; `finsight worker` processes
//!   poll the store with [`run_worker`].
//!
//! Either way a job is claimed in the store before it runs, so a job that
//! two consumers see is still processed once.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::jobs::{JobManager, JobOutcome};
use crate::storage::DocumentHandle;

/// Everything a worker needs to run one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub job_id: String,
    pub query: String,
    pub document: String,
    pub original_name: String,
}

/// Task entry point. Takes ownership of the staged document.
pub async fn run_task(manager: &JobManager, task: TaskMessage) -> Result<JobOutcome> {
    info!(
        job_id = %task.job_id,
        original_name = %task.original_name,
        "task received"
    );
    let handle = DocumentHandle::new(&task.document);
    let outcome = manager.run(&task.job_id, handle).await?;
    Ok(outcome)
}

/// Hands submitted jobs to whatever will run them.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn mode(&self) -> &str;
    async fn dispatch(&self, task: TaskMessage) -> Result<()>;
}

/// Leaves jobs `pending` in the store for external workers.
pub struct ExternalDispatch;

#[async_trait]
impl Dispatcher for ExternalDispatch {
    fn mode(&self) -> &str {
        "external"
    }

    async fn dispatch(&self, task: TaskMessage) -> Result<()> {
        debug!(job_id = %task.job_id, "left pending for external workers");
        Ok(())
    }
}

/// Fixed-size pool of in-process workers.
pub struct WorkerPool {
    sender: mpsc::Sender<TaskMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(manager: Arc<JobManager>, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<TaskMessage>(256);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let manager = Arc::clone(&manager);
            let receiver = Arc::clone(&receiver);
            let name = format!("local-{}", worker_id);

            handles.push(tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(task) = next else { break };
                    run_isolated(&manager, &name, task).await;
                }
                debug!(worker = %name, "worker stopped");
            }));
        }

        info!(workers, "worker pool started");
        Self { sender, handles }
    }

    /// Closes the channel and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker loop ended abnormally");
            }
        }
    }
}

#[async_trait]
impl Dispatcher for WorkerPool {
    fn mode(&self) -> &str {
        "local"
    }

    async fn dispatch(&self, task: TaskMessage) -> Result<()> {
        self.sender
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is shut down"))
    }
}

async fn try_claim(manager: &JobManager, worker: &str, job_id: &str) -> bool {
    match manager.store().claim(job_id, worker).await {
        Ok(true) => true,
        Ok(false) => {
            debug!(worker, job_id, "job already claimed");
            false
        }
        Err(e) => {
            error!(worker, job_id, error = %e, "claim failed");
            false
        }
    }
}

async fn run_claimed(manager: &JobManager, worker: &str, task: TaskMessage) -> Option<JobOutcome> {
    let job_id = task.job_id.clone();
    match run_task(manager, task).await {
        Ok(outcome) => {
            info!(worker, job_id = %outcome.job_id, status = %outcome.status, "task finished");
            Some(outcome)
        }
        Err(e) => {
            error!(worker, job_id = %job_id, error = %e, "task errored");
            None
        }
    }
}

/// Claims the job, then runs it. Returns `None` if another worker owns it.
async fn process_claimed(manager: &JobManager, worker: &str, task: TaskMessage) -> Option<JobOutcome> {
    if !try_claim(manager, worker, &task.job_id).await {
        return None;
    }
    run_claimed(manager, worker, task).await
}

/// Runs one job on its own task so a panic fails that job instead of
/// taking the pool worker down with it.
async fn run_isolated(manager: &Arc<JobManager>, worker: &str, task: TaskMessage) {
    let job_id = task.job_id.clone();
    let job = tokio::spawn({
        let manager = Arc::clone(manager);
        let worker = worker.to_string();
        async move {
            process_claimed(&manager, &worker, task).await;
        }
    });
    if let Err(e) = job.await {
        error!(worker, job_id = %job_id, error = %e, "task aborted");
        if let Err(e) = manager.abandon(&job_id, &abort_reason(&e)).await {
            error!(worker, job_id = %job_id, error = %e, "could not mark aborted job failed");
        }
    }
}

fn abort_reason(err: &JoinError) -> String {
    if err.is_panic() {
        "worker task panicked".to_string()
    } else {
        "worker task was cancelled".to_string()
    }
}

/// Claims and runs every unclaimed pending job currently in the store.
/// Returns the outcomes of the jobs this worker ran.
pub async fn drain_pending(manager: &JobManager, worker: &str) -> Result<Vec<JobOutcome>> {
    let mut outcomes = Vec::new();
    loop {
        let batch = manager.store().unclaimed_pending(10).await?;
        let mut claimed = 0;
        for job in batch {
            if !try_claim(manager, worker, job.id()).await {
                continue;
            }
            claimed += 1;
            let task = TaskMessage {
                job_id: job.id().to_string(),
                query: job.query().to_string(),
                document: job.document().to_string(),
                original_name: job.original_name().to_string(),
            };
            if let Some(outcome) = run_claimed(manager, worker, task).await {
                outcomes.push(outcome);
            }
        }
        if claimed == 0 {
            return Ok(outcomes);
        }
    }
}

/// Polls for pending jobs until `shutdown` resolves.
pub async fn run_worker_until<F>(
    manager: Arc<JobManager>,
    worker: &str,
    poll_interval: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!(worker, poll_ms = poll_interval.as_millis() as u64, "worker polling");
    tokio::pin!(shutdown);
    loop {
        if let Err(e) = drain_pending(&manager, worker).await {
            warn!(worker, error = %e, "poll failed");
        }
        tokio::select! {
            _ = &mut shutdown => {
                info!(worker, "worker shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// `finsight worker`: polls until Ctrl-C.
pub async fn run_worker(manager: Arc<JobManager>, worker: &str, poll_interval: Duration) -> Result<()> {
    run_worker_until(manager, worker, poll_interval, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
