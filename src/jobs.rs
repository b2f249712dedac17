//! Job lifecycle: submit, run, inspect.
//!
//! [`JobManager::run`] drives one job from `pending` to a terminal state:
//! it marks the job `processing`, runs the pipeline while persisting each
//! stage output as it arrives, synthesizes the report, and records the
//! outcome. The staged document is released when `run` returns, on every
//! path.
//!
//! `run` does no locking of its own. Callers dispatch each job once;
//! [`JobStore::claim`] is the guard the queue layer uses for that.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::capabilities::CapabilityRegistry;
use crate::config::{AnalysisConfig, Config};
use crate::error::AnalysisError;
use crate::llm::{create_generator, RetryPolicy};
use crate::loader::DocumentLoader;
use crate::models::{Job, JobStatus, StageName, StageOutput};
use crate::pipeline::{Pipeline, StageObserver};
use crate::search::create_search;
use crate::stages::standard_stages;
use crate::storage::DocumentHandle;
use crate::store::{JobQuery, JobStore};
use crate::synthesis::Synthesizer;

/// Summary returned by the task entry point.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub degraded: bool,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
}

impl JobOutcome {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id().to_string(),
            status: job.status(),
            degraded: job.degraded(),
            duration_seconds: job.duration_seconds(),
            error: job.error_message().map(str::to_string),
        }
    }
}

/// Query validation and job creation. Needs only the store, so callers
/// that never run a job do not have to build an LLM client.
#[derive(Clone)]
pub struct JobIntake {
    store: Arc<dyn JobStore>,
    analysis: AnalysisConfig,
}

impl JobIntake {
    pub fn new(store: Arc<dyn JobStore>, analysis: AnalysisConfig) -> Self {
        Self { store, analysis }
    }

    pub fn intake(&self) -> &JobIntake {
        &self.intake
    }

    pub fn resolve_query(&self, raw: Option<&str>) -> Result<String, AnalysisError> {
        self.intake.resolve_query(raw)
    }

    pub async fn submit(
        &self,
        query: Option<&str>,
        document: &str,
        original_name: &str,
    ) -> Result<String, AnalysisError> {
        self.intake.submit(query, document, original_name).await
    }
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    intake: JobIntake,
    pipeline: Arc<Pipeline>,
    synthesizer: Arc<Synthesizer>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        pipeline: Arc<Pipeline>,
        synthesizer: Arc<Synthesizer>,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            intake: JobIntake::new(Arc::clone(&store), analysis),
            store,
            pipeline,
            synthesizer,
        }
    }

    /// Wires the standard pipeline from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn JobStore>) -> Result<Self> {
        let loader = Arc::new(DocumentLoader::new(&config.loader));
        let search = create_search(&config.search)?;
        let registry = CapabilityRegistry::with_builtins(loader, search);
        let generator = create_generator(&config.llm)?;
        let retry = RetryPolicy::from_config(&config.llm);

        let pipeline = Pipeline::new(
            standard_stages(),
            &registry,
            Arc::clone(&generator),
            config.llm.model.clone(),
            retry,
        )?;
        let synthesizer = Synthesizer::new(generator, config.llm.synthesis_model(), retry);

        Ok(Self::new(
            store,
            Arc::new(pipeline),
            Arc::new(synthesizer),
            config.analysis.clone(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn intake(&self) -> &JobIntake {
        &self.intake
    }

    pub fn resolve_query(&self, raw: Option<&str>) -> Result<String, AnalysisError> {
        self.intake.resolve_query(raw)
    }

    pub async fn submit(
        &self,
        query: Option<&str>,
        document: &str,
        original_name: &str,
    ) -> Result<String, AnalysisError> {
        self.intake.submit(query, document, original_name).await
    }

    /// Runs a pending job to completion or failure. `document` is removed
    /// before this returns.
    pub async fn run(&self, job_id: &str, document: DocumentHandle) -> Result<JobOutcome, AnalysisError> {
        let mut job = self.get(job_id).await?;
        job.start(Utc::now())?;
        self.store.save(&job).await?;
        info!(job_id, document = %document.path().display(), "job started");

        let query = job.query().to_string();
        let file_path = job.document().to_string();
        let recorder = JobRecorder {
            store: Arc::clone(&self.store),
            job: Mutex::new(job),
        };
        let mut run = self.pipeline.run(&query, &file_path, &recorder).await;
        let mut job = recorder.job.into_inner();

        if let Some(err) = run.error.take() {
            job.fail(err.to_string(), Utc::now())?;
            self.store.save(&job).await?;
            error!(
                job_id,
                stages_completed = run.outputs.len(),
                error = %err,
                "job failed"
            );
        } else {
            let synthesis = self
                .synthesizer
                .synthesize(&run.stage_outputs(), &run.report_sources())
                .await;
            if synthesis.degraded {
                warn!(job_id, "synthesis degraded; stored fallback report");
            }
            job.complete(synthesis.text, synthesis.degraded, Utc::now())?;
            self.store.save(&job).await?;
            info!(
                job_id,
                duration_seconds = job.duration_seconds().unwrap_or_default(),
                degraded = job.degraded(),
                "job completed"
            );
        }

        drop(document);
        Ok(JobOutcome::from_job(&job))
    }

    /// Fails a job whose run ended without recording an outcome, such as a
    /// task that panicked. Terminal jobs are left as they are.
    pub async fn abandon(&self, job_id: &str, reason: &str) -> Result<(), AnalysisError> {
        let mut job = self.get(job_id).await?;
        let now = Utc::now();
        match job.status() {
            JobStatus::Completed | JobStatus::Failed => return Ok(()),
            JobStatus::Pending => job.start(now)?,
            JobStatus::Processing => {}
        }
        job.fail(reason, now)?;
        self.store.save(&job).await?;
        error!(job_id, reason, "job abandoned");
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, AnalysisError> {
        self.store
            .load(job_id)
            .await?
            .ok_or_else(|| AnalysisError::JobNotFound(job_id.to_string()))
    }

    /// One page of jobs, newest first, plus the total matching the filter.
    pub async fn list(&self, query: &JobQuery) -> Result<(Vec<Job>, u64), AnalysisError> {
        let jobs = self.store.query(query).await?;
        let total = self.store.count(query.status).await?;
        Ok((jobs, total))
    }
}

/// Persists each stage output on the job as soon as the stage finishes.
struct JobRecorder {
    store: Arc<dyn JobStore>,
    job: Mutex<Job>,
}

#[async_trait]
impl StageObserver for JobRecorder {
    async fn on_stage_started(&self, stage: StageName) {
        let job = self.job.lock().await;
        info!(job_id = job.id(), stage = %stage, "running stage");
    }

    async fn on_stage_completed(&self, output: &StageOutput) -> Result<(), AnalysisError> {
        let mut job = self.job.lock().await;
        job.record_stage(output)?;
        self.store.save(&job).await?;
        Ok(())
    }
}
