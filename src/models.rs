//! Core data models: jobs, their status machine, and stage outputs.
//!
//! [`Job`] keeps its status-bearing fields private. The only way to move a
//! job forward is through its transition methods, which reject anything but
//! `pending → processing → {completed | failed}`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::AnalysisError;

/// The four fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Verify,
    Analyze,
    Recommend,
    Risk,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Verify,
        StageName::Analyze,
        StageName::Recommend,
        StageName::Risk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Verify => "verify",
            StageName::Analyze => "analyze",
            StageName::Recommend => "recommend",
            StageName::Risk => "risk",
        }
    }

    /// Human-readable section label used in prompts and reports.
    pub fn label(&self) -> &'static str {
        match self {
            StageName::Verify => "Document Verification",
            StageName::Analyze => "Financial Analysis",
            StageName::Recommend => "Investment Analysis",
            StageName::Risk => "Risk Assessment",
        }
    }

    pub fn ordinal(&self) -> usize {
        match self {
            StageName::Verify => 0,
            StageName::Analyze => 1,
            StageName::Recommend => 2,
            StageName::Risk => 3,
        }
    }

    /// Column holding this stage's output in `analysis_jobs`.
    pub fn column(&self) -> &'static str {
        match self {
            StageName::Verify => "verification_report",
            StageName::Analyze => "financial_analysis",
            StageName::Recommend => "investment_analysis",
            StageName::Risk => "risk_assessment",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!(
                "unknown job status '{}': expected pending, processing, completed, or failed",
                other
            )),
        }
    }
}

/// Raw output of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub stage: StageName,
    pub text: String,
    pub ordinal: usize,
}

impl StageOutput {
    pub fn new(stage: StageName, text: impl Into<String>) -> Self {
        Self {
            stage,
            text: text.into(),
            ordinal: stage.ordinal(),
        }
    }
}

/// One slot per stage; a slot is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutputs {
    slots: [Option<String>; 4],
}

impl StageOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: StageName) -> Option<&str> {
        self.slots[stage.ordinal()].as_deref()
    }

    pub fn record(&mut self, stage: StageName, text: impl Into<String>) -> Result<(), AnalysisError> {
        let slot = &mut self.slots[stage.ordinal()];
        if slot.is_some() {
            return Err(AnalysisError::DuplicateStageOutput(stage));
        }
        *slot = Some(text.into());
        Ok(())
    }

    /// Every stage in order with its output, if any.
    pub fn iter(&self) -> impl Iterator<Item = (StageName, Option<&str>)> {
        StageName::ALL
            .into_iter()
            .map(move |stage| (stage, self.get(stage)))
    }

    pub fn recorded(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded() == 0
    }
}

impl From<&[StageOutput]> for StageOutputs {
    fn from(outputs: &[StageOutput]) -> Self {
        let mut all = StageOutputs::new();
        for output in outputs {
            all.slots[output.stage.ordinal()] = Some(output.text.clone());
        }
        all
    }
}

/// Every persisted field of a job, used to rebuild a [`Job`] from storage.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub query: String,
    pub document: String,
    pub original_name: String,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub degraded: bool,
    pub stage_outputs: StageOutputs,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

/// One user-submitted analysis request.
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    query: String,
    document: String,
    original_name: String,
    status: JobStatus,
    result: Option<String>,
    error_message: Option<String>,
    degraded: bool,
    stage_outputs: StageOutputs,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<f64>,
}

impl Job {
    /// A fresh job in `pending`, the only legal initial state.
    pub fn new(
        query: impl Into<String>,
        document: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            document: document.into(),
            original_name: original_name.into(),
            status: JobStatus::Pending,
            result: None,
            error_message: None,
            degraded: false,
            stage_outputs: StageOutputs::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
        }
    }

    /// Rebuilds a job from storage, rejecting records that break the
    /// status invariants.
    pub fn from_record(record: JobRecord) -> Result<Self, AnalysisError> {
        let completed = record.status == JobStatus::Completed;
        let failed = record.status == JobStatus::Failed;
        if record.result.is_some() != completed {
            return Err(corrupt(&record.id, "result must be set iff completed"));
        }
        if record.error_message.is_some() != failed {
            return Err(corrupt(&record.id, "error_message must be set iff failed"));
        }
        if record.status == JobStatus::Pending && !record.stage_outputs.is_empty() {
            return Err(corrupt(&record.id, "pending job has stage outputs"));
        }

        Ok(Self {
            id: record.id,
            query: record.query,
            document: record.document,
            original_name: record.original_name,
            status: record.status,
            result: record.result,
            error_message: record.error_message,
            degraded: record.degraded,
            stage_outputs: record.stage_outputs,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration_seconds: record.duration_seconds,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn query(&self) -> &str {
        &self.query
    }
    pub fn document(&self) -> &str {
        &self.document
    }
    pub fn original_name(&self) -> &str {
        &self.original_name
    }
    pub fn status(&self) -> JobStatus {
        self.status
    }
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
    pub fn degraded(&self) -> bool {
        self.degraded
    }
    pub fn stage_outputs(&self) -> &StageOutputs {
        &self.stage_outputs
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), AnalysisError> {
        if !self.status.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AnalysisError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Only legal while `processing`.
    pub fn record_stage(&mut self, output: &StageOutput) -> Result<(), AnalysisError> {
        if self.status != JobStatus::Processing {
            return Err(AnalysisError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        self.stage_outputs.record(output.stage, output.text.clone())
    }

    pub fn complete(
        &mut self,
        result: impl Into<String>,
        degraded: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AnalysisError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result.into());
        self.degraded = degraded;
        self.finish_clock(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), AnalysisError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        self.finish_clock(now);
        Ok(())
    }

    fn finish_clock(&mut self, now: DateTime<Utc>) {
        self.completed_at = Some(now);
        let started = self.started_at.unwrap_or(self.created_at);
        let elapsed = now.signed_duration_since(started);
        self.duration_seconds = Some(elapsed.num_milliseconds().max(0) as f64 / 1000.0);
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id.clone(),
            query: self.query.clone(),
            document: self.document.clone(),
            original_name: self.original_name.clone(),
            status: self.status,
            result: self.result.clone(),
            error_message: self.error_message.clone(),
            degraded: self.degraded,
            stage_outputs: self.stage_outputs.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration_seconds,
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            status: self.status,
            query: self.query.clone(),
            original_name: self.original_name.clone(),
            result: self.result.clone(),
            error: self.error_message.clone(),
            degraded: self.degraded,
            stages_completed: self.stage_outputs.recorded(),
            created_at: format_ts_iso(self.created_at),
            started_at: self.started_at.map(format_ts_iso),
            completed_at: self.completed_at.map(format_ts_iso),
            duration_seconds: self.duration_seconds,
        }
    }

    /// The stored report with every stage output; `None` unless completed.
    pub fn result_view(&self) -> Option<ResultView> {
        let analysis = self.result.clone()?;
        Some(ResultView {
            job_id: self.id.clone(),
            query: self.query.clone(),
            original_name: self.original_name.clone(),
            analysis,
            degraded: self.degraded,
            stages: self
                .stage_outputs
                .iter()
                .map(|(stage, text)| StageView {
                    stage,
                    label: stage.label(),
                    output: text.map(str::to_string),
                })
                .collect(),
            duration_seconds: self.duration_seconds,
            completed_at: self.completed_at.map(format_ts_iso),
        })
    }
}

fn corrupt(id: &str, why: &str) -> AnalysisError {
    AnalysisError::Store(anyhow::anyhow!("corrupt job record {}: {}", id, why))
}

/// Status view returned by `GET /jobs/{id}` and `finsight jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub query: String,
    pub original_name: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub degraded: bool,
    pub stages_completed: usize,
    pub created_at: String, // ISO8601
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub stage: StageName,
    pub label: &'static str,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub job_id: String,
    pub query: String,
    pub original_name: String,
    pub analysis: String,
    pub degraded: bool,
    pub stages: Vec<StageView>,
    pub duration_seconds: Option<f64>,
    pub completed_at: Option<String>,
}

pub fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_job() -> Job {
        let mut job = Job::new("Analyze Q2 performance", "/tmp/a.pdf", "a.pdf");
        job.start(Utc::now()).unwrap();
        job
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new("q", "d", "n");
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.result().is_none());
        assert!(job.error_message().is_none());
        assert!(job.stage_outputs().is_empty());
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for status in [JobStatus::Completed, JobStatus::Failed] {
            assert!(status.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_cannot_skip_processing() {
        let mut job = Job::new("q", "d", "n");
        let err = job.complete("report", false, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        ));
        assert!(job.result().is_none());
    }

    #[test]
    fn stage_output_rejected_before_processing() {
        let mut job = Job::new("q", "d", "n");
        let err = job
            .record_stage(&StageOutput::new(StageName::Verify, "VERIFIED"))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTransition { .. }));
    }

    #[test]
    fn result_set_only_on_completion() {
        let mut done = processing_job();
        done.complete("report", false, Utc::now()).unwrap();
        assert_eq!(done.status(), JobStatus::Completed);
        assert_eq!(done.result(), Some("report"));
        assert!(done.error_message().is_none());
        assert!(done.duration_seconds().is_some());

        let mut failed = processing_job();
        failed.fail("boom", Utc::now()).unwrap();
        assert_eq!(failed.status(), JobStatus::Failed);
        assert!(failed.result().is_none());
        assert_eq!(failed.error_message(), Some("boom"));

        assert!(failed.complete("late", false, Utc::now()).is_err());
        assert!(done.fail("late", Utc::now()).is_err());
    }

    #[test]
    fn stage_outputs_are_append_only() {
        let mut job = processing_job();
        job.record_stage(&StageOutput::new(StageName::Verify, "first"))
            .unwrap();
        let err = job
            .record_stage(&StageOutput::new(StageName::Verify, "second"))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateStageOutput(StageName::Verify)));
        assert_eq!(job.stage_outputs().get(StageName::Verify), Some("first"));
    }

    #[test]
    fn from_record_rejects_result_on_failed_job() {
        let mut record = Job::new("q", "d", "n").to_record();
        record.status = JobStatus::Failed;
        record.result = Some("report".into());
        record.error_message = Some("boom".into());
        assert!(Job::from_record(record).is_err());
    }

    #[test]
    fn status_parses_round_trip_names() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn result_view_lists_every_stage_in_order() {
        let mut job = processing_job();
        job.record_stage(&StageOutput::new(StageName::Verify, "v"))
            .unwrap();
        job.complete("report", true, Utc::now()).unwrap();
        let view = job.result_view().unwrap();
        let stages: Vec<_> = view.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, StageName::ALL.to_vec());
        assert_eq!(view.stages[0].output.as_deref(), Some("v"));
        assert!(view.stages[1].output.is_none());
        assert!(view.degraded);
    }
}
