//! Sequential stage execution.
//!
//! A run walks the stage list in order. For each stage it invokes the
//! stage's capabilities, renders the prompt with the outputs of the declared
//! upstream stages, calls the generator under the retry policy, applies the
//! content policy, and appends the output.
//!
//! ```text
//! not_started → running(verify) → running(analyze) → … → finished
//!                        └──────────── any failure ───────→ aborted
//! ```
//!
//! An aborted run keeps the outputs produced before the failure.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capabilities::{Capability, CapabilityRegistry, READ_DOCUMENT, SEARCH};
use crate::error::AnalysisError;
use crate::llm::{generate_with_retry, Generator, RetryPolicy};
use crate::models::{StageName, StageOutput, StageOutputs};
use crate::policy;
use crate::stages::StageDefinition;

pub const SEARCH_UNAVAILABLE: &str = "Web search unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running(StageName),
    Finished,
    Aborted { stage: StageName },
}

/// Outcome of one pipeline run.
#[derive(Debug)]
pub struct PipelineRun {
    pub outputs: Vec<StageOutput>,
    pub state: RunState,
    pub error: Option<AnalysisError>,
    /// Every distinct capability result produced so far in the run. Stage
    /// and synthesis outputs may cite whatever these contain.
    pub sources: Vec<String>,
}

impl PipelineRun {
    pub fn is_finished(&self) -> bool {
        self.state == RunState::Finished
    }

    /// Capability results plus the recorded stage outputs: the material a
    /// final report may cite.
    pub fn report_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .map(String::as_str)
            .chain(self.outputs.iter().map(|o| o.text.as_str()))
            .collect()
    }

    fn add_sources(&mut self, results: Vec<String>) {
        for text in results {
            if !self.sources.contains(&text) {
                self.sources.push(text);
            }
        }
    }

    pub fn stage_outputs(&self) -> StageOutputs {
        StageOutputs::from(self.outputs.as_slice())
    }

    fn output(&self, stage: StageName) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.stage == stage)
            .map(|o| o.text.as_str())
    }
}

/// Receives stage progress as it happens, so callers can persist partial
/// results before the run ends.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn on_stage_started(&self, _stage: StageName) {}

    /// An error here aborts the run.
    async fn on_stage_completed(&self, output: &StageOutput) -> Result<(), AnalysisError>;
}

pub struct NoopObserver;

#[async_trait]
impl StageObserver for NoopObserver {
    async fn on_stage_completed(&self, _output: &StageOutput) -> Result<(), AnalysisError> {
        Ok(())
    }
}

struct ResolvedStage {
    definition: StageDefinition,
    capabilities: Vec<Arc<dyn Capability>>,
}

pub struct Pipeline {
    stages: Vec<ResolvedStage>,
    generator: Arc<dyn Generator>,
    model: String,
    retry: RetryPolicy,
}

impl Pipeline {
    /// Resolves every stage's capability names against `registry`.
    ///
    /// Fails if a capability is missing or a stage lists an upstream stage
    /// that does not run before it.
    pub fn new(
        definitions: Vec<StageDefinition>,
        registry: &CapabilityRegistry,
        generator: Arc<dyn Generator>,
        model: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, AnalysisError> {
        let mut stages: Vec<ResolvedStage> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            for upstream in definition.upstream {
                if !stages.iter().any(|s| s.definition.name == *upstream) {
                    return Err(AnalysisError::Capability {
                        name: definition.name.to_string(),
                        message: format!("upstream stage `{}` does not run before it", upstream),
                    });
                }
            }
            let capabilities = definition
                .capabilities
                .iter()
                .map(|name| {
                    registry.find(name).ok_or_else(|| AnalysisError::Capability {
                        name: name.to_string(),
                        message: format!("not registered (required by stage `{}`)", definition.name),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            stages.push(ResolvedStage {
                definition,
                capabilities,
            });
        }

        Ok(Self {
            stages,
            generator,
            model: model.into(),
            retry,
        })
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.definition.name).collect()
    }

    /// Runs every stage in order. Never panics on stage failure: the error
    /// is carried in [`PipelineRun::error`].
    pub async fn run(
        &self,
        query: &str,
        file_path: &str,
        observer: &dyn StageObserver,
    ) -> PipelineRun {
        let mut run = PipelineRun {
            outputs: Vec::with_capacity(self.stages.len()),
            state: RunState::NotStarted,
            error: None,
            sources: Vec::new(),
        };

        for stage in &self.stages {
            let name = stage.definition.name;
            run.state = RunState::Running(name);
            observer.on_stage_started(name).await;
            debug!(stage = %name, "stage started");

            match self.run_stage(stage, query, file_path, &run).await {
                Ok((output, results)) => {
                    run.add_sources(results);
                    if let Err(e) = observer.on_stage_completed(&output).await {
                        warn!(stage = %name, error = %e, "stage output could not be recorded");
                        run.state = RunState::Aborted { stage: name };
                        run.error = Some(e);
                        return run;
                    }
                    info!(stage = %name, chars = output.text.len(), "stage completed");
                    run.outputs.push(output);
                }
                Err(e) => {
                    warn!(stage = %name, error = %e, "stage failed, aborting run");
                    run.state = RunState::Aborted { stage: name };
                    run.error = Some(e);
                    return run;
                }
            }
        }

        run.state = RunState::Finished;
        run
    }

    async fn run_stage(
        &self,
        stage: &ResolvedStage,
        query: &str,
        file_path: &str,
        run: &PipelineRun,
    ) -> Result<(StageOutput, Vec<String>), AnalysisError> {
        let name = stage.definition.name;

        let mut document: Option<String> = None;
        let mut results: Vec<(String, String)> = Vec::new();
        let mut document_consumed = false;

        for capability in &stage.capabilities {
            let cap_name = capability.name();
            let text = match cap_name {
                READ_DOCUMENT => {
                    let text = capability.invoke(file_path).await?;
                    document = Some(text.clone());
                    text
                }
                SEARCH => match capability.invoke(query).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(stage = %name, error = %e, "search failed; continuing without it");
                        SEARCH_UNAVAILABLE.to_string()
                    }
                },
                _ => {
                    document_consumed = true;
                    capability
                        .invoke(document.as_deref().unwrap_or_default())
                        .await?
                }
            };
            debug!(stage = %name, capability = cap_name, chars = text.len(), "capability invoked");
            results.push((cap_name.to_string(), text));
        }

        // A framed copy of the document supersedes the raw text in the prompt.
        let shown: Vec<(&str, &str)> = results
            .iter()
            .filter(|(n, _)| !(document_consumed && n == READ_DOCUMENT))
            .map(|(n, t)| (n.as_str(), t.as_str()))
            .collect();

        let upstream: Vec<(StageName, &str)> = stage
            .definition
            .upstream
            .iter()
            .filter_map(|up| run.output(*up).map(|text| (*up, text)))
            .collect();

        let prompt = stage.definition.render(query, file_path, &shown, &upstream);
        let raw = generate_with_retry(self.generator.as_ref(), &prompt, &self.model, &self.retry)
            .await
            .map_err(|source| AnalysisError::Stage {
                stage: name,
                source,
            })?;

        // Capability results from earlier stages stay citable downstream.
        let sources: Vec<&str> = run
            .sources
            .iter()
            .map(String::as_str)
            .chain(results.iter().map(|(_, t)| t.as_str()))
            .collect();
        let checked = policy::enforce(&raw, &sources);
        if checked.removed > 0 {
            warn!(stage = %name, removed = checked.removed, "removed untraceable sources from stage output");
        }

        let texts = results.into_iter().map(|(_, t)| t).collect();
        Ok((StageOutput::new(name, checked.text), texts))
    }
}
