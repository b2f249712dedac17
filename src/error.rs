//! Error taxonomy for the analysis core.

use thiserror::Error;

use crate::models::{JobStatus, StageName};

/// Failure reported by a generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Timeout, rate limit, connection reset. Worth retrying.
    #[error("transient generation failure: {0}")]
    Transient(String),
    /// Refused or malformed response. Retrying will not help.
    #[error("permanent generation failure: {0}")]
    Permanent(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The source document could not be parsed. Never retried.
    #[error("unreadable document {path}: {reason}")]
    DocumentUnreadable { path: String, reason: String },

    /// A stage's generation call failed after its retry policy ran out.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: GenerationError,
    },

    #[error("capability `{name}` failed: {message}")]
    Capability { name: String, message: String },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("illegal job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Attempt to overwrite an output within one run.
    #[error("stage `{0}` already has an output")]
    DuplicateStageOutput(StageName),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl AnalysisError {
    pub fn unreadable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalysisError::DocumentUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
