//! Named capabilities that pipeline stages may invoke.
//!
//! A capability takes one text input and returns text. The four built-ins:
//!
//! | Name | Input | Behavior |
//! |---|---|---|
//! | `read_document` | document path | prepared text from the [`DocumentLoader`] |
//! | `analyze_investment` | document text | whitespace-normalized, investment-framed |
//! | `assess_risk` | document text | whitespace-normalized, risk-framed |
//! | `search` | query | web search results (optional) |
//!
//! None of them call the generation backend; the stage that holds them does.
//! The only shared state they touch is the loader's document cache.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::loader::DocumentLoader;
use crate::search::SearchProvider;

pub const READ_DOCUMENT: &str = "read_document";
pub const ANALYZE_INVESTMENT: &str = "analyze_investment";
pub const ASSESS_RISK: &str = "assess_risk";
pub const SEARCH: &str = "search";

#[async_trait]
pub trait Capability: Send + Sync {
    /// Lowercase identifier used in stage definitions.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, input: &str) -> Result<String, AnalysisError>;
}

pub struct ReadDocument {
    loader: Arc<DocumentLoader>,
}

impl ReadDocument {
    pub fn new(loader: Arc<DocumentLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Capability for ReadDocument {
    fn name(&self) -> &str {
        READ_DOCUMENT
    }

    fn description(&self) -> &str {
        "Read and extract text content from a financial PDF document"
    }

    async fn invoke(&self, input: &str) -> Result<String, AnalysisError> {
        let loader = Arc::clone(&self.loader);
        let path = PathBuf::from(input);
        let text = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| AnalysisError::unreadable(input, format!("extraction task failed: {}", e)))??;
        Ok(text.to_string())
    }
}

pub struct AnalyzeInvestment;

#[async_trait]
impl Capability for AnalyzeInvestment {
    fn name(&self) -> &str {
        ANALYZE_INVESTMENT
    }

    fn description(&self) -> &str {
        "Prepare financial document data for investment analysis"
    }

    async fn invoke(&self, input: &str) -> Result<String, AnalysisError> {
        Ok(format!(
            "Financial document content for investment analysis:\n\n{}",
            normalize_whitespace(input)
        ))
    }
}

pub struct AssessRisk;

#[async_trait]
impl Capability for AssessRisk {
    fn name(&self) -> &str {
        ASSESS_RISK
    }

    fn description(&self) -> &str {
        "Prepare financial document data for risk assessment"
    }

    async fn invoke(&self, input: &str) -> Result<String, AnalysisError> {
        Ok(format!(
            "Financial document content for risk assessment:\n\n{}",
            normalize_whitespace(input)
        ))
    }
}

pub struct Search {
    provider: Arc<dyn SearchProvider>,
}

impl Search {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Capability for Search {
    fn name(&self) -> &str {
        SEARCH
    }

    fn description(&self) -> &str {
        "Search the web for market context"
    }

    async fn invoke(&self, input: &str) -> Result<String, AnalysisError> {
        self.provider
            .search(input)
            .await
            .map_err(|e| AnalysisError::Capability {
                name: SEARCH.to_string(),
                message: format!("{} ({})", e, self.provider.name()),
            })
    }
}

/// Trims the text and collapses runs of spaces to one. Line breaks are kept
/// so page markers survive.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.trim().chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

/// Capabilities available to the pipeline, looked up by name.
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
        }
    }

    pub fn with_builtins(loader: Arc<DocumentLoader>, search: Arc<dyn SearchProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadDocument::new(loader)));
        registry.register(Arc::new(AnalyzeInvestment));
        registry.register(Arc::new(AssessRisk));
        registry.register(Arc::new(Search::new(search)));
        registry
    }

    /// Adds a capability, replacing any existing one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.retain(|c| c.name() != capability.name());
        self.capabilities.push(capability);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .find(|c| c.name() == name)
            .map(Arc::clone)
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
