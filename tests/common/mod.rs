#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use finsight::capabilities::CapabilityRegistry;
use finsight::config::{AnalysisConfig, LoaderConfig};
use finsight::error::GenerationError;
use finsight::extract::{ExtractError, PageSource};
use finsight::jobs::JobManager;
use finsight::llm::{Generator, RetryPolicy};
use finsight::loader::DocumentLoader;
use finsight::pipeline::Pipeline;
use finsight::search::{DisabledSearch, SearchProvider};
use finsight::stages::standard_stages;
use finsight::store::{InMemoryJobStore, JobStore};
use finsight::synthesis::Synthesizer;

pub const VERIFIER: &str = "Financial Document Verifier";
pub const ANALYST: &str = "Senior Financial Analyst";
pub const ADVISOR: &str = "Investment Advisor";
pub const RISK: &str = "Risk Assessment Specialist";
pub const SYNTHESIS: &str = "synthesis";

/// Generator whose replies are keyed on who is being asked. Stage prompts
/// open with "You are the {role}."; anything else is the synthesis call.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    calls: Mutex<Vec<(String, String)>>,
    panic_once: Mutex<HashSet<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for `who`. The last queued reply repeats once the
    /// queue is down to one.
    pub fn reply(self, who: &str, reply: Result<&str, GenerationError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(who.to_string())
            .or_default()
            .push_back(reply.map(str::to_string));
        self
    }

    pub fn ok(self, who: &str, text: &str) -> Self {
        self.reply(who, Ok(text))
    }

    /// The next call for `who` panics instead of replying.
    pub fn panic_once(self, who: &str) -> Self {
        self.panic_once.lock().unwrap().insert(who.to_string());
        self
    }

    pub fn order(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(w, _)| w.clone()).collect()
    }

    pub fn calls_for(&self, who: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(w, _)| w == who).count()
    }

    pub fn prompt_for(&self, who: &str) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(w, _)| w == who)
            .map(|(_, p)| p.clone())
    }

    fn who(prompt: &str) -> String {
        let first = prompt.lines().next().unwrap_or_default();
        first
            .strip_prefix("You are the ")
            .and_then(|rest| rest.strip_suffix('.'))
            .map(str::to_string)
            .unwrap_or_else(|| SYNTHESIS.to_string())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _model: &str) -> Result<String, GenerationError> {
        let who = Self::who(prompt);
        self.calls
            .lock()
            .unwrap()
            .push((who.clone(), prompt.to_string()));
        if self.panic_once.lock().unwrap().remove(&who) {
            panic!("scripted panic for {}", who);
        }
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&who) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Ok(format!("{} output", who)),
        }
    }
}

/// In-memory page source with a call counter.
pub struct FixedPages {
    pub pages: Result<Vec<String>, String>,
    pub calls: Arc<AtomicUsize>,
}

impl PageSource for FixedPages {
    fn pages(&self, _path: &Path) -> Result<Vec<String>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.clone().map_err(ExtractError::Pdf)
    }
}

/// Ten pages of filler, each long enough to survive the page filter.
pub fn report_pages() -> Vec<String> {
    (1..=10)
        .map(|i| {
            format!(
                "Page {} of the quarterly report. Revenue grew to $4.{} billion with stable operating margins.",
                i, i
            )
        })
        .collect()
}

/// Search provider returning canned result lines.
pub struct FixedSearch(pub &'static str);

#[async_trait]
impl SearchProvider for FixedSearch {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn search(&self, _query: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

pub struct Harness {
    pub manager: JobManager,
    pub store: Arc<InMemoryJobStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub extractions: Arc<AtomicUsize>,
    pub loader: Arc<DocumentLoader>,
}

pub fn harness(generator: ScriptedGenerator) -> Harness {
    harness_with_pages(generator, Ok(report_pages()))
}

pub fn harness_with_pages(
    generator: ScriptedGenerator,
    pages: Result<Vec<String>, String>,
) -> Harness {
    harness_with(generator, pages, Arc::new(DisabledSearch))
}

pub fn harness_with(
    generator: ScriptedGenerator,
    pages: Result<Vec<String>, String>,
    search: Arc<dyn SearchProvider>,
) -> Harness {
    let extractions = Arc::new(AtomicUsize::new(0));
    let loader = Arc::new(DocumentLoader::with_source(
        &LoaderConfig::default(),
        Box::new(FixedPages {
            pages,
            calls: Arc::clone(&extractions),
        }),
    ));
    let registry = CapabilityRegistry::with_builtins(Arc::clone(&loader), search);
    let generator = Arc::new(generator);
    let retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    };

    let pipeline = Pipeline::new(
        standard_stages(),
        &registry,
        generator.clone() as Arc<dyn Generator>,
        "test-model",
        retry,
    )
    .unwrap();
    let synthesizer = Synthesizer::new(generator.clone() as Arc<dyn Generator>, "test-model", retry);

    let store = Arc::new(InMemoryJobStore::new());
    let manager = JobManager::new(
        store.clone() as Arc<dyn JobStore>,
        Arc::new(pipeline),
        Arc::new(synthesizer),
        AnalysisConfig::default(),
    );

    Harness {
        manager,
        store,
        generator,
        extractions,
        loader,
    }
}

/// Writes a placeholder document the job can own and delete.
pub fn placeholder_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4 placeholder").unwrap();
    path
}
