//! Document loader: prioritized page text with a process-wide cache.
//!
//! Financial reports put their summary tables and statements at predictable
//! page positions. The loader emits those pages first, then every other page
//! in original order, drops near-empty pages, and caps the result at a
//! character budget.
//!
//! Text is memoized per path. Each path has its own slot lock, so a document
//! is extracted at most once even when several stages ask for it at the same
//! time, while different documents extract in parallel.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::LoaderConfig;
use crate::error::AnalysisError;
use crate::extract::{PageSource, PdfPageSource};

pub const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED]";

type Slot = Arc<Mutex<Option<Arc<str>>>>;

pub struct DocumentLoader {
    source: Box<dyn PageSource>,
    priority_pages: Vec<usize>,
    min_page_chars: usize,
    max_chars: usize,
    cache: Mutex<HashMap<PathBuf, Slot>>,
}

impl DocumentLoader {
    pub fn new(config: &LoaderConfig) -> Self {
        Self::with_source(config, Box::new(PdfPageSource))
    }

    pub fn with_source(config: &LoaderConfig, source: Box<dyn PageSource>) -> Self {
        Self {
            source,
            priority_pages: config.priority_pages.clone(),
            min_page_chars: config.min_page_chars,
            max_chars: config.max_chars,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the prepared text for `path`, extracting it on first use.
    ///
    /// Failures are not cached; the job that hit them is failed and the
    /// document removed, so nothing asks again.
    pub fn load(&self, path: &Path) -> Result<Arc<str>, AnalysisError> {
        let slot = self.slot(path)?;
        let mut entry = slot
            .lock()
            .map_err(|_| AnalysisError::unreadable(path.display().to_string(), "cache lock poisoned"))?;

        if let Some(text) = entry.as_ref() {
            debug!(path = %path.display(), "document cache hit");
            return Ok(Arc::clone(text));
        }

        let pages = self
            .source
            .pages(path)
            .map_err(|e| AnalysisError::unreadable(path.display().to_string(), e.to_string()))?;
        let text: Arc<str> = Arc::from(self.assemble(&pages));
        debug!(
            path = %path.display(),
            pages = pages.len(),
            chars = text.chars().count(),
            "document extracted"
        );
        *entry = Some(Arc::clone(&text));
        Ok(text)
    }

    pub fn cached_documents(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn slot(&self, path: &Path) -> Result<Slot, AnalysisError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AnalysisError::unreadable(path.display().to_string(), "cache lock poisoned"))?;
        Ok(Arc::clone(cache.entry(path.to_path_buf()).or_default()))
    }

    /// Orders, filters, labels, and truncates extracted pages.
    pub fn assemble(&self, pages: &[String]) -> String {
        let mut seen = HashSet::new();
        let order = self
            .priority_pages
            .iter()
            .copied()
            .chain(0..pages.len())
            .filter(|&i| i < pages.len() && seen.insert(i));

        let mut sections = Vec::new();
        for i in order {
            let content = pages[i].trim();
            if content.chars().count() < self.min_page_chars {
                continue;
            }
            sections.push(format!("--- Page {} ---\n{}", i + 1, content));
        }

        truncate(sections.join("\n\n"), self.max_chars)
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut out = text[..cut].to_string();
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text,
    }
}
