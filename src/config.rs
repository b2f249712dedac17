//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file is a valid config.
//! Secrets never live in the file: the `[llm]` and `[search]` sections only
//! name the environment variable holding the key.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/finsight.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Generation backend settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"disabled"`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model for the synthesis call; falls back to `model`.
    #[serde(default)]
    pub synthesis_model: Option<String>,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_base_url(),
            model: default_model(),
            synthesis_model: None,
            api_key_env: default_llm_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn synthesis_model(&self) -> &str {
        self.synthesis_model.as_deref().unwrap_or(&self.model)
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}
fn default_model() -> String {
    "meta/llama-3.3-70b-instruct".to_string()
}
fn default_llm_key_env() -> String {
    "NVIDIA_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}

/// Document loader settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// 0-indexed pages emitted first (financial summary, statements).
    #[serde(default = "default_priority_pages")]
    pub priority_pages: Vec<usize>,
    /// Pages with less extracted text than this are dropped.
    #[serde(default = "default_min_page_chars")]
    pub min_page_chars: usize,
    /// Character budget for the loaded text.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            priority_pages: default_priority_pages(),
            min_page_chars: default_min_page_chars(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_priority_pages() -> Vec<usize> {
    vec![3, 4, 5, 6, 23, 24, 25, 26, 27, 28]
}
fn default_min_page_chars() -> usize {
    50
}
fn default_max_chars() -> usize {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `"disabled"` or `"serper"`.
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            api_key_env: default_search_key_env(),
            max_results: default_search_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_provider() -> String {
    "disabled".to_string()
}
fn default_search_key_env() -> String {
    "SERPER_API_KEY".to_string()
}
fn default_search_max_results() -> usize {
    5
}
fn default_search_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// `"local"` runs a worker pool inside the server; `"external"` leaves
    /// jobs pending for `finsight worker` processes.
    #[serde(default = "default_dispatch")]
    pub dispatch: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dispatch: default_dispatch(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn is_local(&self) -> bool {
        self.dispatch == "local"
    }
}

fn default_dispatch() -> String {
    "local".to_string()
}
fn default_workers() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_query")]
    pub default_query: String,
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_query: default_query(),
            min_query_chars: default_min_query_chars(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

fn default_query() -> String {
    "Analyze this financial document for investment insights".to_string()
}
fn default_min_query_chars() -> usize {
    5
}
fn default_max_query_chars() -> usize {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.loader.max_chars == 0 {
        anyhow::bail!("loader.max_chars must be > 0");
    }

    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be >= 1");
    }

    match config.queue.dispatch.as_str() {
        "local" | "external" => {}
        other => anyhow::bail!(
            "Unknown queue dispatch mode: '{}'. Must be local or external.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.llm.is_enabled() && config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must be specified when provider is 'openai'");
    }

    match config.search.provider.as_str() {
        "disabled" | "serper" => {}
        other => anyhow::bail!(
            "Unknown search provider: '{}'. Must be disabled or serper.",
            other
        ),
    }

    if config.analysis.min_query_chars > config.analysis.max_query_chars {
        anyhow::bail!("analysis.min_query_chars must be <= analysis.max_query_chars");
    }

    Ok(())
}
