//! Web search backing the `search` capability.
//!
//! Only the analyze stage may consult search, and only for market context.
//! Results are rendered as plain text lines so the stage prompt (and the
//! content policy check) see exactly which links were provided.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn search(&self, query: &str) -> Result<String>;
}

pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn search(&self, _query: &str) -> Result<String> {
        bail!("web search is disabled")
    }
}

/// Google results via serper.dev.
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearch {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    fn name(&self) -> &str {
        "serper"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .post(SERPER_ENDPOINT)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": self.max_results }))
            .send()
            .await
            .context("search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("search API error {}: {}", status, body);
        }

        let parsed: SerperResponse = response.json().await.context("malformed search response")?;
        Ok(render_results(&parsed.organic, self.max_results))
    }
}

fn render_results(results: &[OrganicResult], max: usize) -> String {
    if results.is_empty() {
        return "No search results.".to_string();
    }
    results
        .iter()
        .take(max)
        .map(|r| format!("- {} | {} | {}", r.title.trim(), r.link.trim(), r.snippet.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn create_search(config: &SearchConfig) -> Result<Arc<dyn SearchProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSearch)),
        "serper" => Ok(Arc::new(SerperSearch::new(config)?)),
        other => bail!("Unknown search provider: {}", other),
    }
}
