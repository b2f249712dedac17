//! Generation backend abstraction.
//!
//! - **[`OpenAiGenerator`]**: any OpenAI-compatible `chat/completions`
//!   endpoint (NVIDIA NIM by default). One HTTP call per [`Generator::generate`].
//! - **[`DisabledGenerator`]**: fails every call with a permanent error.
//!
//! Retries live outside the backends in [`generate_with_retry`], so stages,
//! the synthesizer, and test doubles all share one policy.
//!
//! # Error classification
//!
//! - HTTP 429, 5xx, timeouts, connection failures → [`GenerationError::Transient`]
//! - other 4xx, unparsable bodies, empty completions → [`GenerationError::Permanent`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::GenerationError;

/// Given a prompt, returns text. May fail transiently.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GenerationError>;
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _prompt: &str, _model: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Permanent(
            "generation backend is disabled".to_string(),
        ))
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiGenerator {
    /// # Errors
    ///
    /// Fails if the API key variable named by `api_key_env` is unset.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, truncate_for_log(&body_text));
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(GenerationError::Transient(message));
            }
            return Err(GenerationError::Permanent(message));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Permanent(format!("malformed response body: {}", e)))?;
        parse_completion(&json)
    }
}

/// Pulls `choices[0].message.content` out of a chat-completions response.
pub fn parse_completion(json: &serde_json::Value) -> Result<String, GenerationError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            GenerationError::Permanent("invalid response: missing choices[0].message.content".into())
        })?;

    if content.trim().is_empty() {
        return Err(GenerationError::Permanent("empty completion".to_string()));
    }
    Ok(content.to_string())
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(300) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Builds the generator named by `config.provider`.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Retry ============

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    /// capped at 32×base.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// Calls `generator` until it succeeds, fails permanently, or the policy's
/// retries run out. The last error is returned on exhaustion.
pub async fn generate_with_retry(
    generator: &dyn Generator,
    prompt: &str,
    model: &str,
    policy: &RetryPolicy,
) -> Result<String, GenerationError> {
    let mut attempt = 0;
    loop {
        match generator.generate(prompt, model).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying generation");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
