//! Combines the four stage outputs into one report.
//!
//! One generation call builds the consolidated report. If that call fails,
//! or comes back empty, the report falls back to the stage outputs
//! concatenated under markdown headers and the result is marked degraded.
//!
//! A generated report goes through the same content policy as stage
//! outputs: it may only cite URLs found in the run's capability results or
//! in the stage outputs it summarizes.

use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::{generate_with_retry, Generator, RetryPolicy};
use crate::models::StageOutputs;
use crate::policy;

pub const NOT_AVAILABLE: &str = "Not available";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub text: String,
    /// True when the fallback concatenation was used.
    pub degraded: bool,
}

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    model: String,
    retry: RetryPolicy,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            generator,
            model: model.into(),
            retry,
        }
    }

    /// `sources` is what the report may cite; see [`policy::enforce`].
    pub async fn synthesize(&self, outputs: &StageOutputs, sources: &[&str]) -> Synthesis {
        let prompt = synthesis_prompt(outputs);
        match generate_with_retry(self.generator.as_ref(), &prompt, &self.model, &self.retry).await {
            Ok(text) if !text.trim().is_empty() => {
                let checked = policy::enforce(&text, sources);
                if checked.removed > 0 {
                    warn!(removed = checked.removed, "removed untraceable sources from report");
                }
                info!(chars = checked.text.len(), "synthesis completed");
                Synthesis {
                    text: checked.text,
                    degraded: false,
                }
            }
            Ok(_) => {
                warn!("synthesis returned empty text; using fallback report");
                Synthesis {
                    text: fallback_report(outputs),
                    degraded: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed; using fallback report");
                Synthesis {
                    text: fallback_report(outputs),
                    degraded: true,
                }
            }
        }
    }
}

pub fn synthesis_prompt(outputs: &StageOutputs) -> String {
    let mut prompt = String::from(
        "You are a financial analyst. Synthesize the following 4 analysis sections into ONE comprehensive final answer.\n\n",
    );
    for (stage, text) in outputs.iter() {
        prompt.push_str(&format!(
            "## {}:\n{}\n\n",
            stage.label(),
            text.unwrap_or(NOT_AVAILABLE)
        ));
    }
    prompt.push_str(
        "Generate a well-structured final answer that:\n\
1. Opens with an executive summary\n\
2. Highlights key financial metrics and trends\n\
3. Provides investment recommendation (BUY/HOLD/SELL)\n\
4. Summarizes main risks\n\
5. Ends with actionable insights\n\n\
Only use facts from the sections above. Keep it concise but comprehensive. Use markdown formatting.",
    );
    prompt
}

/// Deterministic report used when synthesis is unavailable.
pub fn fallback_report(outputs: &StageOutputs) -> String {
    let sections: Vec<String> = outputs
        .iter()
        .map(|(stage, text)| format!("### {}\n{}", stage.label(), text.unwrap_or(NOT_AVAILABLE)))
        .collect();
    format!("## Final Analysis Report\n\n{}", sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::DisabledGenerator;
    use crate::models::StageName;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn generate(&self, _prompt: &str, model: &str) -> Result<String, GenerationError> {
            Ok(format!("## Executive Summary\nsynthesized by {}", model))
        }
    }

    fn outputs() -> StageOutputs {
        let mut o = StageOutputs::new();
        o.record(StageName::Verify, "VERIFIED: Tesla Q2 2025 update").unwrap();
        o.record(StageName::Analyze, "Revenue $22.5B, down 12% YoY").unwrap();
        o.record(StageName::Recommend, "Recommendation: HOLD").unwrap();
        o.record(StageName::Risk, "Overall risk: Medium").unwrap();
        o
    }

    #[test]
    fn prompt_marks_missing_sections() {
        let mut partial = StageOutputs::new();
        partial.record(StageName::Verify, "VERIFIED").unwrap();
        let prompt = synthesis_prompt(&partial);
        assert!(prompt.contains("## Document Verification:\nVERIFIED"));
        assert!(prompt.contains("## Risk Assessment:\nNot available"));
        assert!(prompt.contains("(BUY/HOLD/SELL)"));
    }

    #[tokio::test]
    async fn uses_generated_report() {
        let synth = Synthesizer::new(Arc::new(Echo), "big-model", RetryPolicy::no_retry());
        let out = synth.synthesize(&outputs(), &[]).await;
        assert!(!out.degraded);
        assert_eq!(out.text, "## Executive Summary\nsynthesized by big-model");
    }

    #[tokio::test]
    async fn falls_back_on_failure() {
        let synth = Synthesizer::new(Arc::new(DisabledGenerator), "m", RetryPolicy::no_retry());
        let out = synth.synthesize(&outputs(), &[]).await;
        assert!(out.degraded);
        assert!(out.text.starts_with("## Final Analysis Report"));
        assert!(out
            .text
            .contains("### Document Verification\nVERIFIED: Tesla Q2 2025 update"));
        assert!(out.text.contains("### Financial Analysis\nRevenue $22.5B, down 12% YoY"));
        assert!(out.text.contains("### Investment Analysis\nRecommendation: HOLD"));
        assert!(out.text.contains("### Risk Assessment\nOverall risk: Medium"));
    }

    struct Cites;

    #[async_trait]
    impl Generator for Cites {
        async fn generate(&self, _prompt: &str, _model: &str) -> Result<String, GenerationError> {
            Ok("HOLD. See https://ir.tesla.com/q2.pdf and https://invented.example/tsla".to_string())
        }
    }

    #[tokio::test]
    async fn generated_report_keeps_only_traceable_urls() {
        let synth = Synthesizer::new(Arc::new(Cites), "m", RetryPolicy::no_retry());
        let sources = ["--- Page 1 ---\nDeck: https://ir.tesla.com/q2.pdf"];
        let out = synth.synthesize(&outputs(), &sources).await;
        assert!(!out.degraded);
        assert!(out.text.contains("https://ir.tesla.com/q2.pdf"));
        assert!(!out.text.contains("invented.example"));
        assert!(out.text.contains(policy::REMOVED_SOURCE));
    }
}
