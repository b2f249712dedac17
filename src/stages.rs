//! The four stage definitions and their prompt rendering.
//!
//! Each stage is a static record: who performs it (persona), which stages'
//! outputs it reads, which capabilities it may call, and its task contract.
//! Nothing here is mutated at runtime; the pipeline resolves capability
//! names against the registry once, at construction.

use crate::capabilities::{ANALYZE_INVESTMENT, ASSESS_RISK, READ_DOCUMENT, SEARCH};
use crate::models::StageName;

/// The agent persona attached to a stage.
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    pub role: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
}

#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub name: StageName,
    pub upstream: &'static [StageName],
    pub capabilities: &'static [&'static str],
    pub persona: Persona,
    pub instructions: &'static str,
    pub expected_output: &'static str,
}

/// Appended to every stage prompt.
pub const GROUNDING_RULE: &str = "Only state facts that appear in the document text or the capability \
results above. Never cite a URL, report, or source that is not present there. \
If information is missing, say it is not available.";

const VERIFIER: Persona = Persona {
    role: "Financial Document Verifier",
    goal: "Carefully verify that uploaded documents are genuine financial reports. \
Confirm the document type, source, date, and key financial data fields. \
Flag any inconsistencies, missing data, or non-financial documents.",
    backstory: "You are a meticulous financial compliance officer with deep experience in document \
verification and regulatory standards. You never approve documents without careful review, and \
you always flag anomalies, missing fields, or suspicious content.",
};

const ANALYST: Persona = Persona {
    role: "Senior Financial Analyst",
    goal: "Provide accurate, thorough, and objective financial analysis based on the user's query: {query}. \
Identify key metrics, trends, and risks, and deliver actionable insights grounded in the actual data.",
    backstory: "You are a seasoned financial analyst with 15+ years of experience in equity research, \
corporate finance, and investment analysis. You always base your conclusions on data and evidence, \
never speculation or hearsay.",
};

const ADVISOR: Persona = Persona {
    role: "Investment Advisor",
    goal: "Provide evidence-based investment recommendations derived from careful analysis of the \
financial document, aligned with the user's query.",
    backstory: "You are a CFP and CFA charterholder advising institutional and retail investors. \
You base every recommendation on verified financial data and clearly disclose risks.",
};

const RISK_ASSESSOR: Persona = Persona {
    role: "Risk Assessment Specialist",
    goal: "Conduct a thorough and objective risk assessment of the financial document. \
Identify market, credit, liquidity, and operational risks based on the actual data.",
    backstory: "You are a risk management specialist with a background in quantitative finance and \
portfolio risk analysis. You base all assessments on data-driven methodologies.",
};

pub fn standard_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition {
            name: StageName::Verify,
            upstream: &[],
            capabilities: &[READ_DOCUMENT],
            persona: VERIFIER,
            instructions: "Verify that the uploaded file at path '{file_path}' is a legitimate financial document.\n\
Confirm the document type (e.g., earnings report, 10-K, 10-Q, investor update).\n\
Extract and report: company name, reporting period, document type, and any key financial figures found.\n\
If the document does not appear to be a financial report, clearly state that and describe what it contains.\n\
Do not make up or assume any data that is not present in the document.",
            expected_output: "A structured verification report containing:\n\
- Document type and confirmation of whether it is a financial document\n\
- Company name and reporting period (if found)\n\
- Key financial sections identified (e.g., income statement, balance sheet, cash flow)\n\
- Any red flags, missing data, or anomalies noticed\n\
- A clear verdict: VERIFIED as financial document or NOT-VERIFIED",
        },
        StageDefinition {
            name: StageName::Analyze,
            upstream: &[StageName::Verify],
            capabilities: &[READ_DOCUMENT, SEARCH],
            persona: ANALYST,
            instructions: "Analyze the financial document located at '{file_path}' to answer the user's query: {query}\n\
Perform a thorough analysis covering:\n\
  1. Key financial metrics (revenue, profit margins, EPS, debt ratios, cash flow, etc.)\n\
  2. Year-over-year or quarter-over-quarter trends\n\
  3. Operational highlights and management commentary\n\
  4. Competitive positioning and market context\n\
  5. Any notable risks or opportunities mentioned in the document\n\
Base your analysis strictly on the document content. Search results may add market context only. \
Do not fabricate data, URLs, or statistics.",
            expected_output: "A comprehensive financial analysis report including:\n\
- Executive summary answering the user's specific query\n\
- Key financial metrics with values extracted directly from the document\n\
- Trend analysis with comparisons to prior periods (if available)\n\
- Notable strengths and concerns identified in the document\n\
- Clear, structured formatting with sections and bullet points",
        },
        StageDefinition {
            name: StageName::Recommend,
            upstream: &[StageName::Analyze],
            capabilities: &[READ_DOCUMENT, ANALYZE_INVESTMENT],
            persona: ADVISOR,
            instructions: "Based on the financial document at '{file_path}' and the user's query: {query},\n\
provide evidence-based investment recommendations.\n\
Your analysis should include:\n\
  1. Valuation assessment (P/E, P/B, EV/EBITDA) ONLY if the document provides current market price data. \
Do NOT calculate or estimate these ratios without actual stock price information.\n\
  2. Growth prospects based on documented financials\n\
  3. Dividend and capital allocation analysis (if applicable)\n\
  4. Clear BUY / HOLD / SELL recommendation with rationale\n\
All recommendations must be grounded in the actual document data. \
Disclose that this is for informational purposes only and not personalized financial advice.",
            expected_output: "A structured investment recommendation report including:\n\
- Investment thesis summary\n\
- Growth and profitability outlook\n\
- BUY / HOLD / SELL recommendation with clear data-backed rationale\n\
- Key risks to the investment thesis\n\
- Disclaimer: For informational purposes only, not personalized financial advice",
        },
        StageDefinition {
            name: StageName::Risk,
            upstream: &[StageName::Analyze],
            capabilities: &[READ_DOCUMENT, ASSESS_RISK],
            persona: RISK_ASSESSOR,
            instructions: "Conduct a comprehensive risk assessment based on the financial document at '{file_path}'.\n\
User query context: {query}\n\
Evaluate the following risk categories based on actual document data:\n\
  1. Market risk (revenue volatility, pricing power, demand sensitivity)\n\
  2. Credit and liquidity risk (debt levels, cash runway, credit ratings)\n\
  3. Operational risk (supply chain, regulatory, execution risk)\n\
  4. Macro risk (interest rates, inflation, geopolitical factors mentioned)\n\
  5. ESG and regulatory risk (if disclosed)\n\
Assign a risk rating (Low / Medium / High) to each category with justification. \
Do not invent risk factors not supported by the document.",
            expected_output: "A structured risk assessment report including:\n\
- Overall risk rating (Low / Medium / High) with summary justification\n\
- Risk breakdown by category with individual ratings and evidence from the document\n\
- Top 3-5 key risk factors with mitigation strategies\n\
- Conclusion with balanced risk/reward perspective",
        },
    ]
}

/// Replaces `{query}` and `{file_path}` in a single pass, so placeholder
/// text inside either value is left as written.
pub fn fill(template: &str, query: &str, file_path: &str) -> String {
    template
        .split("{file_path}")
        .map(|piece| piece.replace("{query}", query))
        .collect::<Vec<_>>()
        .join(file_path)
}

impl StageDefinition {
    /// Builds the full prompt for this stage.
    ///
    /// The first line always names the persona role. `capability_results`
    /// and `upstream_outputs` are rendered in the order given, each under its
    /// own labeled header.
    pub fn render(
        &self,
        query: &str,
        file_path: &str,
        capability_results: &[(&str, &str)],
        upstream_outputs: &[(StageName, &str)],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("You are the {}.\n", self.persona.role));
        prompt.push_str(&format!("Goal: {}\n", fill(self.persona.goal, query, file_path)));
        prompt.push_str(&format!("Background: {}\n\n", self.persona.backstory));

        prompt.push_str("## Task\n");
        prompt.push_str(&fill(self.instructions, query, file_path));
        prompt.push_str("\n\n## Expected output\n");
        prompt.push_str(&fill(self.expected_output, query, file_path));
        prompt.push_str("\n\n");

        if !capability_results.is_empty() {
            prompt.push_str("## Capability results\n");
            for (name, text) in capability_results {
                prompt.push_str(&format!("### {}\n{}\n\n", name, text));
            }
        }

        if !upstream_outputs.is_empty() {
            prompt.push_str("## Context from previous stages\n");
            for (stage, text) in upstream_outputs {
                prompt.push_str(&format!("### {}\n{}\n\n", stage.label(), text));
            }
        }

        prompt.push_str("## Rules\n");
        prompt.push_str(GROUNDING_RULE);
        prompt.push('\n');
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_fixed_order() {
        let names: Vec<StageName> = standard_stages().iter().map(|s| s.name).collect();
        assert_eq!(names, StageName::ALL.to_vec());
    }

    #[test]
    fn upstream_always_precedes_stage() {
        for stage in standard_stages() {
            for up in stage.upstream {
                assert!(up.ordinal() < stage.name.ordinal());
            }
        }
    }

    #[test]
    fn only_analyze_may_search() {
        for stage in standard_stages() {
            assert!(stage.capabilities.contains(&READ_DOCUMENT));
            assert_eq!(
                stage.capabilities.contains(&SEARCH),
                stage.name == StageName::Analyze
            );
        }
    }

    #[test]
    fn render_substitutes_placeholders_and_labels_context() {
        let stages = standard_stages();
        let risk = &stages[3];
        let prompt = risk.render(
            "Analyze Q2 performance",
            "/uploads/doc.pdf",
            &[(READ_DOCUMENT, "--- Page 1 ---\nRevenue")],
            &[(StageName::Analyze, "Revenue fell 12%")],
        );
        assert!(prompt.starts_with("You are the Risk Assessment Specialist.\n"));
        assert!(prompt.contains("'/uploads/doc.pdf'"));
        assert!(prompt.contains("User query context: Analyze Q2 performance"));
        assert!(prompt.contains("### read_document\n--- Page 1 ---\nRevenue"));
        assert!(prompt.contains("### Financial Analysis\nRevenue fell 12%"));
        assert!(!prompt.contains("{query}"));
        assert!(!prompt.contains("{file_path}"));
        assert!(prompt.trim_end().ends_with(GROUNDING_RULE));
    }

    #[test]
    fn first_stage_has_no_upstream_section() {
        let stages = standard_stages();
        let prompt = stages[0].render("q", "f.pdf", &[], &[]);
        assert!(!prompt.contains("## Context from previous stages"));
        assert!(!prompt.contains("## Capability results"));
    }

    #[test]
    fn placeholder_text_in_values_is_not_expanded() {
        let filled = fill(
            "Query: {query} / File: {file_path}",
            "compare {file_path} with last year",
            "/uploads/{query}.pdf",
        );
        assert_eq!(
            filled,
            "Query: compare {file_path} with last year / File: /uploads/{query}.pdf"
        );
    }
}
