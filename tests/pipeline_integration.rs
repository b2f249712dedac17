mod common;

use common::*;
use finsight::error::GenerationError;
use finsight::models::{JobStatus, StageName};
use finsight::pipeline::SEARCH_UNAVAILABLE;
use finsight::policy::{untraceable_urls, REMOVED_SOURCE};
use finsight::storage::DocumentHandle;
use finsight::store::JobStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

async fn run_job(h: &Harness, dir: &TempDir, query: Option<&str>) -> String {
    let doc = placeholder_pdf(dir.path(), "financial_document_test.pdf");
    let job_id = h
        .manager
        .submit(query, doc.to_str().unwrap(), "q2-report.pdf")
        .await
        .unwrap();
    h.manager.run(&job_id, DocumentHandle::new(&doc)).await.unwrap();
    job_id
}

#[tokio::test]
async fn stages_run_in_order_and_see_only_declared_upstream() {
    let generator = ScriptedGenerator::new()
        .ok(VERIFIER, "VERIFY-TOKEN: this is a quarterly financial report")
        .ok(ANALYST, "ANALYZE-TOKEN: revenue is growing")
        .ok(ADVISOR, "RECOMMEND-TOKEN: HOLD")
        .ok(RISK, "RISK-TOKEN: moderate")
        .ok(SYNTHESIS, "Executive summary. Recommendation: HOLD.");
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, Some("How healthy is the balance sheet?")).await;

    assert_eq!(h.generator.order(), vec![VERIFIER, ANALYST, ADVISOR, RISK, SYNTHESIS]);

    let analyze = h.generator.prompt_for(ANALYST).unwrap();
    assert!(analyze.contains("### Document Verification\nVERIFY-TOKEN"));
    assert!(analyze.contains(SEARCH_UNAVAILABLE));

    let recommend = h.generator.prompt_for(ADVISOR).unwrap();
    assert!(recommend.contains("### Financial Analysis\nANALYZE-TOKEN"));
    assert!(!recommend.contains("VERIFY-TOKEN"));

    let risk = h.generator.prompt_for(RISK).unwrap();
    assert!(risk.contains("ANALYZE-TOKEN"));
    assert!(!risk.contains("RECOMMEND-TOKEN"));
    assert!(risk.contains("How healthy is the balance sheet?"));

    let job = h.manager.get(&job_id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(job.result(), Some("Executive summary. Recommendation: HOLD."));
    assert!(!job.degraded());
    assert_eq!(job.stage_outputs().recorded(), 4);
    assert!(job.error_message().is_none());
    assert!(job.duration_seconds().unwrap() >= 0.0);
}

#[tokio::test]
async fn framed_document_replaces_raw_text_for_recommendation() {
    let h = harness(ScriptedGenerator::new());
    let dir = TempDir::new().unwrap();
    run_job(&h, &dir, None).await;

    let recommend = h.generator.prompt_for(ADVISOR).unwrap();
    assert!(recommend.contains("Financial document content for investment analysis:"));
    assert!(!recommend.contains("### read_document"));

    let verify = h.generator.prompt_for(VERIFIER).unwrap();
    assert!(verify.contains("### read_document\n--- Page 4 ---"));
}

#[tokio::test]
async fn analysis_failure_keeps_verification_and_skips_the_rest() {
    let generator = ScriptedGenerator::new()
        .ok(VERIFIER, "Document verified")
        .reply(ANALYST, Err(GenerationError::Permanent("model refused".into())));
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Failed);
    let error = job.error_message().unwrap();
    assert!(error.contains("analyze"), "error was: {}", error);
    assert!(error.contains("model refused"));
    assert!(job.result().is_none());

    let outputs = job.stage_outputs();
    assert_eq!(outputs.get(StageName::Verify), Some("Document verified"));
    assert_eq!(outputs.get(StageName::Analyze), None);
    assert_eq!(outputs.get(StageName::Recommend), None);
    assert_eq!(outputs.get(StageName::Risk), None);

    assert_eq!(h.generator.calls_for(ADVISOR), 0);
    assert_eq!(h.generator.calls_for(RISK), 0);
    assert_eq!(h.generator.calls_for(SYNTHESIS), 0);
}

#[tokio::test]
async fn transient_stage_failures_are_retried() {
    let generator = ScriptedGenerator::new()
        .reply(ANALYST, Err(GenerationError::Transient("429 rate limited".into())))
        .ok(ANALYST, "Analysis after retry");
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Completed);
    assert_eq!(h.generator.calls_for(ANALYST), 2);
    assert_eq!(job.stage_outputs().get(StageName::Analyze), Some("Analysis after retry"));
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    let generator = ScriptedGenerator::new()
        .reply(VERIFIER, Err(GenerationError::Transient("503 unavailable".into())));
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Failed);
    // One attempt plus two retries.
    assert_eq!(h.generator.calls_for(VERIFIER), 3);
    assert!(job.stage_outputs().is_empty());
}

#[tokio::test]
async fn synthesis_failure_stores_degraded_fallback() {
    let generator = ScriptedGenerator::new()
        .ok(VERIFIER, "Verified")
        .ok(ANALYST, "Margins expanding")
        .ok(ADVISOR, "BUY")
        .ok(RISK, "Low leverage")
        .reply(SYNTHESIS, Err(GenerationError::Permanent("context too long".into())));
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.degraded());
    let report = job.result().unwrap();
    assert!(report.starts_with("## Final Analysis Report"));
    assert!(report.contains("### Document Verification\nVerified"));
    assert!(report.contains("### Investment Analysis\nBUY"));
    assert!(report.contains("### Risk Assessment\nLow leverage"));
}

#[tokio::test]
async fn end_to_end_report_carries_a_recommendation() {
    let generator = ScriptedGenerator::new()
        .ok(VERIFIER, "Quarterly report for Q2, pages 1-10 readable")
        .ok(ANALYST, "Revenue $4.1B, margins stable")
        .ok(ADVISOR, "Recommendation: BUY, based on stable margins")
        .ok(RISK, "Main risk: FX exposure")
        .ok(
            SYNTHESIS,
            "## Executive Summary\nStable quarter.\n\n## Recommendation\nBUY\n\n## Risks\nFX exposure",
        );
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, Some("Should I invest?")).await;
    let job = h.manager.get(&job_id).await.unwrap();

    let report = job.result().unwrap();
    assert!(["BUY", "HOLD", "SELL"].iter().any(|r| report.contains(r)));

    let view = job.result_view().unwrap();
    assert_eq!(view.stages.len(), 4);
    assert!(view.stages.iter().all(|s| s.output.is_some()));
    assert_eq!(view.query, "Should I invest?");

    let synthesis_prompt = h.generator.prompt_for(SYNTHESIS).unwrap();
    for section in ["Document Verification", "Financial Analysis", "Investment Analysis", "Risk Assessment"] {
        assert!(synthesis_prompt.contains(&format!("## {}:", section)));
    }
}

#[tokio::test]
async fn unreadable_document_fails_before_any_generation() {
    let h = harness_with_pages(ScriptedGenerator::new(), Err("broken xref table".to_string()));
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.error_message().unwrap().contains("unreadable document"));
    assert!(job.stage_outputs().is_empty());
    assert!(h.generator.order().is_empty());
}

#[tokio::test]
async fn document_is_extracted_once_per_job() {
    let h = harness(ScriptedGenerator::new());
    let dir = TempDir::new().unwrap();

    run_job(&h, &dir, None).await;

    assert_eq!(h.extractions.load(Ordering::SeqCst), 1);
    assert_eq!(h.loader.cached_documents(), 1);
}

#[tokio::test]
async fn staged_document_is_removed_after_success_and_failure() {
    let dir = TempDir::new().unwrap();

    let ok = harness(ScriptedGenerator::new());
    run_job(&ok, &dir, None).await;
    assert!(!dir.path().join("financial_document_test.pdf").exists());

    let failing = harness(
        ScriptedGenerator::new().reply(VERIFIER, Err(GenerationError::Permanent("no".into()))),
    );
    run_job(&failing, &dir, None).await;
    assert!(!dir.path().join("financial_document_test.pdf").exists());
}

#[tokio::test]
async fn invented_sources_are_scrubbed_from_stage_output() {
    let generator = ScriptedGenerator::new()
        .ok(VERIFIER, "See https://made-up.example.com/filing for details.");
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    let verify = job.stage_outputs().get(StageName::Verify).unwrap();
    assert!(!verify.contains("made-up.example.com"));
    assert!(verify.contains(REMOVED_SOURCE));
}

#[tokio::test]
async fn invented_sources_are_scrubbed_from_the_stored_report() {
    let generator = ScriptedGenerator::new()
        .ok(SYNTHESIS, "HOLD. Source: https://fabricated-research.example/tsla-q2");
    let h = harness(generator);
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert_eq!(job.status(), JobStatus::Completed);
    assert!(!job.degraded());
    let report = job.result().unwrap();
    assert!(!report.contains("fabricated-research.example"));
    assert!(report.contains(REMOVED_SOURCE));

    let outputs: Vec<&str> = StageName::ALL
        .iter()
        .filter_map(|s| job.stage_outputs().get(*s))
        .collect();
    assert!(untraceable_urls(report, &outputs).is_empty());
}

#[tokio::test]
async fn search_results_stay_citable_in_later_stages_and_report() {
    let recap = "https://news.example.com/q2-recap";
    let generator = ScriptedGenerator::new()
        .ok(ANALYST, "Deliveries fell this quarter.")
        .ok(RISK, "Delivery risk flagged in https://news.example.com/q2-recap and https://invented.example/risk")
        .ok(SYNTHESIS, "HOLD. See https://news.example.com/q2-recap");
    let h = harness_with(
        generator,
        Ok(report_pages()),
        Arc::new(FixedSearch("- Q2 recap | https://news.example.com/q2-recap | deliveries down")),
    );
    let dir = TempDir::new().unwrap();

    let job_id = run_job(&h, &dir, None).await;
    let job = h.manager.get(&job_id).await.unwrap();

    assert!(h.generator.prompt_for(ANALYST).unwrap().contains(recap));
    let risk = job.stage_outputs().get(StageName::Risk).unwrap();
    assert!(risk.contains(recap));
    assert!(!risk.contains("invented.example"));
    assert!(risk.contains(REMOVED_SOURCE));

    let report = job.result().unwrap();
    assert!(report.contains(recap));
    assert!(!report.contains(REMOVED_SOURCE));
}

#[tokio::test]
async fn blank_query_uses_default_and_short_query_is_rejected() {
    let h = harness(ScriptedGenerator::new());

    let job_id = h.manager.submit(Some("   "), "/tmp/x.pdf", "x.pdf").await.unwrap();
    let job = h.manager.get(&job_id).await.unwrap();
    assert_eq!(job.query(), "Analyze this financial document for investment insights");
    assert_eq!(job.status(), JobStatus::Pending);

    let err = h.manager.submit(Some("hi"), "/tmp/x.pdf", "x.pdf").await.unwrap_err();
    assert!(err.to_string().contains("invalid query"));
    assert_eq!(h.store.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn running_a_finished_job_is_rejected() {
    let h = harness(ScriptedGenerator::new());
    let dir = TempDir::new().unwrap();
    let job_id = run_job(&h, &dir, None).await;

    let doc = placeholder_pdf(dir.path(), "again.pdf");
    let err = h
        .manager
        .run(&job_id, DocumentHandle::new(&doc))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("illegal job transition"));
    assert!(!doc.exists());
}
