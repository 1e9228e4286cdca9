//! Orchestrator tests against in-memory collaborators.
//!
//! No network and no pandoc: the gateway and the renderer are stubs that
//! record every call, so each test can assert which stages ran.

mod common;

use common::{default_harness, harness, StubGateway, StubRenderer};
use md2word::pipeline::telemetry::RunOutcome;
use md2word::prompts::{CLEAN_SYSTEM_PROMPT, NORMALIZE_SYSTEM_PROMPT};
use md2word::{
    ErrorKind, LlmError, PipelineConfig, PipelineRequest, ProcessingStep, RateLimitRule,
    RenderError,
};
use std::sync::atomic::Ordering;
use std::time::Duration;

const MARKDOWN: &str = "# Title\n\n- a\n- b\n- c\n- d\n- e";
const PROSE: &str = "Meeting notes from Tuesday. We agreed to ship on Friday and to \
                     review the budget next week.";
const CLIENT: &str = "203.0.113.7";

fn config_with_limits(normalize: u32, clean: u32) -> PipelineConfig {
    PipelineConfig::builder()
        .normalize_limit(RateLimitRule::per_minute(normalize))
        .clean_limit(RateLimitRule::per_minute(clean))
        .build()
        .unwrap()
}

// ── Input validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_input_fails_before_any_stage() {
    let h = default_harness();
    let err = h
        .pipeline
        .run(&PipelineRequest::new("", "style-default"), CLIENT)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InputEmpty);
    assert_eq!(err.code(), "CONV_01_01");
    assert_eq!(err.step, ProcessingStep::Validate);
    assert_eq!(err.http_status(), 400);
    assert_eq!(h.gateway.call_count(), 0);
    assert!(h.renderer.calls().is_empty());

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].result, RunOutcome::Error);
    assert_eq!(records[0].error_code.as_deref(), Some("CONV_01_01"));
    assert_eq!(records[0].step, Some(ProcessingStep::Validate));
}

#[tokio::test]
async fn test_input_one_over_limit_reports_counts() {
    let h = default_harness();
    let text = "a".repeat(10_001);
    let err = h
        .pipeline
        .run(&PipelineRequest::new(text, "style-default"), CLIENT)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InputTooLong);
    assert_eq!(err.code(), "CONV_01_02");
    assert!(err.message.contains("10,001"), "got: {}", err.message);
    assert!(err.message.contains("10,000"), "got: {}", err.message);
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_trailing_newline_counts_toward_limit() {
    let h = default_harness();
    let text = format!("{}\n", "a".repeat(10_000));
    let err = h
        .pipeline
        .run(&PipelineRequest::new(text, "style-default"), CLIENT)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InputTooLong);
    assert!(err.message.contains("10,001"), "got: {}", err.message);
    assert_eq!(h.log.records()[0].input_length, 10_001);
}

#[tokio::test]
async fn test_missing_template_id_is_logged_as_unknown() {
    let h = default_harness();
    h.pipeline
        .run(&PipelineRequest::new("  ", ""), CLIENT)
        .await
        .unwrap_err();

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].template_id, "unknown");
}

// ── Happy paths ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_markdown_input_skips_normalisation() {
    let h = default_harness();
    let result = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
        .await
        .unwrap();

    assert!(!result.was_converted);
    assert_eq!(result.final_step, ProcessingStep::Done);
    assert_eq!(result.template_id, "style-default");
    assert_eq!(result.cleaned_text, "# Clean\n\nCleaned body.");
    assert!(result.output_filename.starts_with("md2word-"));
    assert!(result.output_filename.ends_with(".docx"));
    assert_eq!(result.document, b"DOCX:# Clean\n\nCleaned body.".to_vec());

    let calls = h.gateway.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1, "only the cleaning call");
    assert_eq!(calls[0].0[0].content, CLEAN_SYSTEM_PROMPT);
    assert_eq!(calls[0].0[1].content, MARKDOWN);
    assert_eq!(calls[0].1, 0.0);

    assert_eq!(
        h.renderer.calls(),
        vec![("# Clean\n\nCleaned body.".to_string(), "style.docx".to_string())]
    );
}

#[tokio::test]
async fn test_prose_input_is_normalised_then_cleaned() {
    let h = default_harness();
    let result = h
        .pipeline
        .run(&PipelineRequest::new(PROSE, "official-document"), CLIENT)
        .await
        .unwrap();

    assert!(result.was_converted);
    assert_eq!(result.cleaned_text, "# Clean\n\nCleaned body.");
    assert_eq!(result.template_id, "official-document");

    let calls = h.gateway.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0[0].content, NORMALIZE_SYSTEM_PROMPT);
    assert_eq!(calls[0].0[1].content, PROSE);
    assert!((calls[0].1 - 0.2).abs() < f32::EPSILON);
    // The cleaning call sees exactly what normalisation produced.
    assert_eq!(calls[1].0[1].content, "# Generated\n\nNormalised body.");
    assert_eq!(h.renderer.calls()[0].1, "official-document.docx");
}

#[tokio::test]
async fn test_unknown_template_falls_back_silently() {
    let h = default_harness();
    let result = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "does-not-exist"), CLIENT)
        .await
        .unwrap();
    assert_eq!(result.template_id, "style-default");
    assert_eq!(h.log.records()[0].template_id, "style-default");
}

#[tokio::test]
async fn test_input_is_trimmed_before_processing() {
    let h = default_harness();
    h.pipeline
        .run(
            &PipelineRequest::new(format!("\n\n  {MARKDOWN}  \n"), "style-default"),
            CLIENT,
        )
        .await
        .unwrap();
    assert_eq!(h.gateway.user_messages(), vec![MARKDOWN.to_string()]);
}

#[tokio::test]
async fn test_repeated_runs_are_structurally_identical() {
    let h = default_harness();
    let req = PipelineRequest::new(PROSE, "academic-paper");
    let first = h.pipeline.run(&req, CLIENT).await.unwrap();
    let second = h.pipeline.run(&req, CLIENT).await.unwrap();

    assert_eq!(first.cleaned_text, second.cleaned_text);
    assert_eq!(first.template_id, second.template_id);
    assert_eq!(first.was_converted, second.was_converted);
    let calls = h.renderer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    let messages = h.gateway.user_messages();
    assert_eq!(messages[0..2], messages[2..4]);
}

// ── Telemetry and progress ───────────────────────────────────────────────

#[tokio::test]
async fn test_success_writes_usage_record_and_bumps_counter() {
    let h = default_harness();
    h.pipeline
        .run(&PipelineRequest::new(PROSE, "style-default"), CLIENT)
        .await
        .unwrap();

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.result, RunOutcome::Success);
    assert_eq!(r.ip, CLIENT);
    assert_eq!(r.input_length, PROSE.chars().count());
    assert_eq!(r.was_converted, Some(true));
    assert!(r.error_code.is_none());
    assert_eq!(h.counter.value.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broken_counter_and_log_do_not_fail_the_run() {
    let h = default_harness();
    h.counter.broken.store(true, Ordering::SeqCst);
    h.log.broken.store(true, Ordering::SeqCst);

    let result = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
        .await;
    assert!(result.is_ok(), "telemetry failures must be swallowed");
}

#[tokio::test]
async fn test_progress_observes_steps_in_order() {
    let h = default_harness();
    h.pipeline
        .run(&PipelineRequest::new(PROSE, "style-default"), CLIENT)
        .await
        .unwrap();
    assert_eq!(
        *h.progress.steps.lock().unwrap(),
        vec![
            ProcessingStep::Input,
            ProcessingStep::Validate,
            ProcessingStep::NormalizeText,
            ProcessingStep::SelectTemplate,
            ProcessingStep::CleanText,
            ProcessingStep::Render,
            ProcessingStep::Done,
        ]
    );
    assert_eq!(h.progress.completed.load(Ordering::SeqCst), 1);

    let h = default_harness();
    h.pipeline
        .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
        .await
        .unwrap();
    assert!(!h
        .progress
        .steps
        .lock()
        .unwrap()
        .contains(&ProcessingStep::NormalizeText));
}

// ── Rate limiting ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clean_rate_limit_blocks_then_resets() {
    let h = harness(
        StubGateway::new("# N", "# C"),
        StubRenderer::default(),
        config_with_limits(5, 1),
    );
    let req = PipelineRequest::new(MARKDOWN, "style-default");
    h.pipeline.run(&req, CLIENT).await.unwrap();

    let err = h.pipeline.run(&req, CLIENT).await.unwrap_err();
    assert_eq!(err.code(), "CONV_03_01");
    assert_eq!(err.step, ProcessingStep::CleanText);
    assert_eq!(err.http_status(), 429);
    assert_eq!(err.retry_after_secs, Some(60));
    assert!(
        err.detail.as_deref().unwrap().contains("retry in 60 seconds"),
        "got: {:?}",
        err.detail
    );
    assert_eq!(h.gateway.call_count(), 1, "blocked run must not call the LLM");

    // Another client has its own window.
    h.pipeline.run(&req, "198.51.100.1").await.unwrap();

    h.clock.advance(Duration::from_secs(61));
    h.pipeline.run(&req, CLIENT).await.unwrap();
}

#[tokio::test]
async fn test_normalize_rate_limit_applies_at_validate() {
    let h = harness(
        StubGateway::new("# N", "# C"),
        StubRenderer::default(),
        config_with_limits(1, 10),
    );
    let req = PipelineRequest::new(MARKDOWN, "style-default");
    h.pipeline.run(&req, CLIENT).await.unwrap();

    let err = h.pipeline.run(&req, CLIENT).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited(md2word::RateStage::Normalize));
    assert_eq!(err.code(), "CONV_01_03");
    assert_eq!(err.step, ProcessingStep::Validate);
    assert_eq!(h.log.records()[1].error_code.as_deref(), Some("CONV_01_03"));
}

// ── Stage failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_disabled_template_is_unavailable() {
    let h = default_harness();
    let err = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "coming-soon"), CLIENT)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONV_02_01");
    assert_eq!(err.step, ProcessingStep::SelectTemplate);
    assert_eq!(err.http_status(), 400);
    assert!(h.renderer.calls().is_empty());
    assert_eq!(*h.progress.failed.lock().unwrap(), vec!["CONV_02_01"]);
}

#[tokio::test]
async fn test_normalisation_failure_is_attributed_to_normalize_step() {
    let h = harness(
        StubGateway::new("", "# C").fail_normalize(LlmError::Status {
            status: 503,
            body: "overloaded".into(),
        }),
        StubRenderer::default(),
        PipelineConfig::default(),
    );
    let err = h
        .pipeline
        .run(&PipelineRequest::new(PROSE, "style-default"), CLIENT)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONV_02_99");
    assert_eq!(err.step, ProcessingStep::NormalizeText);
    assert!(err.detail.as_deref().unwrap().contains("503"));
    assert_eq!(h.gateway.call_count(), 1);
}

#[tokio::test]
async fn test_cleaning_failure_keeps_detail_out_of_message() {
    let h = harness(
        StubGateway::new("# N", "").fail_clean(LlmError::NoContent),
        StubRenderer::default(),
        PipelineConfig::default(),
    );
    let err = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONV_03_99");
    assert_eq!(err.step, ProcessingStep::CleanText);
    assert_eq!(err.http_status(), 500);
    assert!(!err.message.contains("no content"));
    assert!(err.detail.as_deref().unwrap().contains("no content"));
}

#[tokio::test]
async fn test_render_failures_map_to_their_codes() {
    let cases = [
        (
            RenderError::NotFound {
                path: "tools/pandoc/bin/pandoc".into(),
            },
            "CONV_04_02",
        ),
        (
            RenderError::PermissionDenied {
                path: "templates/style.docx".into(),
            },
            "CONV_04_03",
        ),
        (
            RenderError::Failed {
                detail: "exit status 64".into(),
            },
            "CONV_04_99",
        ),
    ];
    for (render_err, code) in cases {
        let h = harness(
            StubGateway::new("# N", "# C"),
            StubRenderer::failing(render_err),
            PipelineConfig::default(),
        );
        let err = h
            .pipeline
            .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
            .await
            .unwrap_err();
        assert_eq!(err.code(), code);
        assert_eq!(err.step, ProcessingStep::Render);
        assert_eq!(h.counter.value.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_exhaustion_is_upstream_timeout() {
    let config = PipelineConfig::builder()
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let h = harness(
        StubGateway::new("# N", "# C").with_delay(Duration::from_secs(30)),
        StubRenderer::default(),
        config,
    );
    let err = h
        .pipeline
        .run(&PipelineRequest::new(MARKDOWN, "style-default"), CLIENT)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONV_99_TIMEOUT");
    assert_eq!(err.http_status(), 504);
    assert_eq!(err.step, ProcessingStep::CleanText);
    assert!(h.renderer.calls().is_empty());
    assert_eq!(
        h.log.records()[0].error_code.as_deref(),
        Some("CONV_99_TIMEOUT")
    );
}
