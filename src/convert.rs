//! The conversion orchestrator.
//!
//! [`Pipeline::run`] drives one request through the [`ProcessingStep`]s in a
//! single pass:
//!
//! ```text
//! Input ─▶ Validate ─▶ [NormalizeText] ─▶ SelectTemplate ─▶ CleanText ─▶ Render ─▶ Done
//!            │  gate: normalize                                 │ gate: clean
//! ```
//!
//! Every stage failure is annotated with the step it happened in and folded
//! into one terminal [`PipelineError`]. Nothing is retried here; the only
//! retries are the gateway's own transient-status retries.
//!
//! ## Why a builder?
//!
//! The collaborators (gateway, renderer, limiter, telemetry) are trait
//! objects so tests can run the whole state machine against fakes. A server
//! builds one [`Pipeline`] at startup and shares it across requests behind
//! an `Arc`; every method takes `&self`.

use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, RateStage};
use crate::output::{PipelineRequest, PipelineResult};
use crate::pipeline::classify;
use crate::pipeline::llm::{ChatCompletion, ChatMessage};
use crate::pipeline::rate_limit::{RateDecision, RateLimiter};
use crate::pipeline::render::DocumentRenderer;
use crate::pipeline::telemetry::{
    NullUsageLog, RunOutcome, UsageCounter, UsageLog, UsageRecord,
};
use crate::pipeline::templates::{TemplateCatalog, TemplateDefinition};
use crate::progress::ProgressCallback;
use crate::prompts::{CLEAN_SYSTEM_PROMPT, NORMALIZE_SYSTEM_PROMPT};
use crate::step::{ProcessingStep, StepTracker};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Template id logged when the request carried none.
pub const UNKNOWN_TEMPLATE: &str = "unknown";

// ── Builder ──────────────────────────────────────────────────────────────

/// Assembles a [`Pipeline`] from its collaborators.
///
/// Only the gateway and the renderer are required. The rest default to:
/// [`PipelineConfig::default`], a wall-clock [`RateLimiter`] built from that
/// config, [`TemplateCatalog::default`], a [`NullUsageLog`] and no counter.
pub struct PipelineBuilder {
    llm: Arc<dyn ChatCompletion>,
    renderer: Arc<dyn DocumentRenderer>,
    config: PipelineConfig,
    limiter: Option<Arc<RateLimiter>>,
    catalog: TemplateCatalog,
    usage_log: Arc<dyn UsageLog>,
    counter: Option<Arc<dyn UsageCounter>>,
    progress: Option<ProgressCallback>,
}

impl PipelineBuilder {
    pub fn new(llm: Arc<dyn ChatCompletion>, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            llm,
            renderer,
            config: PipelineConfig::default(),
            limiter: None,
            catalog: TemplateCatalog::default(),
            usage_log: Arc::new(NullUsageLog),
            counter: None,
            progress: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing limiter (e.g. one with a sweeper task or a manual clock).
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn usage_log(mut self, log: Arc<dyn UsageLog>) -> Self {
        self.usage_log = log;
        self
    }

    pub fn usage_counter(mut self, counter: Arc<dyn UsageCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Observe every step transition of every run.
    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn build(self) -> Pipeline {
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::from_config(&self.config)));
        Pipeline {
            llm: self.llm,
            renderer: self.renderer,
            config: self.config,
            limiter,
            catalog: self.catalog,
            usage_log: self.usage_log,
            counter: self.counter,
            progress: self.progress,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Text → cleaned Markdown → `.docx`, one request at a time per call.
pub struct Pipeline {
    llm: Arc<dyn ChatCompletion>,
    renderer: Arc<dyn DocumentRenderer>,
    config: PipelineConfig,
    limiter: Arc<RateLimiter>,
    catalog: TemplateCatalog,
    usage_log: Arc<dyn UsageLog>,
    counter: Option<Arc<dyn UsageCounter>>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("model", &self.llm.model())
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("templates", &self.catalog.templates().len())
            .field("progress_callback", &self.progress.is_some())
            .finish()
    }
}

/// Mutable state of one run.
struct RunState {
    tracker: StepTracker,
    /// Id of the resolved template once `SelectTemplate` succeeded.
    template_id: Option<String>,
    was_converted: bool,
    progress: Option<ProgressCallback>,
}

impl RunState {
    fn new(progress: Option<ProgressCallback>) -> Self {
        if let Some(cb) = &progress {
            cb.on_step(ProcessingStep::Input);
        }
        Self {
            tracker: StepTracker::new(),
            template_id: None,
            was_converted: false,
            progress,
        }
    }

    fn step(&self) -> ProcessingStep {
        self.tracker.current()
    }

    fn enter(&mut self, next: ProcessingStep) -> Result<(), PipelineError> {
        let from = self.tracker.current();
        if from == next {
            return Ok(());
        }
        if !self.tracker.advance(next) {
            return Err(PipelineError::unknown(
                from,
                format!("illegal step transition {from} -> {next}"),
            ));
        }
        debug!("Step {} -> {}", from, next);
        if let Some(cb) = &self.progress {
            cb.on_step(next);
        }
        Ok(())
    }
}

impl Pipeline {
    pub fn builder(
        llm: Arc<dyn ChatCompletion>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(llm, renderer)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one request for `client_id` to completion.
    ///
    /// Either every step succeeds and a [`PipelineResult`] is returned, or
    /// the run stops at the first failure. In both cases a usage record is
    /// written (best-effort) before returning.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        client_id: &str,
    ) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let mut state = RunState::new(self.progress.clone());
        info!(
            client = client_id,
            template = %request.template_id,
            input_chars = request.raw_text.chars().count(),
            "Conversion started"
        );

        let timed = tokio::time::timeout(
            self.config.request_timeout,
            self.run_steps(request, client_id, &mut state),
        )
        .await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) => Err(timeout_error(
                state.step(),
                self.config.request_timeout,
                "request time budget exhausted",
            )),
        };
        let elapsed = start.elapsed();
        let template_id = match &state.template_id {
            Some(id) => id.clone(),
            None if request.template_id.trim().is_empty() => UNKNOWN_TEMPLATE.to_string(),
            None => request.template_id.clone(),
        };

        match outcome {
            Ok(result) => {
                info!(
                    client = client_id,
                    template = %result.template_id,
                    was_converted = result.was_converted,
                    bytes = result.document.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Conversion complete: {}",
                    result.output_filename
                );
                self.record_usage(UsageRecord {
                    ip: client_id.to_string(),
                    input_length: request.raw_text.chars().count(),
                    template_id,
                    result: RunOutcome::Success,
                    error_code: None,
                    step: None,
                    duration_ms: elapsed.as_millis() as u64,
                    was_converted: Some(result.was_converted),
                })
                .await;
                self.bump_counter().await;
                if let Some(cb) = &self.progress {
                    cb.on_complete(&result);
                }
                Ok(result)
            }
            Err(err) => {
                let err = escalate_slow_failure(err, elapsed, self.config.slow_request_threshold);
                self.fail(&err, client_id, request, template_id, elapsed).await;
                Err(err)
            }
        }
    }

    /// Report a failure that happened before a request could be built
    /// (e.g. an undecodable body) the same way a pipeline failure is reported.
    pub async fn reject(&self, err: &PipelineError, client_id: &str, raw_len: usize) {
        if let Some(cb) = &self.progress {
            cb.on_error(err);
        }
        warn!(client = client_id, code = err.code(), "Request rejected: {}", err);
        self.record_usage(UsageRecord {
            ip: client_id.to_string(),
            input_length: raw_len,
            template_id: UNKNOWN_TEMPLATE.to_string(),
            result: RunOutcome::Error,
            error_code: Some(err.code().to_string()),
            step: Some(err.step),
            duration_ms: 0,
            was_converted: None,
        })
        .await;
    }

    async fn run_steps(
        &self,
        request: &PipelineRequest,
        client_id: &str,
        state: &mut RunState,
    ) -> Result<PipelineResult, PipelineError> {
        // ── Validate ─────────────────────────────────────────────────────
        state.enter(ProcessingStep::Validate)?;
        let text = validate_input(&request.raw_text, self.config.max_input_length)?;
        self.gate(client_id, RateStage::Normalize, ProcessingStep::Validate)?;

        // ── NormalizeText (optional) ─────────────────────────────────────
        let verdict = classify::classify(text);
        let markdown = if verdict.is_markdown {
            debug!(score = verdict.score, "Input already looks like Markdown");
            text.to_string()
        } else {
            state.enter(ProcessingStep::NormalizeText)?;
            info!(score = verdict.score, "Input is not Markdown; normalising");
            let converted = self.normalize(text).await?;
            state.was_converted = true;
            converted
        };

        // ── SelectTemplate ───────────────────────────────────────────────
        state.enter(ProcessingStep::SelectTemplate)?;
        let template = select_template(&self.catalog, &request.template_id)?;
        state.template_id = Some(template.id.clone());

        // ── CleanText ────────────────────────────────────────────────────
        state.enter(ProcessingStep::CleanText)?;
        self.gate(client_id, RateStage::Clean, ProcessingStep::CleanText)?;
        let cleaned = self.clean(&markdown).await?;

        // ── Render ───────────────────────────────────────────────────────
        state.enter(ProcessingStep::Render)?;
        let document = self
            .renderer
            .render(&cleaned, &template.renderer_filename)
            .await
            .map_err(|e| {
                PipelineError::new(
                    ErrorKind::from_render(&e),
                    ProcessingStep::Render,
                    "Word document generation failed",
                )
                .with_detail(e.to_string())
            })?;

        // ── Done ─────────────────────────────────────────────────────────
        state.enter(ProcessingStep::Done)?;
        Ok(PipelineResult {
            cleaned_text: cleaned,
            template_id: template.id.clone(),
            output_filename: output_filename(&self.config.filename_prefix, Utc::now().timestamp_millis()),
            document,
            final_step: ProcessingStep::Done,
            was_converted: state.was_converted,
        })
    }

    fn gate(
        &self,
        client_id: &str,
        stage: RateStage,
        step: ProcessingStep,
    ) -> Result<(), PipelineError> {
        match self.limiter.check_and_consume(client_id, stage) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Exceeded {
                retry_after_secs,
                message,
            } => Err(PipelineError::new(ErrorKind::RateLimited(stage), step, message)
                .with_detail(format!("Please retry in {retry_after_secs} seconds"))
                .with_retry_after(retry_after_secs)),
        }
    }

    async fn normalize(&self, text: &str) -> Result<String, PipelineError> {
        let messages = [
            ChatMessage::system(NORMALIZE_SYSTEM_PROMPT),
            ChatMessage::user(text),
        ];
        self.llm
            .complete(&messages, self.config.normalize_temperature)
            .await
            .map_err(|e| {
                PipelineError::new(
                    ErrorKind::NormalizationFailed,
                    ProcessingStep::NormalizeText,
                    "Text-to-Markdown conversion failed",
                )
                .with_detail(e.to_string())
            })
    }

    async fn clean(&self, markdown: &str) -> Result<String, PipelineError> {
        let messages = [
            ChatMessage::system(CLEAN_SYSTEM_PROMPT),
            ChatMessage::user(markdown),
        ];
        self.llm
            .complete(&messages, self.config.clean_temperature)
            .await
            .map_err(|e| {
                PipelineError::new(
                    ErrorKind::CleaningFailed,
                    ProcessingStep::CleanText,
                    "Markdown cleaning failed",
                )
                .with_detail(e.to_string())
            })
    }

    async fn fail(
        &self,
        err: &PipelineError,
        client_id: &str,
        request: &PipelineRequest,
        template_id: String,
        elapsed: Duration,
    ) {
        match err.kind {
            ErrorKind::InputEmpty | ErrorKind::InputTooLong | ErrorKind::RateLimited(_) => {
                warn!(client = client_id, code = err.code(), "Conversion rejected: {}", err)
            }
            _ => error!(
                client = client_id,
                code = err.code(),
                elapsed_ms = elapsed.as_millis() as u64,
                detail = err.detail.as_deref().unwrap_or(""),
                "Conversion failed: {}",
                err
            ),
        }
        self.record_usage(UsageRecord {
            ip: client_id.to_string(),
            input_length: request.raw_text.chars().count(),
            template_id,
            result: RunOutcome::Error,
            error_code: Some(err.code().to_string()),
            step: Some(err.step),
            duration_ms: elapsed.as_millis() as u64,
            was_converted: None,
        })
        .await;
        if let Some(cb) = &self.progress {
            cb.on_error(err);
        }
    }

    async fn record_usage(&self, record: UsageRecord) {
        if let Err(e) = self.usage_log.append(&record).await {
            warn!("Failed to write usage record: {}", e);
        }
    }

    async fn bump_counter(&self) {
        let Some(counter) = &self.counter else {
            return;
        };
        match counter.increment().await {
            Ok(n) => debug!(count = n, "Usage counter incremented"),
            Err(e) => warn!("Failed to increment usage counter: {}", e),
        }
    }
}

// ── Transitions ──────────────────────────────────────────────────────────

/// Trimmed input, or `InputEmpty` / `InputTooLong` at `Validate`.
///
/// Emptiness is judged after trimming; length is the raw input's character
/// count, the same figure the usage log records.
pub fn validate_input(raw: &str, max_len: usize) -> Result<&str, PipelineError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PipelineError::new(
            ErrorKind::InputEmpty,
            ProcessingStep::Validate,
            "Please enter some text to convert",
        ));
    }
    let len = raw.chars().count();
    if len > max_len {
        return Err(PipelineError::new(
            ErrorKind::InputTooLong,
            ProcessingStep::Validate,
            format!(
                "Input is {} characters long; the maximum is {} characters",
                group_thousands(len),
                group_thousands(max_len)
            ),
        ));
    }
    Ok(text)
}

/// Resolve `id` with fallback; a missing or disabled result is `TemplateUnavailable`.
pub fn select_template<'a>(
    catalog: &'a TemplateCatalog,
    id: &str,
) -> Result<&'a TemplateDefinition, PipelineError> {
    match catalog.resolve(id) {
        Some(t) if !t.disabled => {
            if t.id != id {
                info!("Template '{}' not found; falling back to '{}'", id, t.id);
            }
            Ok(t)
        }
        resolved => Err(PipelineError::new(
            ErrorKind::TemplateUnavailable,
            ProcessingStep::SelectTemplate,
            "The selected template is unavailable; please choose another template",
        )
        .with_detail(match resolved {
            Some(t) => format!("template '{}' is disabled", t.id),
            None => "template catalog is empty".to_string(),
        })),
    }
}

/// `<prefix>-<unix millis>.docx`
pub fn output_filename(prefix: &str, unix_millis: i64) -> String {
    format!("{prefix}-{unix_millis}.docx")
}

/// An unclassified failure that took longer than `threshold` was almost
/// certainly cut off upstream; report it as such.
pub fn escalate_slow_failure(
    err: PipelineError,
    elapsed: Duration,
    threshold: Duration,
) -> PipelineError {
    if err.kind == ErrorKind::Unknown && elapsed > threshold {
        let detail = err.detail.clone().unwrap_or_else(|| err.message.clone());
        return timeout_error(err.step, elapsed, &detail);
    }
    err
}

fn timeout_error(step: ProcessingStep, after: Duration, detail: &str) -> PipelineError {
    PipelineError::new(
        ErrorKind::UpstreamTimeout,
        step,
        format!(
            "The request timed out after {}s. This is usually the reverse proxy's read \
             timeout rather than an application fault; try a shorter input or retry later",
            after.as_secs()
        ),
    )
    .with_detail(detail)
}

/// `10000` → `"10,000"`.
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
