//! In-memory fakes for the pipeline's collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use md2word::pipeline::telemetry::UsageRecord;
use md2word::prompts::NORMALIZE_SYSTEM_PROMPT;
use md2word::{
    ChatCompletion, ChatMessage, DocumentRenderer, LlmError, ManualClock, Pipeline,
    PipelineConfig, PipelineError, PipelineProgressCallback, PipelineResult, ProcessingStep,
    RateLimiter, RenderError, TelemetryError, UsageCounter, UsageLog,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Gateway ──────────────────────────────────────────────────────────────

/// Answers the normalisation prompt and the cleaning prompt with fixed replies.
pub struct StubGateway {
    pub normalize_reply: Mutex<Result<String, LlmError>>,
    pub clean_reply: Mutex<Result<String, LlmError>>,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<(Vec<ChatMessage>, f32)>>,
}

impl StubGateway {
    pub fn new(normalize: &str, clean: &str) -> Self {
        Self {
            normalize_reply: Mutex::new(Ok(normalize.to_string())),
            clean_reply: Mutex::new(Ok(clean.to_string())),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_normalize(self, err: LlmError) -> Self {
        *self.normalize_reply.lock().unwrap() = Err(err);
        self
    }

    pub fn fail_clean(self, err: LlmError) -> Self {
        *self.clean_reply.lock().unwrap() = Err(err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// User message of every call, in order.
    pub fn user_messages(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.last().map(|m| m.content.clone()).unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl ChatCompletion for StubGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), temperature));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let is_normalize = messages
            .first()
            .is_some_and(|m| m.content == NORMALIZE_SYSTEM_PROMPT);
        if is_normalize {
            self.normalize_reply.lock().unwrap().clone()
        } else {
            self.clean_reply.lock().unwrap().clone()
        }
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────

/// Returns `DOCX:<markdown>` and records `(markdown, template)` per call.
#[derive(Default)]
pub struct StubRenderer {
    pub fail_with: Option<RenderError>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl StubRenderer {
    pub fn failing(err: RenderError) -> Self {
        Self {
            fail_with: Some(err),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentRenderer for StubRenderer {
    async fn render(&self, markdown: &str, template: &str) -> Result<Vec<u8>, RenderError> {
        self.calls
            .lock()
            .unwrap()
            .push((markdown.to_string(), template.to_string()));
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(format!("DOCX:{markdown}").into_bytes()),
        }
    }
}

// ── Telemetry ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingLog {
    pub records: Mutex<Vec<UsageRecord>>,
    pub broken: AtomicBool,
}

impl RecordingLog {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageLog for RecordingLog {
    async fn append(&self, record: &UsageRecord) -> Result<(), TelemetryError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TelemetryError::Io {
                path: "logs/usage.log".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCounter {
    pub value: AtomicU64,
    pub broken: AtomicBool,
}

#[async_trait]
impl UsageCounter for MemoryCounter {
    async fn count(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    async fn increment(&self) -> Result<u64, TelemetryError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TelemetryError::Io {
                path: "data/stats.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// ── Progress ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StepRecorder {
    pub steps: Mutex<Vec<ProcessingStep>>,
    pub completed: AtomicUsize,
    pub failed: Mutex<Vec<String>>,
}

impl PipelineProgressCallback for StepRecorder {
    fn on_step(&self, step: ProcessingStep) {
        self.steps.lock().unwrap().push(step);
    }

    fn on_complete(&self, _result: &PipelineResult) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &PipelineError) {
        self.failed.lock().unwrap().push(error.code().to_string());
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub pipeline: Pipeline,
    pub gateway: Arc<StubGateway>,
    pub renderer: Arc<StubRenderer>,
    pub log: Arc<RecordingLog>,
    pub counter: Arc<MemoryCounter>,
    pub clock: Arc<ManualClock>,
    pub progress: Arc<StepRecorder>,
}

pub fn harness(gateway: StubGateway, renderer: StubRenderer, config: PipelineConfig) -> Harness {
    let gateway = Arc::new(gateway);
    let renderer = Arc::new(renderer);
    let log = Arc::new(RecordingLog::default());
    let counter = Arc::new(MemoryCounter::default());
    let clock = Arc::new(ManualClock::new());
    let progress = Arc::new(StepRecorder::default());
    let limiter = Arc::new(RateLimiter::new(
        config.normalize_limit,
        config.clean_limit,
        clock.clone(),
    ));

    let pipeline = Pipeline::builder(gateway.clone(), renderer.clone())
        .config(config)
        .rate_limiter(limiter)
        .usage_log(log.clone())
        .usage_counter(counter.clone())
        .progress_callback(progress.clone())
        .build();

    Harness {
        pipeline,
        gateway,
        renderer,
        log,
        counter,
        clock,
        progress,
    }
}

pub fn default_harness() -> Harness {
    harness(
        StubGateway::new("# Generated\n\nNormalised body.", "# Clean\n\nCleaned body."),
        StubRenderer::default(),
        PipelineConfig::default(),
    )
}
