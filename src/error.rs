//! Error types for the md2word library.
//!
//! Each collaborator boundary has its own error type so failures are
//! classified by *variant*, never by inspecting message text:
//!
//! * [`LlmError`]: the chat-completion gateway (HTTP status, empty content,
//!   transport failure).
//! * [`RenderError`]: the external document renderer (missing executable or
//!   template, permission denial, tool failure).
//! * [`TelemetryError`]: usage log and usage counter writes. Always
//!   swallowed by the orchestrator after logging.
//! * [`ConfigError`]: startup configuration.
//!
//! The orchestrator folds every stage failure into a single terminal
//! [`PipelineError`], which pairs a stable [`ErrorKind`] (error code + HTTP
//! status) with the step that failed and the underlying detail text.

use crate::step::ProcessingStep;
use std::path::PathBuf;
use thiserror::Error;

// ── Collaborator errors ──────────────────────────────────────────────────

/// Failure of a single chat-completion call, after the gateway's own retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// The endpoint answered with a non-success status. Carries the raw body.
    #[error("LLM request failed: {status} {body}")]
    Status { status: u16, body: String },

    /// HTTP 200 but the first choice had no message content.
    #[error("LLM response contained no content")]
    NoContent,

    /// HTTP 200 but the body was not a chat-completion document.
    #[error("LLM response could not be decoded: {0}")]
    InvalidResponse(String),

    /// The request never produced a response (DNS, connect, TLS, reset).
    #[error("LLM transport error: {0}")]
    Transport(String),

    /// The per-call timeout elapsed.
    #[error("LLM request timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Failure of the external renderer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The renderer executable or the reference template does not exist.
    #[error("not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// The process lacks permission to read the template or execute the renderer.
    #[error("permission denied: '{}'", path.display())]
    PermissionDenied { path: PathBuf },

    /// Anything else: non-zero exit, missing output, I/O in the scratch area.
    #[error("render failed: {detail}")]
    Failed { detail: String },
}

impl RenderError {
    /// Classify an I/O error raised while touching `path`.
    pub fn from_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => RenderError::NotFound { path: path.into() },
            std::io::ErrorKind::PermissionDenied => {
                RenderError::PermissionDenied { path: path.into() }
            }
            _ => RenderError::Failed {
                detail: format!("{}: {err}", path.into().display()),
            },
        }
    }
}

/// Usage log / counter persistence failure.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry serialisation error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Invalid or missing startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The template catalog file could not be read or parsed.
    #[error("Failed to load template catalog '{path}': {detail}")]
    Catalog { path: PathBuf, detail: String },
}

// ── Terminal pipeline error ──────────────────────────────────────────────

/// Classification of a terminal pipeline failure.
///
/// The code returned by [`ErrorKind::code`] is part of the public contract:
/// end users quote it to support, so existing codes never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input is empty or whitespace only.
    InputEmpty,
    /// Input is longer than the configured maximum.
    InputTooLong,
    /// Per-client cap for the given rate-limit stage was reached.
    RateLimited(RateStage),
    /// No usable template could be resolved.
    TemplateUnavailable,
    /// The text-to-Markdown LLM call failed.
    NormalizationFailed,
    /// The Markdown cleaning LLM call failed.
    CleaningFailed,
    /// Renderer executable or template missing.
    RenderNotFound,
    /// Renderer executable or template not accessible.
    RenderPermissionDenied,
    /// Renderer failed for any other reason.
    RenderFailed,
    /// The run exceeded its time budget (usually the reverse proxy giving up first).
    UpstreamTimeout,
    /// Anything not classified above.
    Unknown,
}

/// The two rate-limit partitions. Also used as the key inside the limiter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateStage {
    /// Text-to-Markdown normalisation (expensive fallback, lower cap).
    Normalize,
    /// Markdown cleaning (common path, higher cap).
    Clean,
}

impl RateStage {
    /// Label used in user-facing messages and logs.
    pub fn label(self) -> &'static str {
        match self {
            RateStage::Normalize => "text-to-Markdown",
            RateStage::Clean => "Markdown cleaning",
        }
    }
}

impl ErrorKind {
    /// Stable support code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InputEmpty => "CONV_01_01",
            ErrorKind::InputTooLong => "CONV_01_02",
            ErrorKind::RateLimited(RateStage::Normalize) => "CONV_01_03",
            ErrorKind::TemplateUnavailable => "CONV_02_01",
            ErrorKind::NormalizationFailed => "CONV_02_99",
            ErrorKind::RateLimited(RateStage::Clean) => "CONV_03_01",
            ErrorKind::CleaningFailed => "CONV_03_99",
            ErrorKind::RenderNotFound => "CONV_04_02",
            ErrorKind::RenderPermissionDenied => "CONV_04_03",
            ErrorKind::RenderFailed => "CONV_04_99",
            ErrorKind::UpstreamTimeout => "CONV_99_TIMEOUT",
            ErrorKind::Unknown => "CONV_99_99",
        }
    }

    /// HTTP status the server answers with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InputEmpty | ErrorKind::InputTooLong | ErrorKind::TemplateUnavailable => 400,
            ErrorKind::RateLimited(_) => 429,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::NormalizationFailed
            | ErrorKind::CleaningFailed
            | ErrorKind::RenderNotFound
            | ErrorKind::RenderPermissionDenied
            | ErrorKind::RenderFailed
            | ErrorKind::Unknown => 500,
        }
    }

    /// Map a renderer failure onto its kind.
    pub fn from_render(err: &RenderError) -> Self {
        match err {
            RenderError::NotFound { .. } => ErrorKind::RenderNotFound,
            RenderError::PermissionDenied { .. } => ErrorKind::RenderPermissionDenied,
            RenderError::Failed { .. } => ErrorKind::RenderFailed,
        }
    }
}

/// Terminal failure of one pipeline run.
///
/// `message` is safe to show to an end user. `detail` holds the underlying
/// error text and is reported separately; it never replaces the code.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message} (step: {step})", kind.code())]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub step: ProcessingStep,
    pub detail: Option<String>,
    /// Set for [`ErrorKind::RateLimited`].
    pub retry_after_secs: Option<u64>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, step: ProcessingStep, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step,
            detail: None,
            retry_after_secs: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Catch-all failure at `step`.
    pub fn unknown(step: ProcessingStep, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(
            ErrorKind::Unknown,
            step,
            format!("An error occurred while processing: {detail}"),
        )
        .with_detail(detail)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}
