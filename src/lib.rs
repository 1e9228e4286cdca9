//! # md2word
//!
//! Turn arbitrary text (Markdown, plain prose, pasted AI-chat output) into a
//! styled Word document.
//!
//! ## Why this crate?
//!
//! Pasting chat output into Word loses structure: headings become bold
//! paragraphs, lists collapse, tables turn into pipes. This crate normalises
//! the text into Markdown with an LLM when it is not Markdown already, lets
//! the LLM tidy the Markdown, and then renders it with pandoc against a
//! reference `.docx` so the result picks up real Word styles.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text
//!  │
//!  ├─ 1. Validate        non-empty, ≤ max characters; rate gate "normalize"
//!  ├─ 2. NormalizeText   only when the heuristic says "not Markdown" (LLM)
//!  ├─ 3. SelectTemplate  exact id → first enabled → first
//!  ├─ 4. CleanText       rate gate "clean"; LLM tidy-up
//!  ├─ 5. Render          pandoc --reference-doc=<template>
//!  └─ 6. Done            filename, usage record, usage counter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2word::{LlmConfig, LlmGateway, PandocRenderer, Pipeline, PipelineRequest, RendererConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM_API_KEY / LLM_API_BASE_URL / LLM_MODEL
//!     let llm = Arc::new(LlmGateway::new(LlmConfig::from_env()?)?);
//!     let renderer = Arc::new(PandocRenderer::new(RendererConfig::from_env()));
//!     let pipeline = Pipeline::builder(llm, renderer).build();
//!
//!     let request = PipelineRequest::new("# Notes\n\n- one\n- two", "style-default");
//!     let result = pipeline.run(&request, "127.0.0.1").await?;
//!     std::fs::write(&result.output_filename, &result.document)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `md2word` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | The axum HTTP surface in [`server`] |
//!
//! Library-only use:
//! ```toml
//! md2word = { version = "0.1", default-features = false }
//! ```
//!
//! ## Error Codes
//!
//! Every failure carries a stable code from [`ErrorKind::code`]:
//!
//! | Code | Meaning | HTTP |
//! |------|---------|------|
//! | `CONV_01_01` | empty input | 400 |
//! | `CONV_01_02` | input too long | 400 |
//! | `CONV_01_03` | text-to-Markdown rate limit | 429 |
//! | `CONV_02_01` | template unavailable | 400 |
//! | `CONV_02_99` | text-to-Markdown LLM call failed | 500 |
//! | `CONV_03_01` | cleaning rate limit | 429 |
//! | `CONV_03_99` | cleaning LLM call failed | 500 |
//! | `CONV_04_02` | renderer or template not found | 500 |
//! | `CONV_04_03` | renderer or template not accessible | 500 |
//! | `CONV_04_99` | rendering failed | 500 |
//! | `CONV_99_TIMEOUT` | run exceeded its time budget | 504 |
//! | `CONV_99_99` | anything else | 500 |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod step;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    LlmConfig, PipelineConfig, PipelineConfigBuilder, RateLimitRule, RendererConfig, RetryPolicy,
    TelemetryConfig,
};
pub use convert::{Pipeline, PipelineBuilder};
pub use error::{
    ConfigError, ErrorKind, LlmError, PipelineError, RateStage, RenderError, TelemetryError,
};
pub use output::{ConvertResponse, ErrorResponse, PipelineRequest, PipelineResult};
pub use pipeline::llm::{ChatCompletion, ChatMessage, LlmGateway, LlmHealth};
pub use pipeline::rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use pipeline::render::{DocumentRenderer, PandocRenderer};
pub use pipeline::telemetry::{JsonFileCounter, RollingFileLog, UsageCounter, UsageLog};
pub use pipeline::templates::{TemplateCatalog, TemplateDefinition};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use step::ProcessingStep;
