//! Configuration types for the md2word pipeline and its collaborators.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Collaborators have their own small structs
//! ([`LlmConfig`], [`RendererConfig`], [`TelemetryConfig`]) because each is
//! constructed once at startup and handed to a different component.
//!
//! # Design choice: builder over constructor
//! Callers set only what they care about and rely on documented defaults for
//! the rest; `build()` rejects combinations that cannot work.

use crate::error::{ConfigError, RateStage};
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Cap of `max_requests` per client within each `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Configuration for one pipeline instance.
///
/// # Example
/// ```rust
/// use md2word::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_input_length(20_000)
///     .clean_temperature(0.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_input_length, 20_000);
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum input length in characters. Default: 10 000.
    ///
    /// The cleaning prompt echoes the whole document back, so output tokens
    /// grow with input; 10 000 characters keeps a run well inside the proxy
    /// timeout for typical models.
    pub max_input_length: usize,

    /// Per-client cap for text-to-Markdown calls. Default: 5 per minute.
    pub normalize_limit: RateLimitRule,

    /// Per-client cap for Markdown cleaning calls. Default: 10 per minute.
    pub clean_limit: RateLimitRule,

    /// Temperature for the normalisation prompt. Default: 0.2.
    pub normalize_temperature: f32,

    /// Temperature for the cleaning prompt. Default: 0.0.
    pub clean_temperature: f32,

    /// Unclassified failures slower than this are reported as upstream
    /// timeouts. Default: 50 s.
    pub slow_request_threshold: Duration,

    /// Overall budget for one run. Default: 120 s.
    pub request_timeout: Duration,

    /// Prefix of the generated `.docx` filename. Default: `md2word`.
    pub filename_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_input_length: 10_000,
            normalize_limit: RateLimitRule::per_minute(5),
            clean_limit: RateLimitRule::per_minute(10),
            normalize_temperature: 0.2,
            clean_temperature: 0.0,
            slow_request_threshold: Duration::from_secs(50),
            request_timeout: Duration::from_secs(120),
            filename_prefix: "md2word".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Rate-limit rule for `stage`.
    pub fn limit_for(&self, stage: RateStage) -> RateLimitRule {
        match stage {
            RateStage::Normalize => self.normalize_limit,
            RateStage::Clean => self.clean_limit,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_input_length(mut self, n: usize) -> Self {
        self.config.max_input_length = n;
        self
    }

    pub fn normalize_limit(mut self, rule: RateLimitRule) -> Self {
        self.config.normalize_limit = rule;
        self
    }

    pub fn clean_limit(mut self, rule: RateLimitRule) -> Self {
        self.config.clean_limit = rule;
        self
    }

    pub fn normalize_temperature(mut self, t: f32) -> Self {
        self.config.normalize_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn clean_temperature(mut self, t: f32) -> Self {
        self.config.clean_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn slow_request_threshold(mut self, d: Duration) -> Self {
        self.config.slow_request_threshold = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.request_timeout = d;
        self
    }

    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.filename_prefix = prefix.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let c = &self.config;
        if c.max_input_length == 0 {
            return Err(ConfigError::Invalid(
                "max_input_length must be ≥ 1".into(),
            ));
        }
        for (name, rule) in [("normalize", c.normalize_limit), ("clean", c.clean_limit)] {
            if rule.window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} rate-limit window must be non-zero"
                )));
            }
        }
        if c.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout must be non-zero".into()));
        }
        if c.filename_prefix.trim().is_empty() || c.filename_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "filename_prefix must be a plain file name, got {:?}",
                c.filename_prefix
            )));
        }
        Ok(self.config)
    }
}

// ── LLM gateway ──────────────────────────────────────────────────────────

/// Retry schedule for transient chat-completion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt (750 ms → 1.5 s → 3 s). Default: 750 ms.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(750),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Chat-completion endpoint settings.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    /// Per-attempt HTTP timeout. Default: 90 s.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl LlmConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
        }
    }

    /// Read `LLM_API_KEY`, `LLM_API_BASE_URL` and `LLM_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            read_env("LLM_API_KEY")?,
            read_env("LLM_API_BASE_URL")?,
            read_env("LLM_MODEL")?,
        ))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn read_env(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(key)),
    }
}

// ── Renderer ─────────────────────────────────────────────────────────────

/// Settings for the external Markdown → docx renderer.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Renderer executable.
    pub executable: PathBuf,
    /// Directory holding the reference `.docx` templates.
    pub templates_dir: PathBuf,
    /// Parent of the per-render scratch directory. `None` uses the OS temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Wall-clock limit for one renderer invocation. Default: 60 s.
    pub timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            executable: default_pandoc_path(),
            templates_dir: PathBuf::from("templates"),
            scratch_dir: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl RendererConfig {
    /// Defaults, with the executable taken from `PANDOC_PATH` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("PANDOC_PATH") {
            if !path.is_empty() {
                config.executable = PathBuf::from(path);
            }
        }
        config
    }
}

/// The bundled pandoc location under `tools/`.
fn default_pandoc_path() -> PathBuf {
    let tools = PathBuf::from("tools").join("pandoc");
    if cfg!(windows) {
        tools.join("pandoc.exe")
    } else {
        tools.join("bin").join("pandoc")
    }
}

// ── Telemetry ────────────────────────────────────────────────────────────

/// Usage log and counter settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_dir: PathBuf,
    /// Roll to a new file once the day's log reaches this size. Default: 10 MiB.
    pub max_file_size: u64,
    /// Offset used for the human-readable local timestamp. Default: +8 h.
    pub utc_offset_hours: i32,
    pub counter_path: PathBuf,
    /// Floor (and initial value) of the usage counter. Default: 12 753.
    pub counter_seed: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            max_file_size: 10 * 1024 * 1024,
            utc_offset_hours: 8,
            counter_path: PathBuf::from("data").join("stats.json"),
            counter_seed: 12_753,
        }
    }
}
