//! Chat-completion gateway shared by the normalisation and cleaning calls.
//!
//! Both call sites use the same transport and retry logic and differ only in
//! prompt and temperature (see [`crate::prompts`]).
//!
//! ## Retry Strategy
//!
//! Up to [`RetryPolicy::max_attempts`] attempts, retrying only on transient
//! statuses (429, 500, 502, 503, 504). A server-supplied `Retry-After`
//! (seconds, capped at [`MAX_RETRY_AFTER`]) wins over the exponential schedule
//! `base * 2^attempt` (750 ms → 1.5 s → 3 s with the defaults). Transport errors, non-transient
//! statuses and 200 responses without content fail immediately.

use crate::config::{LlmConfig, RetryPolicy};
use crate::error::LlmError;
use crate::prompts::{HEALTH_SYSTEM_PROMPT, HEALTH_USER_PROMPT};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// HTTP statuses worth retrying.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Longest server-requested wait honoured between attempts.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Anything that can turn a conversation into one trimmed completion.
///
/// [`LlmGateway`] is the HTTP implementation; tests substitute fakes.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], temperature: f32)
        -> Result<String, LlmError>;

    /// Model identifier, for logs.
    fn model(&self) -> &str;
}

/// OpenAI-compatible `/chat/completions` client with bearer auth.
pub struct LlmGateway {
    /// Never exposed in logs or debug output.
    api_key: SecretString,
    endpoint: String,
    model: String,
    timeout: Duration,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("api_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl LlmGateway {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: config.api_key,
            endpoint: format!("{}/chat/completions", config.base_url),
            model: config.model,
            timeout: config.timeout,
            retry: config.retry,
            client,
        })
    }

    async fn send(
        &self,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<reqwest::Response, LlmError> {
        self.client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    LlmError::Transport(e.to_string())
                }
            })
    }
}

#[async_trait]
impl ChatCompletion for LlmGateway {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            temperature,
            messages,
        };
        let attempts = self.retry.max_attempts.max(1);
        let start = Instant::now();

        for attempt in 0..attempts {
            let response = self.send(&body).await?;
            let status = response.status();

            if status.is_success() {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .filter(|c| !c.is_empty())
                    .ok_or(LlmError::NoContent)?;

                debug!(
                    model = %self.model,
                    attempt = attempt + 1,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Chat completion succeeded"
                );
                return Ok(content.trim().to_string());
            }

            let retry_after = parse_retry_after(response.headers());
            let body_text = response.text().await.unwrap_or_else(|e| {
                debug!(status = status.as_u16(), "Failed to read error body: {}", e);
                format!("<failed to read response body: {e}>")
            });
            let status = status.as_u16();
            let is_last = attempt + 1 == attempts;

            if !is_transient(status) || is_last {
                warn!(status, attempt = attempt + 1, "Chat completion failed");
                return Err(LlmError::Status {
                    status,
                    body: body_text,
                });
            }

            let delay = retry_after.unwrap_or_else(|| self.retry.backoff(attempt));
            warn!(
                "Chat completion attempt {}/{} got HTTP {}; retrying in {}ms",
                attempt + 1,
                attempts,
                status,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        // The loop returns on its last iteration.
        Err(LlmError::Transport("retry budget exhausted".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// `Retry-After` in seconds (fractional allowed), capped at [`MAX_RETRY_AFTER`].
/// HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = raw.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(secs.min(MAX_RETRY_AFTER.as_secs_f64())).ok()
}

// ── Health probe ─────────────────────────────────────────────────────────

/// Outcome of [`probe`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmHealth {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Send a trivial prompt and report latency and the start of the reply.
pub async fn probe(llm: &dyn ChatCompletion) -> LlmHealth {
    let start = Instant::now();
    let messages = [
        ChatMessage::system(HEALTH_SYSTEM_PROMPT),
        ChatMessage::user(HEALTH_USER_PROMPT),
    ];
    let outcome = llm.complete(&messages, 0.0).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(content) => {
            info!(model = llm.model(), latency_ms, "LLM health probe ok");
            LlmHealth {
                ok: true,
                latency_ms,
                sample: Some(content.chars().take(50).collect()),
                message: None,
            }
        }
        Err(e) => {
            warn!(model = llm.model(), latency_ms, "LLM health probe failed: {}", e);
            LlmHealth {
                ok: false,
                latency_ms,
                sample: None,
                message: Some(e.to_string()),
            }
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
