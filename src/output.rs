//! Input and output types of a pipeline run, plus their JSON wire forms.

use crate::error::PipelineError;
use crate::step::ProcessingStep;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// One conversion request. The `markdown` field may hold any text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(rename = "markdown")]
    pub raw_text: String,
    pub template_id: String,
}

impl PipelineRequest {
    pub fn new(raw_text: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            template_id: template_id.into(),
        }
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    /// Markdown as returned by the cleaning call (trimmed).
    pub cleaned_text: String,
    /// Id of the template actually used, after fallback.
    pub template_id: String,
    pub output_filename: String,
    /// The rendered `.docx` bytes.
    pub document: Vec<u8>,
    pub final_step: ProcessingStep,
    /// Whether the input went through text-to-Markdown normalisation.
    pub was_converted: bool,
}

impl PipelineResult {
    /// JSON body returned by the HTTP endpoint; the document travels as base64.
    pub fn to_response(&self) -> ConvertResponse {
        ConvertResponse {
            cleaned_markdown: self.cleaned_text.clone(),
            template_id: self.template_id.clone(),
            filename: self.output_filename.clone(),
            file_base64: STANDARD.encode(&self.document),
            step: self.final_step,
            was_converted: self.was_converted,
        }
    }
}

/// Success body of `POST /api/convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub cleaned_markdown: String,
    pub template_id: String,
    pub filename: String,
    pub file_base64: String,
    pub step: ProcessingStep,
    pub was_converted: bool,
}

/// Failure body of `POST /api/convert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub message: String,
    pub error_code: String,
    pub step: ProcessingStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(e: &PipelineError) -> Self {
        Self {
            message: e.message.clone(),
            error_code: e.code().to_string(),
            step: e.step,
            details: e.detail.clone(),
        }
    }
}
