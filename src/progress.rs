//! Progress-callback trait for per-step pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::convert::PipelineBuilder::progress_callback`] to observe a run as
//! it moves through [`ProcessingStep`]s.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal spinner, a log line or a
//! server-sent-events stream without the library knowing how the host
//! communicates. The trait is `Send + Sync` because one pipeline instance
//! serves many concurrent requests.
//!
//! # Example
//!
//! ```rust
//! use md2word::{PipelineProgressCallback, ProcessingStep};
//! use std::sync::Mutex;
//!
//! struct StepLog(Mutex<Vec<ProcessingStep>>);
//!
//! impl PipelineProgressCallback for StepLog {
//!     fn on_step(&self, step: ProcessingStep) {
//!         self.0.lock().unwrap().push(step);
//!     }
//! }
//! ```

use crate::error::PipelineError;
use crate::output::PipelineResult;
use crate::step::ProcessingStep;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods default to no-ops so implementors override only what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called every time the run enters a new step, including the first (`Input`).
    fn on_step(&self, step: ProcessingStep) {
        let _ = step;
    }

    /// Called once when the run finishes successfully.
    fn on_complete(&self, result: &PipelineResult) {
        let _ = result;
    }

    /// Called once when the run fails.
    fn on_error(&self, error: &PipelineError) {
        let _ = error;
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
