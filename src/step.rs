//! Processing steps and the single "current step" cursor of a run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered pipeline steps. The derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessingStep {
    Input,
    Validate,
    /// Only visited when the input is not already Markdown.
    NormalizeText,
    SelectTemplate,
    CleanText,
    Render,
    Done,
}

impl ProcessingStep {
    pub const ALL: [ProcessingStep; 7] = [
        ProcessingStep::Input,
        ProcessingStep::Validate,
        ProcessingStep::NormalizeText,
        ProcessingStep::SelectTemplate,
        ProcessingStep::CleanText,
        ProcessingStep::Render,
        ProcessingStep::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStep::Input => "Input",
            ProcessingStep::Validate => "Validate",
            ProcessingStep::NormalizeText => "NormalizeText",
            ProcessingStep::SelectTemplate => "SelectTemplate",
            ProcessingStep::CleanText => "CleanText",
            ProcessingStep::Render => "Render",
            ProcessingStep::Done => "Done",
        }
    }

    /// Whether the pipeline may jump over this step.
    pub fn is_optional(self) -> bool {
        self == ProcessingStep::NormalizeText
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current step of one run and the steps visited so far.
///
/// Transitions never go backwards and never skip a mandatory step.
#[derive(Debug, Clone)]
pub struct StepTracker {
    current: ProcessingStep,
    visited: Vec<ProcessingStep>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self {
            current: ProcessingStep::Input,
            visited: vec![ProcessingStep::Input],
        }
    }

    pub fn current(&self) -> ProcessingStep {
        self.current
    }

    pub fn visited(&self) -> &[ProcessingStep] {
        &self.visited
    }

    /// Move to `next`. Re-entering the current step is a no-op.
    ///
    /// Returns `false` (and leaves the cursor untouched) for a backwards move
    /// or one that would skip a mandatory step.
    pub fn advance(&mut self, next: ProcessingStep) -> bool {
        if next == self.current {
            return true;
        }
        if next < self.current {
            return false;
        }
        let skipped_mandatory = ProcessingStep::ALL
            .iter()
            .filter(|s| **s > self.current && **s < next)
            .any(|s| !s.is_optional());
        if skipped_mandatory {
            return false;
        }
        self.current = next;
        self.visited.push(next);
        true
    }
}
