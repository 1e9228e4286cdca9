//! Collaborators of the conversion pipeline.
//!
//! Each submodule owns exactly one concern. The orchestrator in
//! [`crate::convert`] sequences them and is the only place that knows the
//! order; none of these modules depend on each other.
//!
//! ## Data Flow
//!
//! ```text
//! text ──▶ rate_limit ──▶ classify ──▶ llm ──▶ templates ──▶ rate_limit ──▶ llm ──▶ render
//!          (normalize)    (Markdown?)  (opt.)  (resolve)     (clean)        (clean)  (pandoc)
//!                                                                                       │
//!                                                               telemetry ◀─────────────┘
//! ```
//!
//! 1. [`rate_limit`] : per-client fixed-window caps, one table per stage
//! 2. [`classify`]   : cheap regex heuristic deciding whether text is
//!    already Markdown
//! 3. [`llm`]        : OpenAI-compatible chat completions with retry/backoff;
//!    used for both normalisation and cleaning
//! 4. [`templates`]  : template id → reference document, with fallback
//! 5. [`render`]     : external renderer in an isolated scratch directory
//! 6. [`telemetry`]  : usage log and usage counter, best-effort

pub mod classify;
pub mod llm;
pub mod rate_limit;
pub mod render;
pub mod telemetry;
pub mod templates;
