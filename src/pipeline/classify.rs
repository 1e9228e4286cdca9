//! Markdown heuristic: decide whether input already is Markdown.
//!
//! A cheap, explainable gate in front of the normalisation LLM call. Each
//! structural signal adds to a score; a score of 2 or more means "Markdown".
//! False negatives only cost one extra LLM call, so the thresholds err on the
//! side of "not Markdown".
//!
//! | Signal | Points |
//! |--------|--------|
//! | code fence or `---` rule | 2 |
//! | ≥3 heading lines / 1–2 heading lines | 2 / 1 |
//! | ≥5 list lines making up >40 % of lines | 1 |
//! | ≥2 inline links `[text](url)` | 1 |
//! | ≥2 pipe-table rows | 1 |

use once_cell::sync::Lazy;
use regex::Regex;

/// Score at or above which text is treated as Markdown.
pub const MARKDOWN_THRESHOLD: u32 = 2;

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ {0,3}#{1,6}[ \t]+").unwrap());

static RE_LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ {0,3}(?:[-*+][ \t]+|\d+\.[ \t]+)").unwrap());

static RE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]+\]\([^)]+\)").unwrap());

static RE_TABLE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*\|.*\|[ \t]*$").unwrap());

/// Outcome of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkdownVerdict {
    pub is_markdown: bool,
    pub score: u32,
}

/// Score `text` against the structural signals above. Pure; never fails.
pub fn classify(text: &str) -> MarkdownVerdict {
    let normalised = text.replace("\r\n", "\n");
    let trimmed = normalised.trim();
    if trimmed.is_empty() {
        return MarkdownVerdict {
            is_markdown: false,
            score: 0,
        };
    }

    let line_count = trimmed.split('\n').count().max(1);
    let mut score = 0;

    if trimmed.contains("```") || trimmed.contains("---\n") {
        score += 2;
    }

    let headings = RE_HEADING.find_iter(trimmed).count();
    if headings >= 3 {
        score += 2;
    } else if headings > 0 {
        score += 1;
    }

    let list_items = RE_LIST_ITEM.find_iter(trimmed).count();
    if list_items >= 5 && list_items as f64 / line_count as f64 > 0.4 {
        score += 1;
    }

    if RE_LINK.find_iter(trimmed).count() >= 2 {
        score += 1;
    }

    if RE_TABLE_ROW.find_iter(trimmed).count() >= 2 {
        score += 1;
    }

    MarkdownVerdict {
        is_markdown: score >= MARKDOWN_THRESHOLD,
        score,
    }
}

/// Shorthand for `classify(text).is_markdown`.
pub fn is_markdown(text: &str) -> bool {
    classify(text).is_markdown
}
