//! Summarization capability used by tier compaction.
//!
//! [`Summarizer`] is the seam where a model-backed implementation can replace
//! the default [`ExtractiveSummarizer`] without touching the escalation
//! controller. The extractive default never calls a model: it lifts recent
//! user questions and assistant findings verbatim (trimmed), so it adds no
//! latency or cost and cannot fabricate anything that was not said.

use crate::context::compactor::SUMMARY_PREFIX;
use crate::context::estimator::TokenEstimator;
use crate::{Message, MessageRole};
use std::fmt::Write;

/// Marker appended when a digest is cut to fit its budget.
pub const SUMMARY_TRUNCATED_MARKER: &str = "[Summary truncated]";

/// Maximum characters kept from each user turn.
const USER_TURN_CHARS: usize = 200;
/// Maximum characters kept from each assistant turn.
const ASSISTANT_TURN_CHARS: usize = 300;
/// Most recent user questions listed in a digest.
const MAX_QUESTIONS: usize = 5;
/// Most recent assistant findings listed in a digest.
const MAX_FINDINGS: usize = 3;
/// Per-message content cap in [`format_messages_for_summary`].
const TRANSCRIPT_CONTENT_CHARS: usize = 1000;

/// Produces a digest of omitted turns.
///
/// Implementations must be synchronous and must keep the result within
/// roughly `target_tokens` as measured by `estimator`. The digest is wrapped
/// into a [`SummaryMessage`](crate::SummaryMessage) by the caller.
pub trait Summarizer: Send + Sync {
    fn summarize(
        &self,
        messages: &[Message],
        target_tokens: usize,
        estimator: &TokenEstimator,
    ) -> String;
}

/// Deterministic, non-model digest of user questions and assistant findings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveSummarizer;

impl Summarizer for ExtractiveSummarizer {
    fn summarize(
        &self,
        messages: &[Message],
        target_tokens: usize,
        estimator: &TokenEstimator,
    ) -> String {
        let mut questions = Vec::new();
        let mut findings = Vec::new();

        for msg in messages {
            let content = msg.text().trim();
            if content.is_empty() || content.starts_with(SUMMARY_PREFIX) {
                continue;
            }
            match msg.role {
                MessageRole::User => questions.push(clip(content, USER_TURN_CHARS)),
                MessageRole::Assistant => findings.push(clip(content, ASSISTANT_TURN_CHARS)),
                MessageRole::System | MessageRole::Tool => {}
            }
        }

        let mut digest = String::new();
        if !questions.is_empty() {
            digest.push_str("User asked about:\n");
            write_recent(&mut digest, &questions, MAX_QUESTIONS, "questions");
            digest.push('\n');
        }
        if !findings.is_empty() {
            digest.push_str("Key findings:\n");
            write_recent(&mut digest, &findings, MAX_FINDINGS, "findings");
        }

        fit_to_chars(digest, estimator.chars_for_tokens(target_tokens))
    }
}

/// Write the last `keep` items as bullets, preceded by an omission count when
/// earlier items were dropped.
fn write_recent(out: &mut String, items: &[String], keep: usize, noun: &str) {
    let omitted = items.len().saturating_sub(keep);
    if omitted > 0 {
        let _ = writeln!(out, "... [{omitted} earlier {noun} omitted] ...");
    }
    for item in items.iter().skip(omitted) {
        let _ = writeln!(out, "- {item}");
    }
}

/// Keep the first `max_chars` characters, marking the cut with `...`.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let (head, _) = text.split_at(cut);
            format!("{head}...")
        }
        None => text.to_string(),
    }
}

/// Hard-truncate a digest to `max_chars`, cutting on the nearest preceding
/// line boundary and appending [`SUMMARY_TRUNCATED_MARKER`]. The marker counts
/// toward the limit; below its length the digest is empty.
fn fit_to_chars(digest: String, max_chars: usize) -> String {
    if digest.chars().count() <= max_chars {
        return digest;
    }
    let room = max_chars.saturating_sub(SUMMARY_TRUNCATED_MARKER.len() + 1);
    let head = match digest.char_indices().nth(room) {
        Some((cut, _)) => digest.split_at(cut).0,
        None => digest.as_str(),
    };
    let head = match head.rfind('\n') {
        Some(newline) => head.split_at(newline).0,
        None => head,
    };
    if head.is_empty() {
        if SUMMARY_TRUNCATED_MARKER.len() <= max_chars {
            SUMMARY_TRUNCATED_MARKER.to_string()
        } else {
            String::new()
        }
    } else {
        format!("{head}\n{SUMMARY_TRUNCATED_MARKER}")
    }
}

/// Render messages as a numbered transcript, the input a model-backed
/// [`Summarizer`] would send to its model.
///
/// Content is capped at 1000 characters per message; tool-call turns list
/// the tools they invoked.
pub fn format_messages_for_summary(messages: &[Message]) -> String {
    let mut output = String::new();
    for (i, msg) in messages.iter().enumerate() {
        let role = match msg.role {
            MessageRole::System => "System",
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
            MessageRole::Tool => "Tool",
        };
        let _ = write!(output, "{}. {role}: ", i + 1);

        let content = msg.text();
        if !content.is_empty() {
            match content.char_indices().nth(TRANSCRIPT_CONTENT_CHARS) {
                Some((cut, _)) => {
                    let _ = write!(output, "{}... [truncated]", content.split_at(cut).0);
                }
                None => output.push_str(content),
            }
        }
        output.push('\n');

        if let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) {
            let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
            let _ = writeln!(output, "  [Tools used: {}]", names.join(", "));
        }
        output.push('\n');
    }
    output
}
