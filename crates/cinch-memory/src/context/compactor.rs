//! Two-tier compaction: verbatim recent turns, summarized older turns.
//!
//! History is split into a **recent tier** (last N messages, kept with full
//! fidelity) and an **older tier**, which is folded into one synthetic
//! user-role [`SummaryMessage`]. The split point always goes through
//! [`safe_split`], so the recent tier never opens on an orphaned tool result.

use crate::context::estimator::TokenEstimator;
use crate::context::integrity::safe_split;
use crate::context::summarizer::{ExtractiveSummarizer, Summarizer};
use crate::{Message, MessageRole};
use std::sync::Arc;

/// Leading text of every generated summary. Summarizers skip turns that
/// start with it so summaries never nest.
pub const SUMMARY_PREFIX: &str = "[Previous Conversation Summary";

/// Closing line of every generated summary.
const SUMMARY_SUFFIX: &str = "[End of Summary]";

/// A synthetic message standing in for a span of omitted turns.
///
/// Created fresh on every compaction and never stored by the engine; it
/// exists only in the returned history (and, optionally, as one mid-term
/// memory entry).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryMessage {
    /// Number of original messages this summary replaces.
    pub replaced: usize,
    /// Digest produced by the [`Summarizer`].
    pub digest: String,
}

impl SummaryMessage {
    /// Full message text: header tag, digest, closing line.
    pub fn content(&self) -> String {
        format!(
            "{SUMMARY_PREFIX} - {} messages compressed]\n{}\n{SUMMARY_SUFFIX}",
            self.replaced, self.digest
        )
    }

    pub fn to_message(&self) -> Message {
        Message::user(self.content())
    }

    /// True if `message` is a summary produced by this module.
    pub fn is_summary(message: &Message) -> bool {
        message.role == MessageRole::User && message.text().starts_with(SUMMARY_PREFIX)
    }
}

/// A history split into its two tiers.
#[derive(Debug, Clone, Copy)]
pub struct Tiers<'a> {
    pub older: &'a [Message],
    pub recent: &'a [Message],
}

/// Splits history into tiers and summarizes the older one.
#[derive(Clone)]
pub struct TierCompactor {
    summarizer: Arc<dyn Summarizer>,
}

impl Default for TierCompactor {
    fn default() -> Self {
        Self::new(Arc::new(ExtractiveSummarizer))
    }
}

impl std::fmt::Debug for TierCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCompactor").finish_non_exhaustive()
    }
}

impl TierCompactor {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }

    /// Split `messages` so the last `short_term_count` (adjusted to a safe
    /// boundary) form the recent tier.
    ///
    /// Returns `None` when there is nothing older to compact, or when the
    /// only safe boundary would leave the recent tier empty (the whole tail
    /// is one tool-call run).
    pub fn partition<'a>(
        &self,
        messages: &'a [Message],
        short_term_count: usize,
    ) -> Option<Tiers<'a>> {
        let proposed = messages.len().checked_sub(short_term_count).filter(|&p| p > 0)?;
        let split = safe_split(messages, proposed);
        if split >= messages.len() {
            return None;
        }
        let (older, recent) = messages.split_at(split);
        Some(Tiers { older, recent })
    }

    /// Reduce `older` to a single summary whose full message text stays
    /// within `target_tokens`, provided the summarizer honours its target.
    ///
    /// Returns `None` for an empty span.
    pub fn compact(
        &self,
        older: &[Message],
        target_tokens: usize,
        estimator: &TokenEstimator,
    ) -> Option<SummaryMessage> {
        if older.is_empty() {
            return None;
        }
        // The header and footer share the target with the digest.
        let wrapper = SummaryMessage {
            replaced: older.len(),
            digest: String::new(),
        };
        let overhead = estimator.estimate_text(&wrapper.content()) + 1;
        let digest = self.summarizer.summarize(
            older,
            target_tokens.saturating_sub(overhead),
            estimator,
        );
        Some(SummaryMessage {
            replaced: older.len(),
            digest,
        })
    }
}
