//! Escalation controller: ordered reductions until the history fits.
//!
//! [`MemoryManager::manage_memory`] runs a strictly sequential state machine
//! with no backtracking:
//!
//! | Stage | Reduction |
//! |-------|-----------|
//! | [`Stage::Unchanged`] | Detach the system message; return as-is if within budget |
//! | [`Stage::LooseTruncate`] | Cap tool results at 10 000 chars |
//! | [`Stage::TightTruncate`] | Cap tool results at 5 000 chars |
//! | [`Stage::StripOldPairs`] | Drop tool-call groups outside the last 6 messages |
//! | [`Stage::TierSplit`] | Summarize the older tier, keep the recent tier verbatim |
//! | [`Stage::Floor`] | Keep only the last 4 messages (safe window) |
//!
//! Each stage is tried only while the estimate exceeds the budget. A stage
//! whose output would estimate larger than its input is discarded, so the
//! estimate never grows from one stage to the next. The floor always
//! terminates: it bounds output size but does not guarantee the budget.
//! Structural validity (tool results stay with their tool-call turn) takes
//! priority over budget compliance everywhere.

use crate::context::compactor::{SummaryMessage, TierCompactor};
use crate::context::config::MemoryConfig;
use crate::context::estimator::TokenEstimator;
use crate::context::integrity::{pairing_violation, safe_recent_window, strip_old_tool_groups};
use crate::context::summarizer::Summarizer;
use crate::context::truncate::{LOOSE_CAP_CHARS, TIGHT_CAP_CHARS, truncate_tool_results};
use crate::error::MemoryError;
use crate::persistence::PersistenceBridge;
use crate::{Message, MessageRole};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Messages outside this tail lose their tool-call groups in
/// [`Stage::StripOldPairs`].
const STRIP_KEEP_RECENT: usize = 6;

/// Tier compaction never shrinks the recent tier below this.
const MIN_SHORT_TERM: usize = 3;

/// Messages kept by [`Stage::Floor`].
const FLOOR_MESSAGES: usize = 4;

/// Reduction stages, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Unchanged,
    LooseTruncate,
    TightTruncate,
    StripOldPairs,
    TierSplit,
    Floor,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Unchanged => "unchanged",
            Stage::LooseTruncate => "loose_truncate",
            Stage::TightTruncate => "tight_truncate",
            Stage::StripOldPairs => "strip_old_pairs",
            Stage::TierSplit => "tier_split",
            Stage::Floor => "floor",
        };
        f.write_str(name)
    }
}

/// What a compaction call did, for logging and diagnostics.
///
/// Token counts exclude the detached system message.
#[derive(Debug, Clone)]
pub struct CompactionReport {
    /// Last stage whose output was kept.
    pub stage: Stage,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub original_count: usize,
    pub final_count: usize,
    /// Budget the history was reduced against.
    pub budget_tokens: usize,
    /// Estimate after every stage that ran, in order.
    pub stage_tokens: Vec<(Stage, usize)>,
    /// Summary produced by tier compaction, if that stage was kept.
    pub summary: Option<SummaryMessage>,
}

impl CompactionReport {
    pub fn within_budget(&self) -> bool {
        self.final_tokens <= self.budget_tokens
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "memory: {} -> {} messages, ~{} -> ~{} tokens (budget {}, stage {})",
            self.original_count,
            self.final_count,
            self.original_tokens,
            self.final_tokens,
            self.budget_tokens,
            self.stage,
        )
    }
}

/// The compaction engine.
///
/// Holds only immutable collaborators (the summarizer and an optional
/// persistence bridge); configuration is passed per call. A single instance
/// can be shared across threads and reused for every request.
#[derive(Debug, Clone, Default)]
pub struct MemoryManager {
    compactor: TierCompactor,
    persistence: Option<PersistenceBridge>,
}

impl MemoryManager {
    /// Engine with the extractive summarizer and no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the summarizer used by tier compaction.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.compactor = TierCompactor::new(summarizer);
        self
    }

    /// Forward generated summaries to a mid-term memory store.
    pub fn with_persistence(mut self, bridge: PersistenceBridge) -> Self {
        self.persistence = Some(bridge);
        self
    }

    /// Estimate tokens for `messages` using `config`'s ratio.
    pub fn estimate_tokens(&self, messages: &[Message], config: &MemoryConfig) -> usize {
        config.estimator().estimate(messages)
    }

    /// Reduce `messages` to fit `config`'s budget.
    ///
    /// Errors only when `config` is invalid; every compaction outcome,
    /// including the floor, is a success.
    pub fn manage_memory(
        &self,
        messages: Vec<Message>,
        config: &MemoryConfig,
    ) -> Result<Vec<Message>, MemoryError> {
        self.manage_with_report(messages, config)
            .map(|(messages, _)| messages)
    }

    /// Like [`manage_memory`](Self::manage_memory), also returning what was done.
    pub fn manage_with_report(
        &self,
        mut messages: Vec<Message>,
        config: &MemoryConfig,
    ) -> Result<(Vec<Message>, CompactionReport), MemoryError> {
        config.validate()?;

        let estimator = config.estimator();
        let budget = config.budget_tokens();

        let system = if messages
            .first()
            .is_some_and(|m| m.role == MessageRole::System)
        {
            Some(messages.remove(0))
        } else {
            None
        };

        if let Some(index) = pairing_violation(&messages) {
            warn!("input history has an unpaired tool result at index {index}");
        }

        let original_count = messages.len();
        let mut run = Escalation::new(messages, estimator, budget);

        let fits = run.fits() || {
            // Both truncation passes cap the entry history, so each marker
            // counts characters omitted from the original payload.
            let entry = run.current.clone();
            run.try_stage(
                Stage::LooseTruncate,
                truncate_tool_results(&entry, LOOSE_CAP_CHARS),
            ) || run.try_stage(
                Stage::TightTruncate,
                truncate_tool_results(&entry, TIGHT_CAP_CHARS),
            ) || {
                let stripped = strip_old_tool_groups(&run.current, STRIP_KEEP_RECENT);
                run.try_stage(Stage::StripOldPairs, stripped)
            } || self.tier_stage(&mut run, config.short_term_count)
        };

        if !fits {
            let start = safe_recent_window(&run.current, FLOOR_MESSAGES);
            let floor = run.current[start..].to_vec();
            run.try_stage(Stage::Floor, floor);
        }

        if let (Some(bridge), Some(summary)) = (&self.persistence, &run.summary) {
            bridge.persist(&summary.digest);
        }

        let report = CompactionReport {
            stage: run.stage,
            original_tokens: run.original_tokens,
            final_tokens: run.tokens,
            original_count,
            final_count: run.current.len(),
            budget_tokens: budget,
            stage_tokens: run.stage_tokens,
            summary: run.summary,
        };

        if report.stage != Stage::Unchanged {
            info!("{}", report.to_log_string());
        }

        let mut output = run.current;
        if let Some(system) = system {
            output.insert(0, system);
        }
        Ok((output, report))
    }

    /// Tier compaction with progressively tighter recent tiers.
    ///
    /// Every attempt starts from the same pre-compaction history. The first
    /// attempt that fits is kept; otherwise the smallest candidate is offered
    /// to the escalation and the floor takes over.
    fn tier_stage(&self, run: &mut Escalation, short_term_count: usize) -> bool {
        let mut best: Option<(Vec<Message>, SummaryMessage, usize)> = None;
        let mut short_term = Some(short_term_count);

        while let Some(count) = short_term {
            if let Some((candidate, summary)) =
                self.compact_tiers(&run.current, count, run.budget, &run.estimator)
            {
                let tokens = run.estimator.estimate(&candidate);
                debug!("tier split with {count} recent messages: ~{tokens} tokens");
                let improves = best.as_ref().is_none_or(|(_, _, t)| tokens < *t);
                if improves {
                    best = Some((candidate, summary, tokens));
                }
                if tokens <= run.budget {
                    break;
                }
            }
            short_term = tighter(count);
        }

        let Some((candidate, summary, _)) = best else {
            run.record(Stage::TierSplit);
            return false;
        };
        if run.offer(Stage::TierSplit, candidate) {
            run.summary = Some(summary);
        }
        run.fits()
    }

    /// One tier split. If the recent tier alone exceeds the budget, recurse
    /// on the recent tier with a smaller short-term count instead of
    /// summarizing turns that recent. Returns `None` once that bottoms out.
    fn compact_tiers(
        &self,
        messages: &[Message],
        short_term_count: usize,
        budget: usize,
        estimator: &TokenEstimator,
    ) -> Option<(Vec<Message>, SummaryMessage)> {
        let tiers = self.compactor.partition(messages, short_term_count)?;
        let recent_tokens = estimator.estimate(tiers.recent);

        if recent_tokens >= budget {
            let next = tighter(short_term_count)?;
            trace!("recent tier ~{recent_tokens} tokens exceeds budget {budget}, retrying with {next}");
            return self.compact_tiers(tiers.recent, next, budget, estimator);
        }

        let summary = self
            .compactor
            .compact(tiers.older, budget - recent_tokens, estimator)?;

        let mut output = Vec::with_capacity(1 + tiers.recent.len());
        output.push(summary.to_message());
        output.extend_from_slice(tiers.recent);
        Some((output, summary))
    }
}

/// Next smaller short-term count, or `None` at the minimum.
fn tighter(short_term_count: usize) -> Option<usize> {
    let next = (short_term_count / 2).max(MIN_SHORT_TERM);
    (next < short_term_count).then_some(next)
}

/// Reduce `messages` with a default [`MemoryManager`].
pub fn manage_memory(
    messages: Vec<Message>,
    config: &MemoryConfig,
) -> Result<Vec<Message>, MemoryError> {
    MemoryManager::new().manage_memory(messages, config)
}

/// Mutable state of one escalation run.
struct Escalation {
    current: Vec<Message>,
    tokens: usize,
    original_tokens: usize,
    stage: Stage,
    stage_tokens: Vec<(Stage, usize)>,
    summary: Option<SummaryMessage>,
    estimator: TokenEstimator,
    budget: usize,
}

impl Escalation {
    fn new(messages: Vec<Message>, estimator: TokenEstimator, budget: usize) -> Self {
        let tokens = estimator.estimate(&messages);
        debug!("memory entry: {} messages, ~{tokens} tokens, budget {budget}", messages.len());
        Self {
            current: messages,
            tokens,
            original_tokens: tokens,
            stage: Stage::Unchanged,
            stage_tokens: vec![(Stage::Unchanged, tokens)],
            summary: None,
            estimator,
            budget,
        }
    }

    fn fits(&self) -> bool {
        self.tokens <= self.budget
    }

    /// Offer one stage's output and report whether the history now fits.
    fn try_stage(&mut self, stage: Stage, candidate: Vec<Message>) -> bool {
        self.offer(stage, candidate);
        self.fits()
    }

    /// Keep `candidate` unless it would grow the estimate. The reported
    /// stage only advances when the candidate differs from the current one.
    fn offer(&mut self, stage: Stage, candidate: Vec<Message>) -> bool {
        let tokens = self.estimator.estimate(&candidate);
        let accepted = tokens <= self.tokens;
        if accepted {
            if tokens < self.tokens || candidate != self.current {
                self.stage = stage;
            }
            self.current = candidate;
            self.tokens = tokens;
        } else {
            trace!("{stage} discarded: ~{tokens} tokens > ~{}", self.tokens);
        }
        self.record(stage);
        accepted
    }

    fn record(&mut self, stage: Stage) {
        debug!("{stage}: ~{} tokens", self.tokens);
        self.stage_tokens.push((stage, self.tokens));
    }
}
