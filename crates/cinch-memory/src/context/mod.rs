//! Context window management: estimation, truncation, integrity, compaction.
//!
//! The context window is the scarcest resource in any tool-using agent. This
//! module provides the layered reductions the [`escalation`] controller applies
//! before each request:
//!
//! 1. **[`truncate`]**: caps oversized tool results with an explicit
//!    omission marker. Cheapest reduction, tried first.
//!
//! 2. **[`integrity`]**: computes cut points that never separate an
//!    assistant tool-call turn from its tool results.
//!
//! 3. **[`compactor`]**: splits history into a verbatim recent tier and an
//!    older tier, and folds the older tier into one summary message via a
//!    pluggable [`Summarizer`](summarizer::Summarizer).
//!
//! 4. **[`escalation`]**: runs the strategies in order until the budget is
//!    met or the floor is reached.
//!
//! Token counts everywhere come from the [`estimator`], a character-ratio
//! approximation rather than a real tokenizer.

pub mod compactor;
pub mod config;
pub mod escalation;
pub mod estimator;
pub mod integrity;
pub mod summarizer;
pub mod truncate;

pub use config::{DEFAULT_CHARS_PER_TOKEN, MemoryConfig};
pub use estimator::TokenEstimator;
