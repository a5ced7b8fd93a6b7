//! Per-call compaction parameters.
//!
//! [`MemoryConfig`] is an immutable value passed to every
//! [`manage_memory`](crate::MemoryManager::manage_memory) call. Constructors
//! normalize out-of-range inputs to safe defaults so a compaction call almost
//! never errors; [`MemoryConfig::validate`] catches values assembled by hand.

use crate::context::estimator::TokenEstimator;
use crate::error::MemoryError;
use tracing::debug;

/// Default characters per token. Conservative: real tokenizers average 3-4
/// chars per token on English text, and data-heavy tool output runs lower.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.0;

/// Default number of recent messages kept verbatim.
pub const DEFAULT_SHORT_TERM_COUNT: usize = 5;

/// Default share of the budget withheld for the response and system prompt.
pub const DEFAULT_RESERVE_PERCENT: u8 = 20;

/// Context window assumed for modern models.
const LARGE_CONTEXT_WINDOW: usize = 128_000;

/// Context window assumed when the output limit suggests a small model.
const SMALL_CONTEXT_WINDOW: usize = 32_000;

/// Output limits below this indicate a small-context model.
const SMALL_MODEL_OUTPUT_LIMIT: i64 = 8192;

/// Output reserve used when no output limit is configured.
const DEFAULT_OUTPUT_RESERVE: usize = 8192;

/// The input budget never drops below this many tokens.
const MIN_INPUT_TOKENS: usize = 10_000;

/// Compaction parameters.
///
/// # Example
///
/// ```
/// use cinch_memory::MemoryConfig;
///
/// let config = MemoryConfig::for_output_limit(4096)
///     .with_short_term_count(8)
///     .with_reserve_percent(25);
///
/// // 32k window (small model) minus the 4096-token output reserve.
/// assert_eq!(config.max_tokens, 27_904);
/// assert_eq!(config.budget_tokens(), 27_904 * 75 / 100);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryConfig {
    /// Input budget before the reserve is withheld. Default: `119_808`.
    pub max_tokens: usize,
    /// Messages always kept verbatim by tier compaction. Default: `5`.
    pub short_term_count: usize,
    /// Percentage of `max_tokens` withheld (0-100). Default: `20`.
    pub reserve_percent: u8,
    /// Characters per estimated token (> 0). Default: `3.0`.
    pub chars_per_token: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::for_output_limit(0)
    }
}

impl MemoryConfig {
    /// Build a config, normalizing every out-of-range value to its default.
    pub fn new(
        max_tokens: i64,
        short_term_count: usize,
        reserve_percent: i64,
        chars_per_token: f64,
    ) -> Self {
        let defaults = Self::default();
        Self {
            max_tokens: normalize_max_tokens(max_tokens, defaults.max_tokens),
            short_term_count,
            reserve_percent: normalize_reserve(reserve_percent),
            chars_per_token: normalize_ratio(chars_per_token),
        }
    }

    /// Derive the input budget from a model's per-response output limit.
    ///
    /// Assumes a 128k context window, or 32k when the output limit is below
    /// 8192 tokens. The output limit (8192 when unset or negative) is
    /// subtracted, and the result never drops below 10k tokens.
    pub fn for_output_limit(output_max_tokens: i64) -> Self {
        let window = if output_max_tokens > 0 && output_max_tokens < SMALL_MODEL_OUTPUT_LIMIT {
            SMALL_CONTEXT_WINDOW
        } else {
            LARGE_CONTEXT_WINDOW
        };
        let output_reserve = usize::try_from(output_max_tokens)
            .ok()
            .filter(|&t| t > 0)
            .unwrap_or(DEFAULT_OUTPUT_RESERVE);
        let available = window.saturating_sub(output_reserve).max(MIN_INPUT_TOKENS);

        Self {
            max_tokens: available,
            short_term_count: DEFAULT_SHORT_TERM_COUNT,
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Override the input budget. Zero is normalized to the default.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = if max_tokens == 0 {
            let default = Self::default().max_tokens;
            debug!("max_tokens 0 out of range, using {default}");
            default
        } else {
            max_tokens
        };
        self
    }

    pub fn with_short_term_count(mut self, count: usize) -> Self {
        self.short_term_count = count;
        self
    }

    /// Set the withheld percentage, clamped to 0-100.
    pub fn with_reserve_percent(mut self, percent: i64) -> Self {
        self.reserve_percent = normalize_reserve(percent);
        self
    }

    /// Set the estimation ratio. Non-finite or non-positive values fall back
    /// to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn with_chars_per_token(mut self, ratio: f64) -> Self {
        self.chars_per_token = normalize_ratio(ratio);
        self
    }

    /// Tokens the compacted history may occupy: `max_tokens` minus the reserve.
    pub fn budget_tokens(&self) -> usize {
        let keep = 100 - usize::from(self.reserve_percent.min(100));
        self.max_tokens.saturating_mul(keep) / 100
    }

    pub fn estimator(&self) -> TokenEstimator {
        TokenEstimator::new(self.chars_per_token)
    }

    /// Reject values that bypassed constructor normalization.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if !(self.chars_per_token.is_finite() && self.chars_per_token > 0.0) {
            return Err(MemoryError::InvalidConfig {
                field: "chars_per_token",
                reason: format!("must be a positive number, got {}", self.chars_per_token),
            });
        }
        if self.reserve_percent > 100 {
            return Err(MemoryError::InvalidConfig {
                field: "reserve_percent",
                reason: format!("must be at most 100, got {}", self.reserve_percent),
            });
        }
        if self.max_tokens == 0 {
            return Err(MemoryError::InvalidConfig {
                field: "max_tokens",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn normalize_max_tokens(value: i64, default: usize) -> usize {
    match usize::try_from(value) {
        Ok(v) if v > 0 => v,
        _ => {
            debug!("max_tokens {value} out of range, using {default}");
            default
        }
    }
}

fn normalize_reserve(value: i64) -> u8 {
    let clamped = value.clamp(0, 100);
    if clamped != value {
        debug!("reserve_percent {value} clamped to {clamped}");
    }
    clamped as u8
}

fn normalize_ratio(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        debug!("chars_per_token {value} invalid, using {DEFAULT_CHARS_PER_TOKEN}");
        DEFAULT_CHARS_PER_TOKEN
    }
}
