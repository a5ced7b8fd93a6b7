//! Error types surfaced at the crate boundary.
//!
//! Compaction degradation is never an error. Only a configuration that
//! bypassed [`MemoryConfig::new`](crate::MemoryConfig::new) normalization, or
//! malformed serialized state, is reported to the caller.

/// Returned by [`MemoryManager::manage_memory`](crate::MemoryManager::manage_memory)
/// when the supplied configuration cannot produce a budget.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MemoryError {
    #[error("invalid memory config: {field} {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
}

/// Returned by the [`state`](crate::state) codec.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The input was not a JSON array of messages.
    #[error("malformed message state: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode message state: {0}")]
    Encode(#[source] serde_json::Error),
}
