//! Conversation-context compaction for tool-using LLM agents.
//!
//! `cinch-memory` keeps a multi-turn conversation, including interleaved
//! tool-call / tool-result exchanges, inside a fixed token budget before each
//! model invocation. It never calls back into the model: every reduction is a
//! deterministic transformation of the message list.
//!
//! The entry point is [`MemoryManager`](context::escalation::MemoryManager),
//! which runs an ordered escalation of strategies until the history fits:
//!
//! 1. loose truncation of oversized tool results (10 000 chars),
//! 2. tight truncation (5 000 chars),
//! 3. stripping of old tool-call / tool-result groups,
//! 4. tiered compaction of older turns into one summary message,
//! 5. a hard floor that keeps only the most recent turns.
//!
//! A leading system message is detached before any reduction and reattached
//! unmodified. An assistant turn that issues tool calls is never separated
//! from its tool results, at any stage.
//!
//! # Example
//!
//! ```
//! use cinch_memory::{Message, MemoryConfig, MemoryManager};
//!
//! let config = MemoryConfig::default().with_max_tokens(20_000);
//! let manager = MemoryManager::new();
//!
//! let history = vec![
//!     Message::system("You are a data analyst."),
//!     Message::user("How many orders shipped last week?"),
//!     Message::assistant_text("1 204 orders shipped."),
//! ];
//!
//! let compacted = manager.manage_memory(history.clone(), &config).unwrap();
//! assert_eq!(compacted, history);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Token estimation, configuration, truncation, sequence integrity, summarization, tier compaction, escalation |
//! | [`persistence`] | Best-effort hand-off of generated summaries to a mid-term memory store |
//! | [`state`] | Lossless JSON round-trip of the full message history |
//! | [`error`] | Typed errors for configuration and state decoding |

pub mod context;
pub mod error;
pub mod persistence;
pub mod state;

use serde::{Deserialize, Serialize};

pub use context::compactor::{SUMMARY_PREFIX, SummaryMessage, TierCompactor};
pub use context::config::MemoryConfig;
pub use context::escalation::{CompactionReport, MemoryManager, Stage, manage_memory};
pub use context::estimator::{TokenEstimator, estimate_tokens};
pub use context::summarizer::{ExtractiveSummarizer, Summarizer};
pub use error::{MemoryError, StateError};
pub use persistence::{FileMidTermStore, InMemoryMidTermStore, MidTermStore, PersistenceBridge};
pub use state::{deserialize_state, serialize_state};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Opaque caller-owned fields carried on a message. Never read by the engine.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Back-reference to the [`ToolCall::id`] a tool-role message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Message {
    fn new(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            metadata: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, Some(content.into()))
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(MessageRole::Assistant, None)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, Some(content.into()))
        }
    }

    /// Attach caller metadata. The engine carries it through untouched.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Message text, or `""` for turns that carry only tool calls.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// True for an assistant turn that issues at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant
            && self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    pub fn is_tool(&self) -> bool {
        self.role == MessageRole::Tool
    }
}

// ── Tool call types ────────────────────────────────────────────────

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call issued by the model on an assistant turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Create a function-calling tool call.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    /// Raw JSON argument text, exactly as the model produced it.
    pub arguments: String,
}
