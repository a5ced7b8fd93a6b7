//! Lossless JSON round-trip of a full message history.
//!
//! The wire shape is a JSON array of [`Message`] objects in the
//! function-calling layout. Tool-call argument text and caller metadata are
//! carried through byte for byte.

use crate::Message;
use crate::error::StateError;

/// Encode `messages` as a JSON array.
pub fn serialize_state(messages: &[Message]) -> Result<String, StateError> {
    serde_json::to_string(messages).map_err(StateError::Encode)
}

/// Decode a JSON array produced by [`serialize_state`].
pub fn deserialize_state(data: &str) -> Result<Vec<Message>, StateError> {
    serde_json::from_str(data).map_err(StateError::Malformed)
}
