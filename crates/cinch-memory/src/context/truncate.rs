//! Tool payload truncation: cap oversized tool results with an omission marker.
//!
//! Tool results (query result dumps, execution logs) are usually the single
//! largest contributors to context volume. Truncating them keeps everything
//! except the tail of each payload, needs no model call, and leaves the
//! message structure untouched, so it is always the first reduction tried.

use crate::Message;

/// Per-result cap for the first, loose truncation pass.
pub const LOOSE_CAP_CHARS: usize = 10_000;

/// Per-result cap for the second, tight truncation pass.
pub const TIGHT_CAP_CHARS: usize = 5_000;

/// Leading text of the marker appended to truncated tool results.
///
/// Both the marker writer and [`is_truncated`] reference this constant so
/// they can't drift out of sync.
pub const TRUNCATED_PREFIX: &str = "[... Tool output truncated - ";

/// Marker appended to schema or data-context sections cut by
/// [`truncate_data_context`].
pub const DATA_CONTEXT_MARKER: &str = "... [Schema details truncated for length] ...";

/// Marker stating exactly how many characters were dropped.
pub fn truncation_marker(omitted_chars: usize) -> String {
    format!("\n\n{TRUNCATED_PREFIX}{omitted_chars} chars omitted]")
}

/// True if the content already carries a truncation marker.
pub fn is_truncated(content: &str) -> bool {
    content.contains(TRUNCATED_PREFIX)
}

/// Copy `messages`, capping every tool-role message whose content exceeds
/// `cap_chars` characters.
///
/// A capped result keeps its first `cap_chars` characters followed by
/// [`truncation_marker`]. All other messages, and every field other than
/// `content`, pass through unchanged.
pub fn truncate_tool_results(messages: &[Message], cap_chars: usize) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| {
            let mut out = msg.clone();
            if msg.is_tool()
                && let Some(content) = msg.content.as_deref()
                && let Some(capped) = cap_content(content, cap_chars)
            {
                out.content = Some(capped);
            }
            out
        })
        .collect()
}

/// Returns the capped content, or `None` if it already fits.
fn cap_content(content: &str, cap_chars: usize) -> Option<String> {
    let (cut, _) = content.char_indices().nth(cap_chars)?;
    let (head, tail) = content.split_at(cut);
    let omitted = tail.chars().count();
    Some(format!("{head}{}", truncation_marker(omitted)))
}

/// Truncate a large prompt section (e.g. a data-source schema dump) on line
/// boundaries.
///
/// Whole lines are kept while they fit within `max_chars`; once the next line
/// would overflow, [`DATA_CONTEXT_MARKER`] is appended and the rest dropped.
/// Text already within the limit is returned unchanged.
pub fn truncate_data_context(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut result = String::new();
    let mut used = 0;
    for line in text.split('\n') {
        let line_chars = line.chars().count();
        if used + line_chars > max_chars {
            result.push('\n');
            result.push_str(DATA_CONTEXT_MARKER);
            break;
        }
        result.push_str(line);
        result.push('\n');
        used += line_chars + 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn caps_oversized_tool_results() {
        let messages = vec![
            Message::user("dump the table"),
            Message::tool_result("c1", "a".repeat(12_000)),
        ];
        let out = truncate_tool_results(&messages, LOOSE_CAP_CHARS);

        let content = out[1].content.as_deref().unwrap();
        assert!(content.starts_with(&"a".repeat(10_000)));
        assert!(content.ends_with("2000 chars omitted]"));
        assert_eq!(
            content,
            format!("{}{}", "a".repeat(10_000), truncation_marker(2_000))
        );
        assert_eq!(out[1].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn leaves_small_and_non_tool_messages_alone() {
        let messages = vec![
            Message::user("u".repeat(20_000)),
            Message::assistant_text("v".repeat(20_000)),
            Message::tool_result("c1", "short"),
        ];
        let out = truncate_tool_results(&messages, 100);
        assert_eq!(out, messages);
    }

    #[test]
    fn exact_cap_is_not_truncated() {
        let messages = vec![Message::tool_result("c1", "x".repeat(100))];
        let out = truncate_tool_results(&messages, 100);
        assert_eq!(out, messages);
        assert!(!is_truncated(out[0].text()));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let messages = vec![Message::tool_result("c1", "é".repeat(50))];
        let out = truncate_tool_results(&messages, 10);
        let content = out[0].text();
        assert!(content.starts_with(&"é".repeat(10)));
        assert!(content.contains("40 chars omitted"));
        assert!(is_truncated(content));
    }

    #[test]
    fn preserves_tool_calls_and_metadata() {
        let mut meta = crate::Metadata::new();
        meta.insert("source".into(), "warehouse".into());
        let messages = vec![
            Message::assistant_tool_calls(vec![ToolCall::function("c1", "sql", "{}")]),
            Message::tool_result("c1", "r".repeat(50)).with_metadata(meta.clone()),
        ];
        let out = truncate_tool_results(&messages, 10);
        assert_eq!(out[0], messages[0]);
        assert_eq!(out[1].metadata, Some(meta));
    }

    #[test]
    fn data_context_within_limit_is_unchanged() {
        let text = "table orders\n  id int\n  total float";
        assert_eq!(truncate_data_context(text, 1000), text);
    }

    #[test]
    fn data_context_cuts_on_line_boundary() {
        let text = "line one\nline two\nline three\nline four";
        let out = truncate_data_context(text, 20);
        assert_eq!(out, format!("line one\nline two\n\n{DATA_CONTEXT_MARKER}"));
    }
}
