//! Sequence integrity: cut points and removals that keep tool calls paired.
//!
//! Chat APIs reject a history in which a tool-role message does not follow
//! the assistant turn that requested it. Every cut the engine makes goes
//! through this module so that an assistant tool-call turn and its tool
//! results are always kept or dropped together.
//!
//! The pairing rule: scanning backward from any tool-role message, an
//! assistant message carrying at least one tool call must be reached before
//! any other assistant message. See [`pairing_violation`].

use crate::{Message, MessageRole};
use std::collections::HashSet;

/// Adjust a proposed "keep before / keep after" cut so the "after" half
/// never opens on a tool result whose tool-call turn stays behind.
///
/// The "after" half is safe when its leading run of non-assistant messages
/// holds no tool result. Otherwise the index advances past the last tool
/// result in that run, keeping the run's results (and any turns interleaved
/// with them) in the "before" half with the assistant turn that issued them.
/// Indices at or outside the sequence bounds are returned unchanged.
pub fn safe_split(messages: &[Message], proposed: usize) -> usize {
    if proposed == 0 || proposed >= messages.len() {
        return proposed;
    }
    let run = leading_run(messages, proposed);
    match messages[run].iter().rposition(Message::is_tool) {
        Some(last) => proposed + last + 1,
        None => proposed,
    }
}

/// Start index for a "keep the last `window` messages" cut.
///
/// Starts at `len - window`. If the window would open on a run of
/// non-assistant messages containing a tool result, the start walks back to
/// the nearest preceding assistant turn (the one that issued those calls) so
/// the window opens on a clean turn boundary. When the tail is one tool-call
/// group longer than the window, the whole group is kept: pairing wins over
/// window size.
pub fn safe_recent_window(messages: &[Message], window: usize) -> usize {
    let Some(start) = messages.len().checked_sub(window) else {
        return 0;
    };
    if start >= messages.len() || !opens_on_tool_result(messages, start) {
        return start;
    }
    messages[..start]
        .iter()
        .rposition(|m| m.role == MessageRole::Assistant)
        .unwrap_or(0)
}

/// Range of the non-assistant messages starting at `from`.
fn leading_run(messages: &[Message], from: usize) -> std::ops::Range<usize> {
    let end = messages[from..]
        .iter()
        .position(|m| m.role == MessageRole::Assistant)
        .map_or(messages.len(), |offset| from + offset);
    from..end
}

/// True if `messages[from..]` would begin with an unpaired tool result.
fn opens_on_tool_result(messages: &[Message], from: usize) -> bool {
    messages[leading_run(messages, from)].iter().any(Message::is_tool)
}

/// Index of the first tool-role message that breaks the pairing rule, if any.
pub fn pairing_violation(messages: &[Message]) -> Option<usize> {
    let mut open_call = false;
    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            MessageRole::Assistant => open_call = msg.has_tool_calls(),
            MessageRole::Tool if !open_call => return Some(i),
            _ => {}
        }
    }
    None
}

/// True if every tool result is paired with a preceding tool-call turn.
pub fn is_well_paired(messages: &[Message]) -> bool {
    pairing_violation(messages).is_none()
}

/// Remove every assistant tool-call turn outside the last `keep_recent`
/// messages, together with all tool results that answer it.
///
/// Removal is atomic per group: the drop set is computed first, then the
/// output is built in one pass. A group whose tool results extend into the
/// protected tail is still removed whole.
pub fn strip_old_tool_groups(messages: &[Message], keep_recent: usize) -> Vec<Message> {
    let Some(cutoff) = messages.len().checked_sub(keep_recent).filter(|&c| c > 0) else {
        return messages.to_vec();
    };

    let mut drop: HashSet<usize> = HashSet::new();
    for (i, msg) in messages.iter().enumerate().take(cutoff) {
        if !msg.has_tool_calls() {
            continue;
        }
        drop.insert(i);
        for (j, follower) in messages.iter().enumerate().skip(i + 1) {
            match follower.role {
                MessageRole::Tool => {
                    drop.insert(j);
                }
                MessageRole::Assistant => break,
                _ => {}
            }
        }
    }

    messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, msg)| msg.clone())
        .collect()
}
