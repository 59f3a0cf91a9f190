//! Response consolidation.
//!
//! When a caller wants a single answer instead of the transcript, the
//! longest informative assistant message of the request wins. This is a
//! known simplification: a shorter but more relevant final answer can
//! lose against a long intermediate one. Callers that need the terminal
//! message use the router's plain response text instead.

use crate::session::{Message, Role};

/// Text returned when a request produced nothing usable.
pub const NO_RESPONSE_TEXT: &str = "I couldn't generate a proper response. Please try again.";

const MIN_INFORMATIVE_CHARS: usize = 20;

/// Whether `content` is worth showing as the consolidated answer.
///
/// Placeholders (`...`), very short fragments and hand-off chatter are not.
pub fn is_informative(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed != "..."
        && trimmed.chars().count() > MIN_INFORMATIVE_CHARS
        && !trimmed.to_lowercase().contains("transferring")
}

/// Longest informative assistant message; the first one wins ties.
pub fn longest_informative(messages: &[Message]) -> Option<&Message> {
    messages
        .iter()
        .filter(|m| m.role == Role::Assistant && is_informative(&m.content))
        .fold(None, |best: Option<&Message>, m| match best {
            Some(b) if b.content.chars().count() >= m.content.chars().count() => Some(b),
            _ => Some(m),
        })
}

/// Single answer for the messages produced by one request.
///
/// Falls back to the last produced message, then to [`NO_RESPONSE_TEXT`].
pub fn consolidate(produced: &[Message]) -> String {
    longest_informative(produced)
        .or_else(|| produced.iter().rev().find(|m| m.role != Role::User))
        .map(|m| m.content.clone())
        .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string())
}
