//! Presentation sinks.
//!
//! A sink receives display-ready messages as routing progresses: a pending
//! "thinking" entry before each capability invocation, then every message
//! the router commits. Sinks are observers only and cannot influence routing.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::{Message, ThinkingStatus};

/// Consumer of display-ready messages.
pub trait PresentationSink: Send + Sync {
    fn emit(&self, session_key: &str, message: &Message);
}

/// Sink that writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn emit(&self, session_key: &str, message: &Message) {
        match &message.metadata.thinking {
            Some(t) if t.status == ThinkingStatus::Pending => {
                log::info!("[{}] {} ...", session_key, t.title);
            }
            Some(t) => {
                log::info!("[{}] {}: {}", session_key, t.title, preview(&message.content));
            }
            None => {
                log::info!(
                    "[{}] {}: {}",
                    session_key,
                    message.role,
                    preview(&message.content)
                );
            }
        }
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 120;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let cut: String = content.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

/// Sink that records everything it receives, in order.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    entries: Arc<Mutex<Vec<(String, Message)>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages emitted for `session_key`, oldest first.
    pub fn messages_for(&self, session_key: &str) -> Vec<Message> {
        self.entries
            .lock()
            .iter()
            .filter(|(key, _)| key == session_key)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl PresentationSink for CollectingSink {
    fn emit(&self, session_key: &str, message: &Message) {
        self.entries
            .lock()
            .push((session_key.to_string(), message.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ThinkingAnnotation;

    #[test]
    fn test_collecting_sink_filters_by_session() {
        let sink = CollectingSink::new();
        sink.emit("a", &Message::assistant("one"));
        sink.emit("b", &Message::assistant("two"));
        sink.emit(
            "a",
            &Message::assistant("").with_thinking(ThinkingAnnotation::pending("Calling x")),
        );

        let a = sink.messages_for("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].content, "one");
        assert_eq!(
            a[1].metadata.thinking.as_ref().map(|t| t.status),
            Some(ThinkingStatus::Pending)
        );
        assert_eq!(sink.len(), 3);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_preview_truncates_long_content() {
        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 123);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
