//! Conversation messages.
//!
//! A [`Message`] is one entry of a session transcript. Messages are
//! immutable once appended: [`Session`](super::Session) only hands out
//! shared references to them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Text typed by the end user.
    #[serde(rename = "user")]
    User,
    /// Text produced by the supervisor or by a specialist.
    #[serde(rename = "assistant")]
    Assistant,
    /// Raw output of a capability that is not meant as a reply.
    #[serde(rename = "tool-result")]
    ToolResult,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::ToolResult => write!(f, "tool-result"),
        }
    }
}

// ---------------------------------------------------------------------------
// Thinking annotation
// ---------------------------------------------------------------------------

/// Progress state of a collapsible "thinking" entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingStatus {
    Pending,
    Done,
}

/// Display hint for presentation sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingAnnotation {
    pub title: String,
    pub status: ThinkingStatus,
}

impl ThinkingAnnotation {
    pub fn pending(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: ThinkingStatus::Pending,
        }
    }

    pub fn done(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: ThinkingStatus::Done,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Structured metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Capability that produced the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Error kind tag (see [`DispatchError::kind`]) when the message reports a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Collapsible "thinking" display hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingAnnotation>,
}

/// One entry of a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with empty metadata.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::new(Role::ToolResult, content)
    }

    /// Assistant-visible message describing a dispatch error.
    pub fn error(err: &DispatchError) -> Self {
        Self::assistant(format!("Error: {}", err)).with_error_kind(err.kind())
    }

    /// Tag the message with the capability that produced it.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.metadata.capability = Some(capability.into());
        self
    }

    pub fn with_error_kind(mut self, kind: impl Into<String>) -> Self {
        self.metadata.error = Some(kind.into());
        self
    }

    pub fn with_thinking(mut self, thinking: ThinkingAnnotation) -> Self {
        self.metadata.thinking = Some(thinking);
        self
    }

    pub fn is_error(&self) -> bool {
        self.metadata.error.is_some()
    }

    pub fn capability(&self) -> Option<&str> {
        self.metadata.capability.as_deref()
    }
}
