//! Error types for the dispatch core.
//!
//! Every failure that can happen while answering a request is one of the
//! [`DispatchError`] variants. Most of them never reach the caller as an
//! `Err`: the supervisor router converts them into a visible
//! [`Message`](crate::session::Message) tagged with [`DispatchError::kind`].

use thiserror::Error;

/// Error returned by capability handlers and the reasoning capability.
///
/// Handlers wrap whatever their upstream call produced; the router only
/// needs the display text.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the session store, the capability registry and the
/// supervisor router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A strict lookup asked for a session that does not exist.
    #[error("Session not found: {session_key}")]
    NotFound { session_key: String },

    /// A capability with this name is already registered.
    #[error("Capability '{name}' is already registered")]
    DuplicateName { name: String },

    /// The capability name cannot be exposed as a function name.
    #[error("Invalid capability name '{name}': expected 1-64 characters of [A-Za-z0-9_-]")]
    InvalidName { name: String },

    /// No capability with this name is registered.
    #[error("Capability '{name}' is not registered")]
    Unregistered { name: String },

    /// Proposed arguments do not match the capability's input schema.
    #[error("Invalid arguments for '{capability}': field '{field}' {reason}")]
    SchemaViolation {
        capability: String,
        field: String,
        reason: String,
    },

    /// The capability handler failed or timed out.
    #[error("Capability '{capability}' failed: {message}")]
    HandlerFailure { capability: String, message: String },

    /// The routing chain hit `max_depth` while a capability still asked to continue.
    #[error("Routing depth limit of {max_depth} reached")]
    DepthExceeded { max_depth: usize },

    /// The reasoning capability failed or timed out.
    #[error("Routing decision failed: {message}")]
    ReasoningFailure { message: String },

    /// The caller cancelled the request between routing steps.
    #[error("Request for session '{session_key}' was cancelled")]
    Cancelled { session_key: String },

    /// The session still has requests routing on it.
    #[error("Session '{session_key}' has requests in flight")]
    Busy { session_key: String },

    /// Invalid service configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DispatchError {
    /// Stable snake_case tag stored in message metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::InvalidName { .. } => "invalid_name",
            Self::Unregistered { .. } => "unregistered",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::HandlerFailure { .. } => "handler_failure",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::ReasoningFailure { .. } => "reasoning_failure",
            Self::Cancelled { .. } => "cancelled",
            Self::Busy { .. } => "busy",
            Self::Config(_) => "config",
        }
    }

    /// Build a `SchemaViolation`.
    pub fn schema_violation(
        capability: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            capability: capability.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for the dispatch core.
pub type DispatchResult<T> = Result<T, DispatchError>;
