//! The reasoning boundary: the external capability that picks the next step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::{Arguments, CapabilityDescriptor};
use crate::error::HandlerError;
use crate::session::Message;

/// Everything the reasoning capability sees when deciding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub message_history: Vec<Message>,
    pub available_capabilities: Vec<CapabilityDescriptor>,
    /// Session context variables at decision time.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ReasoningRequest {
    /// The most recent user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.message_history
            .iter()
            .rev()
            .find(|m| m.role == crate::session::Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Answer of the reasoning capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReasoningResponse {
    Final {
        text: String,
    },
    Delegate {
        capability: String,
        #[serde(default)]
        arguments: Arguments,
    },
}

impl ReasoningResponse {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self::Final { text: text.into() }
    }

    pub fn delegate(capability: impl Into<String>, arguments: Arguments) -> Self {
        Self::Delegate {
            capability: capability.into(),
            arguments,
        }
    }
}

/// Decides the next routing step.
///
/// Implementations may call out to a hosted model; the router bounds each
/// call with a timeout and validates whatever comes back.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn decide(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, HandlerError>;
}

/// One routing step, recomputed from session state every time.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Invoke {
        capability: String,
        arguments: Arguments,
    },
    Respond {
        text: String,
    },
    Terminate,
}

impl From<ReasoningResponse> for RoutingDecision {
    fn from(response: ReasoningResponse) -> Self {
        match response {
            ReasoningResponse::Final { text } if text.trim().is_empty() => RoutingDecision::Terminate,
            ReasoningResponse::Final { text } => RoutingDecision::Respond { text },
            ReasoningResponse::Delegate {
                capability,
                arguments,
            } => RoutingDecision::Invoke {
                capability,
                arguments,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let resp: ReasoningResponse =
            serde_json::from_value(json!({"kind": "delegate", "capability": "echo", "arguments": {"text": "hi"}}))
                .unwrap();
        assert_eq!(
            resp,
            ReasoningResponse::delegate("echo", json!({"text": "hi"}).as_object().cloned().unwrap())
        );

        let resp: ReasoningResponse =
            serde_json::from_value(json!({"kind": "final", "text": "done"})).unwrap();
        assert_eq!(resp, ReasoningResponse::final_text("done"));
    }

    #[test]
    fn test_blank_final_terminates() {
        assert_eq!(
            RoutingDecision::from(ReasoningResponse::final_text("  ")),
            RoutingDecision::Terminate
        );
        assert_eq!(
            RoutingDecision::from(ReasoningResponse::final_text("hi")),
            RoutingDecision::Respond { text: "hi".into() }
        );
    }

    #[test]
    fn test_last_user_text() {
        let req = ReasoningRequest {
            message_history: vec![
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
                Message::assistant("more"),
            ],
            available_capabilities: vec![],
            context: BTreeMap::new(),
        };
        assert_eq!(req.last_user_text(), Some("second"));
    }
}
