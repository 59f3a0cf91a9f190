//! # chainladder-agent
//!
//! Supervisor-routed multi-agent assistant for loss-reserving triangle
//! analysis.
//!
//! A user message enters a session, a reasoning capability decides which
//! registered specialist to call next, and the supervisor router loops
//! until a terminal capability answers, the reasoner replies directly, or
//! the depth limit is reached. Every step is committed to the session
//! transcript before the next decision.
//!
//! - [`session`]: per-conversation transcript and context variables
//! - [`capabilities`]: named, schema-checked handlers and their registry
//! - [`supervisor`]: the routing loop
//! - [`specialists`]: data, analysis, visualization and explanation agents
//! - [`chat`] / [`server`]: inbound request path and HTTP surface

pub mod capabilities;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod presentation;
pub mod server;
pub mod session;
pub mod specialists;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

pub use capabilities::{Capability, CapabilityRegistry, InputSchema};
pub use chat::{ChatRequest, ChatResponse, ChatService};
pub use config::DispatchConfig;
pub use error::{DispatchError, DispatchResult};
pub use session::{Message, Session, SessionStore};
pub use supervisor::{InboundRequest, RouterResponse, StopReason, SupervisorRouter};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
