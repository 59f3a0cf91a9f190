//! # Supervisor Router
//!
//! Decides, step by step, whether to delegate a request to a registered
//! capability or to answer directly, and when to stop.
//!
//! - [`reasoning`]: the external decision-maker boundary
//! - [`router`]: the bounded routing state machine
//! - [`consolidate`]: single-answer selection for callers that want one
//! - [`cancel`]: cooperative cancellation between steps

pub mod cancel;
pub mod consolidate;
pub mod reasoning;
pub mod router;

pub use cancel::CancelFlag;
pub use consolidate::{consolidate, is_informative, NO_RESPONSE_TEXT};
pub use reasoning::{ReasoningCapability, ReasoningRequest, ReasoningResponse, RoutingDecision};
pub use router::{
    InboundRequest, RouterConfig, RouterResponse, StopReason, SupervisorRouter, ACTIVE_CAPABILITY,
};
