//! # Capability Registry
//!
//! Capabilities are the named units of work the supervisor can delegate to.
//! Each one declares an input schema and whether its result ends routing.
//!
//! ## Lifecycle
//!
//! 1. At startup, build a [`CapabilityRegistry`] and `register` every capability
//! 2. Wrap it in an `Arc` and hand it to the supervisor router
//! 3. From then on the registry is read-only: `resolve` and `descriptors` only

pub mod capability;
pub mod registry;
pub mod schema;

pub use capability::{
    Capability, CapabilityContext, CapabilityDescriptor, CapabilityHandler, CapabilityOutput,
    FnHandler, HandlerFn,
};
pub use registry::CapabilityRegistry;
pub use schema::{Arguments, FieldSpec, FieldType, InputSchema};
