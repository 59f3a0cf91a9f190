//! Capability Registry: name → capability lookup.
//!
//! The registry is filled once at startup and then shared read-only
//! (typically behind an `Arc`), so lookups need no locking. Registration
//! order is preserved for listing.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::capability::{Capability, CapabilityDescriptor, CapabilityHandler};
use super::schema::InputSchema;
use crate::error::{DispatchError, DispatchResult};

/// Names must be usable as function names by the hosted model.
static CAPABILITY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("capability name pattern is valid")
});

/// Registry of all known capabilities.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability from its parts.
    ///
    /// Fails with `DuplicateName` (leaving the registry unchanged) if the
    /// name is taken, or `InvalidName` if it is not a valid function name.
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        input_schema: InputSchema,
        handler: Arc<dyn CapabilityHandler>,
        terminal: bool,
    ) -> DispatchResult<()> {
        self.register_capability(Capability::new(
            name,
            description,
            input_schema,
            handler,
            terminal,
        ))
    }

    /// Register a fully built capability.
    pub fn register_capability(&mut self, capability: Capability) -> DispatchResult<()> {
        if !CAPABILITY_NAME.is_match(&capability.name) {
            return Err(DispatchError::InvalidName {
                name: capability.name,
            });
        }
        if self.capabilities.contains_key(&capability.name) {
            return Err(DispatchError::DuplicateName {
                name: capability.name,
            });
        }

        log::debug!(
            "Registered capability '{}' (terminal: {}, {} fields)",
            capability.name,
            capability.terminal,
            capability.input_schema.fields.len()
        );
        self.order.push(capability.name.clone());
        self.capabilities.insert(capability.name.clone(), capability);
        Ok(())
    }

    /// Look up a capability by name.
    pub fn resolve(&self, name: &str) -> DispatchResult<&Capability> {
        self.capabilities
            .get(name)
            .ok_or_else(|| DispatchError::Unregistered {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Descriptors in registration order, as advertised to the reasoning step.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(Capability::descriptor)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
