//! Aggregated capability namespace across all connected tool providers.
//!
//! The registry is built once per run and then shared read-only; it is the
//! only path the agent loop uses to reach a provider.

use std::collections::HashMap;
use std::sync::Arc;

use chartwise_core::capability::{
    CapabilityDescriptor, InvocationRequest, InvocationResult, ToolHandle,
};
use chartwise_core::error::RegistryError;
use tracing::{debug, warn};

/// Maps capability names to the provider that serves them.
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Arc<dyn ToolHandle>>,
    descriptors: Vec<CapabilityDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptors` as served by `handle`.
    ///
    /// The first registration of a name wins. Colliding names are skipped,
    /// the rest of the batch is still registered, and the first collision
    /// is returned as an error.
    pub fn register(
        &mut self,
        handle: Arc<dyn ToolHandle>,
        descriptors: &[CapabilityDescriptor],
    ) -> Result<(), RegistryError> {
        let mut collision = None;

        for descriptor in descriptors {
            if let Some(existing) = self.entries.get(&descriptor.name) {
                let err = RegistryError::NameCollision {
                    name: descriptor.name.clone(),
                    existing: existing.server_name().to_string(),
                    rejected: handle.server_name().to_string(),
                };
                warn!(%err, "Capability name collision");
                collision.get_or_insert(err);
                continue;
            }

            debug!(capability = %descriptor.name, server = %handle.server_name(), "Registered capability");
            self.entries.insert(descriptor.name.clone(), handle.clone());
            self.descriptors.push(descriptor.clone());
        }

        collision.map_or(Ok(()), Err)
    }

    /// Register every capability the handle advertises.
    pub fn register_handle(&mut self, handle: Arc<dyn ToolHandle>) -> Result<(), RegistryError> {
        let descriptors = handle.capabilities().to_vec();
        self.register(handle, &descriptors)
    }

    /// Look up the provider serving `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandle>, RegistryError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))
    }

    /// Resolve then delegate.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResult, RegistryError> {
        let handle = self.resolve(&request.capability)?;
        Ok(handle.invoke(request).await)
    }

    /// Descriptors in registration order.
    pub fn definitions(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
