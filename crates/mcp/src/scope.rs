//! Scoped ownership of the tool servers used by one run.

use std::future::Future;
use std::sync::Arc;

use chartwise_core::capability::ToolHandle;
use chartwise_core::error::{LaunchError, RegistryError};
use futures::future::join_all;
use tracing::{info, warn};

use crate::connector::{ToolServerConnector, ToolServerSpec};
use crate::registry::ToolRegistry;

/// A set of started connectors that are stopped together.
///
/// Dropping the scope without calling [`stop_all`](Self::stop_all) still
/// tears the processes down through each connector's `Drop`, but without
/// waiting for them.
pub struct ServerScope {
    connectors: Vec<Arc<ToolServerConnector>>,
}

impl ServerScope {
    /// Start every server concurrently.
    ///
    /// If any of them fails, the ones that did start are stopped and the
    /// first failure (in the order given) is returned.
    pub async fn start_all(specs: &[ToolServerSpec]) -> Result<Self, LaunchError> {
        let results = join_all(specs.iter().cloned().map(ToolServerConnector::start)).await;

        let mut connectors = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(connector) => connectors.push(connector),
                Err(e) => {
                    warn!(error = %e, "Tool server failed to launch");
                    first_error.get_or_insert(e);
                }
            }
        }

        let scope = Self { connectors };
        if let Some(e) = first_error {
            scope.stop_all().await;
            return Err(e);
        }

        info!(servers = scope.connectors.len(), "Tool servers started");
        Ok(scope)
    }

    /// Start the servers, run `body`, and stop the servers whatever `body`
    /// returned.
    pub async fn run<F, Fut, T>(specs: &[ToolServerSpec], body: F) -> Result<T, LaunchError>
    where
        F: FnOnce(Vec<Arc<ToolServerConnector>>) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = Self::start_all(specs).await?;
        let output = body(scope.connectors.clone()).await;
        scope.stop_all().await;
        Ok(output)
    }

    pub fn connectors(&self) -> &[Arc<ToolServerConnector>] {
        &self.connectors
    }

    /// Stop every connector and wait for all of them.
    pub async fn stop_all(&self) {
        join_all(self.connectors.iter().map(|c| c.stop())).await;
    }
}

/// Build a registry from connectors, in the given order.
///
/// Every non-colliding capability is registered; the first collision is
/// returned after all connectors were processed.
pub fn build_registry(
    connectors: &[Arc<ToolServerConnector>],
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    let mut collision = None;
    for connector in connectors {
        let handle: Arc<dyn ToolHandle> = connector.clone();
        if let Err(e) = registry.register(handle, connector.list_capabilities()) {
            collision.get_or_insert(e);
        }
    }
    match collision {
        Some(e) => Err(e),
        None => Ok(registry),
    }
}
