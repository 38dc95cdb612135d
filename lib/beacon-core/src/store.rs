//! Collaborator seams for the remote key-value store and service registry
//!
//! Implementations own their connection and must be safe to share between
//! tasks: the binding orchestrator, the lifecycle manager and the catalog
//! all call into the same instance concurrently.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{Result, ServiceDescriptor, ServiceNode};

/// Invoked with the raw value at a path; `None` when the key is absent
pub type ValueCallback = Arc<dyn Fn(Option<String>) + Send + Sync>;

/// Invoked with the current set of service names
pub type ServiceListCallback = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Invoked with the current nodes of one service
pub type NodesCallback = Arc<dyn Fn(Vec<ServiceNode>) + Send + Sync>;

/// Remote key-value store holding configuration values
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value at `path`
    async fn get(&self, path: &str) -> Result<Option<String>>;

    /// Subscribe to changes at `path`.
    ///
    /// The callback fires on every observed change, including the first
    /// observed value.
    async fn watch(&self, path: &str, callback: ValueCallback) -> Result<()>;

    /// Read the raw value at `path`, falling back to `default` when absent
    async fn get_or(&self, path: &str, default: Option<String>) -> Result<Option<String>> {
        Ok(self.get(path).await?.or(default))
    }
}

/// Remote service registry
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    async fn deregister(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    /// Names of all services currently known to the registry
    async fn service_names(&self) -> Result<Vec<String>>;

    /// All nodes registered under `service`
    async fn service_nodes(&self, service: &str) -> Result<Vec<ServiceNode>>;

    /// Subscribe to changes in the set of service names
    async fn watch_service_list(&self, callback: ServiceListCallback) -> Result<()>;

    /// Subscribe to changes in the nodes of `service`
    async fn watch_service(&self, service: &str, callback: NodesCallback) -> Result<()>;
}
