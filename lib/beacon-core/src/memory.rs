//! In-process registry backing both the key-value store and service registry seams
//!
//! Used by tests and by local agents that run without a remote registry.
//! Faults can be injected to simulate an unreachable registry.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::debug;

use crate::{
    CheckStatus, CoreError, HealthStatus, KeyValueStore, NodesCallback, Result, ServiceDescriptor,
    ServiceListCallback, ServiceNode, ServiceRegistry, ValueCallback,
};

/// Registry operations, tracked for call counting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Watch,
    Register,
    Deregister,
    Query,
}

/// A registered instance and its current health
#[derive(Clone, Debug)]
struct Instance {
    descriptor: ServiceDescriptor,
    status: HealthStatus,
}

#[derive(Default)]
struct State {
    values: HashMap<String, String>,
    // Map of service id to instance
    instances: HashMap<String, Instance>,
    value_watchers: HashMap<String, Vec<ValueCallback>>,
    node_watchers: HashMap<String, Vec<NodesCallback>>,
    list_watchers: Vec<ServiceListCallback>,
}

impl State {
    fn service_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .instances
            .values()
            .map(|i| i.descriptor.name.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    fn nodes(&self, service: &str) -> Vec<ServiceNode> {
        let mut nodes: Vec<ServiceNode> = self
            .instances
            .values()
            .filter(|i| i.descriptor.name == service)
            .map(|i| ServiceNode {
                id: i.descriptor.id.clone(),
                service: i.descriptor.name.clone(),
                address: i.descriptor.address.clone(),
                port: i.descriptor.port,
                tags: i.descriptor.tags.iter().cloned().collect(),
                status: i.status,
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

/// MemoryRegistry keeps values and service instances in memory
pub struct MemoryRegistry {
    state: Arc<RwLock<State>>,
    // Held from a value write until its watchers are notified, so they see writes in order
    value_notify: AsyncMutex<()>,
    reachable: AtomicBool,
    failures_pending: AtomicUsize,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            value_notify: AsyncMutex::new(()),
            reachable: AtomicBool::new(true),
            failures_pending: AtomicUsize::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry pre-populated with key-value pairs
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let state = State {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..State::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            ..Self::new()
        }
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make the next `count` calls fail regardless of reachability
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of calls made for an operation, failed ones included
    pub fn calls(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Store a value and notify watchers of `path`
    pub async fn put(&self, path: &str, value: impl Into<String>) {
        let value = value.into();
        let _serial = self.value_notify.lock().await;
        let watchers = {
            let mut state = self.state.write().await;
            state.values.insert(path.to_string(), value.clone());
            state.value_watchers.get(path).cloned().unwrap_or_default()
        };

        debug!("Stored value at {}", path);
        for watcher in watchers {
            watcher(Some(value.clone()));
        }
    }

    /// Remove a value and notify watchers of `path`
    pub async fn delete(&self, path: &str) {
        let _serial = self.value_notify.lock().await;
        let watchers = {
            let mut state = self.state.write().await;
            state.values.remove(path);
            state.value_watchers.get(path).cloned().unwrap_or_default()
        };

        debug!("Deleted value at {}", path);
        for watcher in watchers {
            watcher(None);
        }
    }

    /// Update the health of a registered instance
    pub async fn set_status(&self, service_id: &str, status: HealthStatus) -> Result<()> {
        let (nodes, watchers) = {
            let mut state = self.state.write().await;
            let instance = state
                .instances
                .get_mut(service_id)
                .ok_or_else(|| CoreError::ServiceNotFound(service_id.to_string()))?;
            instance.status = status;
            let name = instance.descriptor.name.clone();
            (
                state.nodes(&name),
                state.node_watchers.get(&name).cloned().unwrap_or_default(),
            )
        };

        for watcher in watchers {
            watcher(nodes.clone());
        }
        Ok(())
    }

    /// Look up a registered instance by id
    pub async fn registered(&self, service_id: &str) -> Option<ServiceDescriptor> {
        let state = self.state.read().await;
        state
            .instances
            .get(service_id)
            .map(|i| i.descriptor.clone())
    }

    /// Get count of registered instances
    pub async fn instance_count(&self) -> usize {
        let state = self.state.read().await;
        state.instances.len()
    }

    fn attempt(&self, operation: Operation) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(CoreError::StoreUnavailable(format!(
                "{:?}: registry unreachable",
                operation
            )));
        }

        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CoreError::StoreUnavailable(format!(
                "{:?}: injected failure",
                operation
            )));
        }

        Ok(())
    }

    async fn notify_service(&self, service: &str, list_changed: bool) {
        let (names, nodes, list_watchers, node_watchers) = {
            let state = self.state.read().await;
            (
                state.service_names(),
                state.nodes(service),
                if list_changed {
                    state.list_watchers.clone()
                } else {
                    Vec::new()
                },
                state.node_watchers.get(service).cloned().unwrap_or_default(),
            )
        };

        for watcher in list_watchers {
            watcher(names.clone());
        }
        for watcher in node_watchers {
            watcher(nodes.clone());
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryRegistry {
    async fn get(&self, path: &str) -> Result<Option<String>> {
        self.attempt(Operation::Get)?;
        let state = self.state.read().await;
        Ok(state.values.get(path).cloned())
    }

    async fn watch(&self, path: &str, callback: ValueCallback) -> Result<()> {
        self.attempt(Operation::Watch)?;
        let _serial = self.value_notify.lock().await;
        let current = {
            let mut state = self.state.write().await;
            state
                .value_watchers
                .entry(path.to_string())
                .or_default()
                .push(callback.clone());
            state.values.get(path).cloned()
        };

        // The first observed value is delivered immediately
        if current.is_some() {
            callback(current);
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        self.attempt(Operation::Register)?;
        let list_changed = {
            let mut state = self.state.write().await;
            let known = state
                .instances
                .values()
                .any(|i| i.descriptor.name == descriptor.name);
            // No probing happens in memory, so instances start passing unless told otherwise
            let status = match descriptor.check.status {
                Some(CheckStatus::Warning) => HealthStatus::Warning,
                Some(CheckStatus::Critical) => HealthStatus::Critical,
                Some(CheckStatus::Passing) | None => HealthStatus::Passing,
            };
            state.instances.insert(
                descriptor.id.clone(),
                Instance {
                    descriptor: descriptor.clone(),
                    status,
                },
            );
            !known
        };

        debug!("Registered instance {} of {}", descriptor.id, descriptor.name);
        self.notify_service(&descriptor.name, list_changed).await;
        Ok(())
    }

    async fn deregister(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        self.attempt(Operation::Deregister)?;
        let (removed, list_changed) = {
            let mut state = self.state.write().await;
            let removed = state.instances.remove(&descriptor.id).is_some();
            let still_known = state
                .instances
                .values()
                .any(|i| i.descriptor.name == descriptor.name);
            (removed, removed && !still_known)
        };

        if removed {
            debug!("Deregistered instance {} of {}", descriptor.id, descriptor.name);
            self.notify_service(&descriptor.name, list_changed).await;
        } else {
            debug!("Instance {} was not registered", descriptor.id);
        }
        Ok(())
    }

    async fn service_names(&self) -> Result<Vec<String>> {
        self.attempt(Operation::Query)?;
        let state = self.state.read().await;
        Ok(state.service_names())
    }

    async fn service_nodes(&self, service: &str) -> Result<Vec<ServiceNode>> {
        self.attempt(Operation::Query)?;
        let state = self.state.read().await;
        Ok(state.nodes(service))
    }

    async fn watch_service_list(&self, callback: ServiceListCallback) -> Result<()> {
        self.attempt(Operation::Watch)?;
        let names = {
            let mut state = self.state.write().await;
            state.list_watchers.push(callback.clone());
            state.service_names()
        };
        callback(names);
        Ok(())
    }

    async fn watch_service(&self, service: &str, callback: NodesCallback) -> Result<()> {
        self.attempt(Operation::Watch)?;
        let nodes = {
            let mut state = self.state.write().await;
            state
                .node_watchers
                .entry(service.to_string())
                .or_default()
                .push(callback.clone());
            state.nodes(service)
        };
        callback(nodes);
        Ok(())
    }
}
