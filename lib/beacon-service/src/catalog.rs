//! Read-side cache of discovered services
//!
//! The catalog mirrors the registry's view of every admitted service and
//! keeps it current through registry subscriptions. Services outside the
//! configured `includes` filter are never watched. A service that drops out
//! of the registry's listing is unsubscribed unless a caller watches it
//! through [`ServiceCatalog::watch`].

use beacon_core::{
    CoreError, NodesCallback, Result, ServiceListCallback, ServiceNode, ServiceRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ServiceFilter, ServiceOptions};

#[derive(Default)]
struct Listeners {
    lists: Vec<ServiceListCallback>,
    nodes: HashMap<String, Vec<NodesCallback>>,
}

struct Inner<R: ServiceRegistry + ?Sized> {
    registry: Arc<R>,
    filter: ServiceFilter,
    // Map of service name to its current nodes
    services: RwLock<HashMap<String, Vec<ServiceNode>>>,
    listeners: RwLock<Listeners>,
    // Services with a live node subscription, keyed to that subscription's generation.
    // Registry callbacks from an older generation are ignored.
    watched: Mutex<HashMap<String, u64>>,
    next_generation: AtomicU64,
}

impl<R: ServiceRegistry + ?Sized + 'static> Inner<R> {
    fn names(&self) -> Vec<String> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    // Updates from a subscription that is no longer current are dropped
    fn update_nodes(&self, service: &str, generation: u64, nodes: Vec<ServiceNode>) {
        {
            let watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
            if watched.get(service) != Some(&generation) {
                return;
            }
            let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
            if nodes.is_empty() {
                services.remove(service);
            } else {
                services.insert(service.to_string(), nodes.clone());
            }
        }

        let listeners = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners.nodes.get(service).cloned().unwrap_or_default()
        };
        debug!("Service {} now has {} nodes", service, nodes.len());
        for listener in listeners {
            listener(nodes.clone());
        }
    }

    async fn watch_nodes(self: &Arc<Self>, service: &str) -> Result<()> {
        let generation = {
            let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
            if watched.contains_key(service) {
                return Ok(());
            }
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            watched.insert(service.to_string(), generation);
            generation
        };

        let inner = Arc::downgrade(self);
        let name = service.to_string();
        let callback: NodesCallback = Arc::new(move |nodes| {
            if let Some(inner) = inner.upgrade() {
                inner.update_nodes(&name, generation, nodes);
            }
        });

        if let Err(e) = self.registry.watch_service(service, callback).await {
            self.unwatch(service, generation);
            return Err(e);
        }
        Ok(())
    }

    fn unwatch(&self, service: &str, generation: u64) {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        if watched.get(service) == Some(&generation) {
            watched.remove(service);
        }
    }

    async fn apply_service_list(self: &Arc<Self>, names: Vec<String>) {
        let admitted: Vec<String> = names
            .into_iter()
            .filter(|name| self.filter.admits(name))
            .collect();

        // Services that left the list lose their subscription unless explicitly watched.
        // A later listing subscribes afresh and reloads their nodes.
        {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped: Vec<String> = watched
                .keys()
                .filter(|name| !admitted.contains(*name) && !listeners.nodes.contains_key(*name))
                .cloned()
                .collect();
            if !dropped.is_empty() {
                let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
                for name in &dropped {
                    watched.remove(name);
                    services.remove(name);
                }
                debug!("Stopped watching services {:?}", dropped);
            }
        }

        for name in &admitted {
            if let Err(e) = self.watch_nodes(name).await {
                warn!(service = %name, error = %e, "Failed to watch service nodes");
            }
        }

        let listeners = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners.lists.clone()
        };
        for listener in listeners {
            listener(admitted.clone());
        }
    }
}

/// ServiceCatalog maintains the nodes of every discovered service
pub struct ServiceCatalog<R: ServiceRegistry + ?Sized + 'static> {
    inner: Arc<Inner<R>>,
    retry_interval: Duration,
    following: AtomicBool,
    cancel: CancellationToken,
}

impl<R: ServiceRegistry + ?Sized + 'static> ServiceCatalog<R> {
    pub fn new(registry: Arc<R>, filter: ServiceFilter, retry_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                filter,
                services: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Listeners::default()),
                watched: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
            retry_interval,
            following: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_options(registry: Arc<R>, options: &ServiceOptions) -> Self {
        Self::new(registry, options.service.clone(), options.retry_interval())
    }

    /// Load the catalog and subscribe to registry changes.
    ///
    /// Retries at the fixed interval until the registry answers; only
    /// [`shutdown`](Self::shutdown) ends the loop early.
    pub async fn init(&self) -> Result<()> {
        loop {
            match self.load().await {
                Ok(()) => {
                    info!("Service catalog initialized with {} services", self.inner.names().len());
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Unable to initialize service catalog, retrying in {:?}", self.retry_interval);
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CoreError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    async fn load(&self) -> Result<()> {
        let names = self.inner.registry.service_names().await?;
        self.inner.apply_service_list(names).await;

        if self.following.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ServiceListCallback = Arc::new(move |names| {
            // The follower is gone once the catalog shuts down
            let _ = tx.send(names);
        });
        self.inner.registry.watch_service_list(callback).await?;
        self.following.store(true, Ordering::SeqCst);

        tokio::spawn(follow_service_list(
            self.inner.clone(),
            rx,
            self.cancel.clone(),
        ));
        Ok(())
    }

    /// Stop following the registry and abort a pending [`init`](Self::init)
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Names of all admitted services with at least one node
    pub fn service_names(&self) -> Vec<String> {
        self.inner.names()
    }

    pub fn services(&self) -> HashMap<String, Vec<ServiceNode>> {
        self.inner
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nodes of `service`, optionally only those passing their health checks
    pub fn service_nodes(&self, service: &str, passing_only: bool) -> Vec<ServiceNode> {
        let services = self.inner.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .get(service)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|n| !passing_only || n.is_passing())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Be notified whenever the nodes of `service` change
    pub async fn watch(&self, service: &str, callback: NodesCallback) -> Result<()> {
        if !self.inner.filter.admits(service) {
            warn!(service = %service, "Service is not included, ignoring watch");
            return Ok(());
        }

        {
            let mut listeners = self.inner.listeners.write().unwrap_or_else(PoisonError::into_inner);
            listeners
                .nodes
                .entry(service.to_string())
                .or_default()
                .push(callback);
        }
        self.inner.watch_nodes(service).await
    }

    /// Be notified whenever the set of admitted services changes
    pub fn watch_service_list(&self, callback: ServiceListCallback) {
        let mut listeners = self.inner.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.lists.push(callback);
    }
}

impl<R: ServiceRegistry + ?Sized + 'static> Drop for ServiceCatalog<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn follow_service_list<R: ServiceRegistry + ?Sized + 'static>(
    inner: Arc<Inner<R>>,
    mut rx: mpsc::UnboundedReceiver<Vec<String>>,
    cancel: CancellationToken,
) {
    loop {
        let names = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            names = rx.recv() => match names {
                Some(names) => names,
                None => break,
            },
        };
        inner.apply_service_list(names).await;
    }
    debug!("Stopped following service list");
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::memory::Operation;
    use beacon_core::{HealthStatus, MemoryRegistry, ServiceDescriptor};
    use std::sync::Mutex as StdMutex;

    use crate::DescriptorFactory;

    fn descriptor(name: &str, port: u16) -> ServiceDescriptor {
        let mut options = ServiceOptions::new(name);
        options.discovery_host = Some("10.0.0.5".to_string());
        options.port = Some(port);
        DescriptorFactory::new(options).build()
    }

    fn filter(includes: &[&str]) -> ServiceFilter {
        ServiceFilter {
            includes: includes.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_init_loads_admitted_services() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register(&descriptor("users", 31000)).await.unwrap();
        registry.register(&descriptor("users", 31001)).await.unwrap();
        registry.register(&descriptor("billing", 32000)).await.unwrap();

        let catalog = ServiceCatalog::new(registry, filter(&["users"]), Duration::from_millis(100));
        catalog.init().await.unwrap();

        assert_eq!(catalog.service_names(), vec!["users".to_string()]);
        assert_eq!(catalog.service_nodes("users", false).len(), 2);
        assert!(catalog.service_nodes("billing", false).is_empty());
    }

    #[tokio::test]
    async fn test_passing_only_filter() {
        let registry = Arc::new(MemoryRegistry::new());
        let healthy = descriptor("users", 31000);
        let sick = descriptor("users", 31001);
        registry.register(&healthy).await.unwrap();
        registry.register(&sick).await.unwrap();

        let catalog = ServiceCatalog::new(registry.clone(), ServiceFilter::default(), Duration::from_millis(100));
        catalog.init().await.unwrap();
        registry.set_status(&sick.id, HealthStatus::Critical).await.unwrap();

        let passing = catalog.service_nodes("users", true);
        assert_eq!(passing.len(), 1);
        assert_eq!(passing[0].id, healthy.id);
        assert_eq!(catalog.service_nodes("users", false).len(), 2);
    }

    #[tokio::test]
    async fn test_follows_registry_changes() {
        let registry = Arc::new(MemoryRegistry::new());
        let catalog = ServiceCatalog::new(registry.clone(), ServiceFilter::default(), Duration::from_millis(100));
        catalog.init().await.unwrap();
        settle().await;

        let lists = Arc::new(StdMutex::new(Vec::new()));
        let sink = lists.clone();
        catalog.watch_service_list(Arc::new(move |names| sink.lock().unwrap().push(names)));

        let orders = descriptor("orders", 33000);
        registry.register(&orders).await.unwrap();
        settle().await;
        assert_eq!(catalog.service_names(), vec!["orders".to_string()]);

        registry.deregister(&orders).await.unwrap();
        settle().await;
        assert!(catalog.service_names().is_empty());
        assert_eq!(
            *lists.lock().unwrap(),
            vec![vec!["orders".to_string()], vec![]]
        );
    }

    #[tokio::test]
    async fn test_reregistration_before_list_catches_up() {
        let registry = Arc::new(MemoryRegistry::new());
        let orders = descriptor("orders", 33000);
        registry.register(&orders).await.unwrap();

        let catalog = ServiceCatalog::new(registry.clone(), ServiceFilter::default(), Duration::from_millis(100));
        catalog.init().await.unwrap();
        settle().await;

        registry.deregister(&orders).await.unwrap();
        registry.register(&orders).await.unwrap();
        settle().await;

        assert_eq!(registry.service_nodes("orders").await.unwrap().len(), 1);
        assert_eq!(catalog.service_nodes("orders", false).len(), 1);

        registry.set_status(&orders.id, HealthStatus::Critical).await.unwrap();
        assert!(catalog.service_nodes("orders", true).is_empty());
    }

    #[tokio::test]
    async fn test_departed_services_are_unsubscribed() {
        let registry = Arc::new(MemoryRegistry::new());
        let catalog = ServiceCatalog::new(registry.clone(), ServiceFilter::default(), Duration::from_millis(100));
        catalog.init().await.unwrap();
        catalog
            .watch("users", Arc::new(|_| {}))
            .await
            .unwrap();

        for port in 34000..34005 {
            let short_lived = descriptor(&format!("job-{}", port), port);
            registry.register(&short_lived).await.unwrap();
            settle().await;
            registry.deregister(&short_lived).await.unwrap();
            settle().await;
        }

        let watched = catalog.inner.watched.lock().unwrap();
        assert_eq!(watched.keys().collect::<Vec<_>>(), vec!["users"]);
        assert!(catalog.service_names().is_empty());
    }

    #[tokio::test]
    async fn test_watch_nodes_of_one_service() {
        let registry = Arc::new(MemoryRegistry::new());
        let catalog = ServiceCatalog::new(registry.clone(), filter(&["users"]), Duration::from_millis(100));
        catalog.init().await.unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        catalog
            .watch("users", Arc::new(move |nodes| sink.lock().unwrap().push(nodes.len())))
            .await
            .unwrap();
        catalog
            .watch("billing", Arc::new(|_| panic!("billing is not included")))
            .await
            .unwrap();

        registry.register(&descriptor("users", 31000)).await.unwrap();
        registry.register(&descriptor("billing", 32000)).await.unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert!(catalog.services().get("billing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_retries_until_registry_answers() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.fail_next(3);
        let catalog = ServiceCatalog::new(registry.clone(), ServiceFilter::default(), Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        catalog.init().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(registry.calls(Operation::Query), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_init() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_reachable(false);
        let catalog = Arc::new(ServiceCatalog::new(registry, ServiceFilter::default(), Duration::from_millis(100)));

        let task = tokio::spawn({
            let catalog = catalog.clone();
            async move { catalog.init().await }
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        catalog.shutdown();

        assert!(matches!(task.await.unwrap(), Err(CoreError::Cancelled)));
    }
}
