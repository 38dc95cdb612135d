//! Resolution and live subscription of configuration bindings

use beacon_core::{coerce, KeyValueStore, ValueCallback};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{BindingCell, BindingKey, ConfigBinding};

struct Entry {
    binding: ConfigBinding,
    cell: BindingCell,
}

/// Outcome of [`ConfigOrchestrator::activate`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Bindings whose subscription and initial read both succeeded
    pub activated: usize,
    /// Paths for which a store call failed
    pub failed: Vec<String>,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// ConfigOrchestrator owns all bindings and keeps their cells in sync with the store
pub struct ConfigOrchestrator<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    entries: RwLock<HashMap<BindingKey, Entry>>,
    activated: AtomicBool,
}

impl<S: KeyValueStore + ?Sized> ConfigOrchestrator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            activated: AtomicBool::new(false),
        }
    }

    /// Declare bindings for `owner`, returning one cell per binding.
    ///
    /// Re-declaring an existing key replaces its definition but keeps the
    /// cell, so handles returned earlier stay valid.
    pub async fn add_bindings<I>(&self, owner: &str, bindings: I) -> Vec<BindingCell>
    where
        I: IntoIterator<Item = ConfigBinding>,
    {
        let late = self.activated.load(Ordering::SeqCst);
        let mut entries = self.entries.write().await;
        bindings
            .into_iter()
            .map(|binding| {
                let key = BindingKey::new(&binding, owner);
                if late {
                    warn!("Binding {} declared after activation, it will not be populated", key);
                } else {
                    debug!("Declared binding {}", key);
                }
                match entries.get_mut(&key) {
                    Some(entry) => {
                        entry.binding = binding;
                        entry.cell.clone()
                    }
                    None => {
                        let cell = BindingCell::new();
                        entries.insert(
                            key,
                            Entry {
                                binding,
                                cell: cell.clone(),
                            },
                        );
                        cell
                    }
                }
            })
            .collect()
    }

    /// Declare bindings owned by type `T`
    pub async fn add_bindings_for<T: ?Sized, I>(&self, bindings: I) -> Vec<BindingCell>
    where
        I: IntoIterator<Item = ConfigBinding>,
    {
        self.add_bindings(std::any::type_name::<T>(), bindings).await
    }

    /// Look up the cell of a declared binding
    pub async fn cell(&self, key: &BindingKey) -> Option<BindingCell> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| e.cell.clone())
    }

    pub async fn binding_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Populate every binding and subscribe it to live updates.
    ///
    /// Store failures are logged and counted in the report, never returned;
    /// a binding whose initial read fails falls back to its default. Only
    /// the first call does any work.
    pub async fn activate(&self) -> ActivationReport {
        if self.activated.swap(true, Ordering::SeqCst) {
            warn!("Config bindings already activated, ignoring");
            return ActivationReport::default();
        }

        let snapshot: Vec<(ConfigBinding, BindingCell)> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .map(|e| (e.binding.clone(), e.cell.clone()))
                .collect()
        };

        let results = join_all(
            snapshot
                .iter()
                .map(|(binding, cell)| self.activate_binding(binding, cell)),
        )
        .await;

        let mut report = ActivationReport::default();
        for ((binding, _), ok) in snapshot.iter().zip(results) {
            if ok {
                report.activated += 1;
            } else {
                report.failed.push(binding.effective_path().to_string());
            }
        }

        if report.is_clean() {
            info!("Activated {} config bindings", report.activated);
        } else {
            warn!(
                "Activated {} config bindings, {} failed: {:?}",
                report.activated,
                report.failed.len(),
                report.failed
            );
        }
        report
    }

    async fn activate_binding(&self, binding: &ConfigBinding, cell: &BindingCell) -> bool {
        let path = binding.effective_path();
        let mut ok = true;

        let callback: ValueCallback = {
            let cell = cell.clone();
            let kind = binding.kind;
            let default = binding.default_value.clone();
            Arc::new(move |raw: Option<String>| match raw {
                Some(raw) => cell.set_live(coerce(&raw, kind)),
                None => {
                    if let Some(default) = &default {
                        cell.set_live(default.clone());
                    }
                }
            })
        };

        if let Err(e) = self.store.watch(path, callback).await {
            warn!(path = %path, error = %e, "Failed to watch config value");
            ok = false;
        }

        let initial = match self.store.get(path).await {
            Ok(Some(raw)) => Some(coerce(&raw, binding.kind)),
            Ok(None) => binding.default_value.clone(),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read config value, using default");
                ok = false;
                binding.default_value.clone()
            }
        };

        if let Some(value) = initial {
            if !cell.set_initial(value) {
                debug!(path = %path, "Live value already applied, discarding initial read");
            }
        }
        ok
    }
}
