//! Shared slots holding the current value of a binding

use beacon_core::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug, Default)]
struct Slot {
    value: Option<Value>,
    // Set once a watch notification has been applied
    live: bool,
}

/// Handle to the value of one binding.
///
/// Clones share the same slot. Writes are last-writer-wins.
#[derive(Clone, Debug)]
pub struct BindingCell {
    slot: Arc<watch::Sender<Slot>>,
}

impl BindingCell {
    pub(crate) fn new() -> Self {
        let (slot, _) = watch::channel(Slot::default());
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Current value, `None` until the binding has been populated
    pub fn get(&self) -> Option<Value> {
        self.slot.borrow().value.clone()
    }

    /// Current value deserialized into `T`
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.get() {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(CoreError::from),
            None => Ok(None),
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().value.is_some()
    }

    /// Wait for the next write and return the value it stored
    pub async fn changed(&self) -> Option<Value> {
        let mut rx = self.slot.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.changed().await;
        let value = rx.borrow().value.clone();
        value
    }

    /// Apply a value delivered by a watch notification
    pub(crate) fn set_live(&self, value: Value) {
        self.slot.send_modify(|slot| {
            slot.value = Some(value);
            slot.live = true;
        });
    }

    /// Apply the result of the initial read unless a live value already landed.
    ///
    /// Returns whether the value was written.
    pub(crate) fn set_initial(&self, value: Value) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.live {
                return false;
            }
            slot.value = Some(value);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pool {
        size: u32,
    }

    #[test]
    fn test_clones_share_slot() {
        let cell = BindingCell::new();
        let other = cell.clone();
        assert!(!other.is_set());

        cell.set_live(json!("v1"));
        assert_eq!(other.get(), Some(json!("v1")));
    }

    #[test]
    fn test_initial_value_does_not_override_live_value() {
        let cell = BindingCell::new();
        assert!(cell.set_initial(json!("initial")));
        cell.set_live(json!("live"));
        assert!(!cell.set_initial(json!("stale")));
        assert_eq!(cell.get(), Some(json!("live")));
    }

    #[test]
    fn test_get_as() {
        let cell = BindingCell::new();
        assert_eq!(cell.get_as::<Pool>().unwrap(), None);

        cell.set_live(json!({"size": 4}));
        assert_eq!(cell.get_as::<Pool>().unwrap(), Some(Pool { size: 4 }));
        assert!(cell.get_as::<u32>().is_err());
    }

    #[tokio::test]
    async fn test_changed_resolves_on_next_write() {
        let cell = BindingCell::new();
        let waiter = cell.clone();
        let handle = tokio::spawn(async move { waiter.changed().await });

        tokio::task::yield_now().await;
        cell.set_live(json!(42));

        assert_eq!(handle.await.unwrap(), Some(json!(42)));
    }
}
