//! In-process collection store.
//!
//! Behaves like the hosted store from a subscriber's point of view: the
//! current collection is pushed on subscribe and a full collection after
//! every change. Also carries hooks for driving failure and ordering cases.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::{CollectionPath, CollectionStore, SnapshotCallback, StoreError, StoreResult};
use crate::models::{LinkFields, LinkId, RawCollection};
use crate::subscription::{ReleaseFlag, Subscription};

/// Number of calls each store operation has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub subscribe: usize,
    pub append: usize,
    pub delete: usize,
}

#[derive(Clone, Default)]
pub struct MemoryCollectionStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, RawCollection>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    fail_next_append: Option<String>,
    fail_next_delete: Option<String>,
    paused: bool,
    pending_paths: BTreeSet<String>,
    calls: StoreCalls,
}

struct Listener {
    id: u64,
    path: String,
    callback: SnapshotCallback,
    released: ReleaseFlag,
}

type Delivery = (SnapshotCallback, ReleaseFlag, StoreResult<RawCollection>);

impl MemoryCollectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry directly and notify subscribers.
    pub fn seed(&self, path: &CollectionPath, id: &LinkId, fields: &LinkFields) {
        let deliveries = {
            let mut state = self.lock();
            state
                .collections
                .entry(path.to_string())
                .or_default()
                .insert(id, fields);
            state.changed(&path.to_string())
        };
        deliver(deliveries);
    }

    /// Replace a collection wholesale with raw JSON and notify subscribers.
    pub fn replace(&self, path: &CollectionPath, value: Value) {
        let deliveries = {
            let mut state = self.lock();
            state
                .collections
                .insert(path.to_string(), RawCollection::from_value(value));
            state.changed(&path.to_string())
        };
        deliver(deliveries);
    }

    /// Current contents of a collection.
    pub fn snapshot(&self, path: &CollectionPath) -> RawCollection {
        self.lock()
            .collections
            .get(&path.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next append fail with the given message.
    pub fn fail_next_append(&self, message: impl Into<String>) {
        self.lock().fail_next_append = Some(message.into());
    }

    /// Make the next delete fail with the given message.
    pub fn fail_next_delete(&self, message: impl Into<String>) {
        self.lock().fail_next_delete = Some(message.into());
    }

    /// Report a failure to every live subscriber of `path`.
    pub fn emit_error(&self, path: &CollectionPath, message: &str) {
        let deliveries = self.lock().error_deliveries(&path.to_string(), message);
        deliver(deliveries);
    }

    /// Hold change notifications until [`Self::resume_notifications`].
    pub fn pause_notifications(&self) {
        self.lock().paused = true;
    }

    /// Deliver every held notification and stop holding new ones.
    pub fn resume_notifications(&self) {
        let deliveries = {
            let mut state = self.lock();
            state.paused = false;
            let paths = std::mem::take(&mut state.pending_paths);
            let mut deliveries = Vec::new();
            for path in &paths {
                deliveries.extend(state.collect_deliveries(path));
            }
            deliveries
        };
        deliver(deliveries);
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    /// Number of subscriptions that have not been released.
    pub fn active_subscriptions(&self) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|listener| !listener.released.is_released())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test callback panicked; the data is intact
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn apply_append(&self, path: &CollectionPath, fields: &LinkFields) -> StoreResult<LinkId> {
        let (result, deliveries) = {
            let mut state = self.lock();
            state.calls.append += 1;
            if let Some(message) = state.fail_next_append.take() {
                return Err(StoreError::Injected(message));
            }
            let id = LinkId::generate();
            state
                .collections
                .entry(path.to_string())
                .or_default()
                .insert(&id, fields);
            (Ok(id), state.changed(&path.to_string()))
        };
        deliver(deliveries);
        result
    }

    fn apply_delete(&self, path: &CollectionPath, id: &LinkId) -> StoreResult<()> {
        let deliveries = {
            let mut state = self.lock();
            state.calls.delete += 1;
            if let Some(message) = state.fail_next_delete.take() {
                return Err(StoreError::Injected(message));
            }
            let key = path.to_string();
            if let Some(collection) = state.collections.get_mut(&key) {
                collection.remove(id);
            }
            state.changed(&key)
        };
        deliver(deliveries);
        Ok(())
    }
}

impl MemoryState {
    fn listeners_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Listener> + 'a {
        self.listeners
            .iter()
            .filter(move |listener| listener.path == path && !listener.released.is_released())
    }

    fn collect_deliveries(&self, path: &str) -> Vec<Delivery> {
        let collection = self.collections.get(path).cloned().unwrap_or_default();
        self.listeners_for(path)
            .map(|listener| {
                (
                    Arc::clone(&listener.callback),
                    listener.released.clone(),
                    Ok(collection.clone()),
                )
            })
            .collect()
    }

    fn error_deliveries(&self, path: &str, message: &str) -> Vec<Delivery> {
        self.listeners_for(path)
            .map(|listener| {
                (
                    Arc::clone(&listener.callback),
                    listener.released.clone(),
                    Err(StoreError::PermissionDenied(message.to_string())),
                )
            })
            .collect()
    }

    fn changed(&mut self, path: &str) -> Vec<Delivery> {
        if self.paused {
            self.pending_paths.insert(path.to_string());
            Vec::new()
        } else {
            self.collect_deliveries(path)
        }
    }
}

/// Invoke callbacks outside the state lock.
fn deliver(deliveries: Vec<Delivery>) {
    for (callback, released, result) in deliveries {
        if released.is_released() {
            continue;
        }
        callback(result);
    }
}

impl CollectionStore for MemoryCollectionStore {
    fn subscribe(&self, path: &CollectionPath, on_change: SnapshotCallback) -> Subscription {
        let key = path.to_string();
        let inner = Arc::clone(&self.inner);
        let (listener_id, initial, subscription) = {
            let mut state = self.lock();
            state.calls.subscribe += 1;
            let listener_id = state.next_listener_id;
            state.next_listener_id += 1;

            let (subscription, released) = Subscription::new(move || {
                let mut state = inner
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                state.listeners.retain(|listener| listener.id != listener_id);
            });
            state.listeners.push(Listener {
                id: listener_id,
                path: key.clone(),
                callback: Arc::clone(&on_change),
                released: released.clone(),
            });

            // Only the new listener gets the initial collection
            let initial = if state.paused {
                state.pending_paths.insert(key.clone());
                None
            } else {
                let collection = state.collections.get(&key).cloned().unwrap_or_default();
                Some((on_change, released, Ok(collection)))
            };
            (listener_id, initial, subscription)
        };

        tracing::debug!("Memory store subscription {} opened on {}", listener_id, key);
        deliver(initial.into_iter().collect());
        subscription
    }

    fn append(
        &self,
        path: &CollectionPath,
        fields: LinkFields,
    ) -> impl Future<Output = StoreResult<LinkId>> + Send {
        let store = self.clone();
        let path = path.clone();
        async move { store.apply_append(&path, &fields) }
    }

    fn delete_by_key(
        &self,
        path: &CollectionPath,
        id: &LinkId,
    ) -> impl Future<Output = StoreResult<()>> + Send {
        let store = self.clone();
        let path = path.clone();
        let id = id.clone();
        async move { store.apply_delete(&path, &id) }
    }
}
