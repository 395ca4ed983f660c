//! Entity store abstraction.
//!
//! Every ledger component keeps its authoritative state behind an
//! [`EntityStore`] keyed by entity ID. Mutations go through
//! [`transact`], which gives exclusive access to **one** key while leaving
//! unrelated keys available, and commits only when the closure succeeds:
//!
//! ```text
//! transact(store, key, |draft| { ...checks...; mutate draft; Ok(r) })
//!   Ok(r)  → draft written back, r returned
//!   Err(e) → stored value untouched, e returned
//! ```
//!
//! [`MemoryStore`] is the in-process backing (sharded `DashMap`); a
//! persistent backing only has to implement the trait.

use std::hash::Hash;

use dashmap::DashMap;

use crate::Result;

/// Keyed storage for one entity type.
pub trait EntityStore<K, V>: Send + Sync {
    /// Snapshot of the entity.
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace an entity.
    fn put(&self, key: K, value: V);

    /// Remove an entity, returning it.
    fn delete(&self, key: &K) -> Option<V>;

    /// Snapshot of all keys (order unspecified).
    fn keys(&self) -> Vec<K>;

    /// Number of stored entities.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with exclusive access to the entity under `key`.
    ///
    /// Returns `false` if the key is absent. Implementations must serialize
    /// concurrent calls for the same key and must not block other keys for
    /// longer than the storage layer itself requires.
    fn update_with(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> bool;
}

/// Apply `f` to a draft copy of the entity and commit it only on `Ok`.
///
/// Returns `None` if the key is absent.
pub fn transact<K, V, R, S, F>(store: &S, key: &K, f: F) -> Option<Result<R>>
where
    S: EntityStore<K, V> + ?Sized,
    V: Clone,
    F: FnOnce(&mut V) -> Result<R>,
{
    let mut f = Some(f);
    let mut outcome = None;
    let found = store.update_with(key, &mut |current: &mut V| {
        if let Some(f) = f.take() {
            let mut draft = current.clone();
            let result = f(&mut draft);
            if result.is_ok() {
                *current = draft;
            }
            outcome = Some(result);
        }
    });
    if found { outcome } else { None }
}

/// In-memory store backed by a sharded concurrent map.
#[derive(Debug)]
pub struct MemoryStore<K: Eq + Hash, V> {
    map: DashMap<K, V>,
}

impl<K: Eq + Hash, V> MemoryStore<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EntityStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, v)| v)
    }

    fn keys(&self) -> Vec<K> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn update_with(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> bool {
        match self.map.get_mut(key) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}
