// Session-scoped identity cache.
//
// One cache per entity kind lives in the session. `get_or_create` is
// the only way entities come into existence, which is what makes two
// lookups of the same natural key return the same `Arc`.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// Identity cache mapping a natural key to the one live instance.
#[derive(Debug)]
pub(crate) struct EntityCache<K: Eq + Hash, V> {
    entries: DashMap<K, Arc<V>>,
}

impl<K: Eq + Hash, V> EntityCache<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the instance registered under `key`, creating it with
    /// `init` if none exists yet. The entry lock makes concurrent
    /// callers agree on a single winner.
    pub(crate) fn get_or_create(&self, key: K, init: impl FnOnce() -> Arc<V>) -> Arc<V> {
        self.entries.entry(key).or_insert_with(init).clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
