// ── Keyed record store ──
//
// Backing storage for the sign registry. Readers get whole snapshots
// over `watch`; writers go through the map shards.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// Records keyed by `K`, republished as a snapshot after each write.
pub(crate) struct EntityCollection<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert `make()` unless the key exists. Returns the stored entity
    /// and whether it was created.
    pub(crate) fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> T) -> (Arc<T>, bool) {
        let (entity, created) = {
            let mut created = false;
            let entry = self.by_key.entry(key).or_insert_with(|| {
                created = true;
                Arc::new(make())
            });
            (Arc::clone(entry.value()), created)
        };
        if created {
            self.publish();
        }
        (entity, created)
    }

    /// Mutate an entity in place. Returns `None` if the key is absent.
    ///
    /// The shard lock is released before the snapshot is rebuilt.
    pub(crate) fn update<R>(&self, key: &K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let result = {
            let mut entry = self.by_key.get_mut(key)?;
            f(Arc::make_mut(entry.value_mut()))
        };
        self.publish();
        Some(result)
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let values: Vec<Arc<T>> = self.by_key.iter().map(|r| Arc::clone(r.value())).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
