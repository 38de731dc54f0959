//! In-memory LRU tier of the blob store.

use rustc_hash::FxHashMap;

/// Bounded LRU map with an eviction hook.
///
/// The hook releases any OS-level references tied to an entry (the native
/// equivalent of revoking an object URL) and runs for evictions, explicit
/// removals, and `clear`.
pub struct MemoryLru<K, V> {
    entries: FxHashMap<K, Entry<V>>,
    capacity: usize,
    tick: u64,
    on_release: Option<Box<dyn Fn(&K, &V) + Send + Sync>>,
}

struct Entry<V> {
    value: V,
    last_used: u64,
}

impl<K: std::hash::Hash + Eq + Clone, V> MemoryLru<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity: capacity.max(1),
            tick: 0,
            on_release: None,
        }
    }

    /// Installs the release hook invoked whenever an entry leaves the map.
    pub fn set_release_hook(&mut self, hook: impl Fn(&K, &V) + Send + Sync + 'static) {
        self.on_release = Some(Box::new(hook));
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            &entry.value
        })
    }

    pub fn put(&mut self, key: K, value: V) {
        self.tick += 1;
        if let Some(old) = self.entries.insert(
            key.clone(),
            Entry {
                value,
                last_used: self.tick,
            },
        ) {
            self.release(&key, &old.value);
        }
        while self.entries.len() > self.capacity {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.release(&victim, &entry.value);
            }
        }
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.release(key, &entry.value);
        }
    }

    /// Empties the map, releasing every entry.
    pub fn clear(&mut self) {
        let drained: Vec<(K, Entry<V>)> = self.entries.drain().collect();
        for (key, entry) in &drained {
            self.release(key, &entry.value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn release(&self, key: &K, value: &V) {
        if let Some(hook) = &self.on_release {
            hook(key, value);
        }
    }
}
